//! Process-wide map of live sessions.
//!
//! # Teardown ordering
//!
//! [`SessionRegistry::remove`] deletes the map entry first and closes the
//! session's resources afterwards, outside any shard lock. SSH disconnects can
//! take arbitrarily long, so no lock is held across them. The consequence is
//! that an id stops resolving the instant teardown begins:
//!
//! - a `get` that runs after the entry is gone fails with
//!   [`SessionError::NotFound`], even while the closes are still in flight
//! - a `get` that won the race holds an `Arc<Session>` whose operations start
//!   failing fast once the connection closes

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::{Session, SessionError, SessionId};

/// Concurrent session map.
///
/// Lookups take a shard read lock and never wait on unrelated ids.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session under its own id, replacing any previous entry.
    pub fn add(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        let id = session.id().clone();
        if self
            .sessions
            .insert(id.clone(), Arc::clone(&session))
            .is_some()
        {
            debug!(session_id = %id, "Replaced existing registry entry");
        }
        session
    }

    /// Looks up a session.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Removes a session and closes its transfer client, then its connection.
    ///
    /// Fails with [`SessionError::NotFound`] and does nothing else when the id
    /// is absent.
    pub async fn remove(&self, id: &str) -> Result<(), SessionError> {
        let (id, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        session.close().await;
        info!(session_id = %id, "Session removed");
        Ok(())
    }

    /// Returns true if the id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true when no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns the ids of all live sessions.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}
