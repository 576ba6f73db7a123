//! Session lifecycle manager.
//!
//! Creates sessions from connection parameters, resolves ids for the HTTP
//! handlers and forwards remote operations to the session's collaborators.

use std::sync::Arc;

use protocol::FileInfo;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Session, SessionError, SessionId, SessionRegistry};
use crate::ssh::{CommandOutput, ConnectionConfig, Connector};

/// Cloneable handle over the registry and the connector used to fill it.
#[derive(Clone)]
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn Connector>,
}

impl SessionManager {
    /// Creates a manager with an empty registry.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_registry(connector, Arc::new(SessionRegistry::new()))
    }

    /// Creates a manager over an existing registry.
    pub fn with_registry(connector: Arc<dyn Connector>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            connector,
        }
    }

    /// Returns the underlying registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Connects, starts the SFTP client and registers a new session.
    ///
    /// A connection whose SFTP client fails to start is closed before the error
    /// is returned.
    pub async fn create(&self, config: &ConnectionConfig) -> Result<SessionId, SessionError> {
        let connection = self
            .connector
            .connect(config)
            .await
            .map_err(SessionError::Connect)?;

        let files = match connection.open_file_transfer().await {
            Ok(files) => files,
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!(error = %close_err, "Failed to close connection after SFTP init failure");
                }
                return Err(SessionError::FileTransferInit(e));
            }
        };

        let id = Uuid::new_v4().to_string();
        self.registry.add(Session::new(id.clone(), connection, files));
        info!(
            session_id = %id,
            addr = %config.address(),
            user = %config.username,
            "Session created"
        );
        Ok(id)
    }

    /// Tears down a session.
    pub async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        self.registry.remove(id).await
    }

    /// Resolves a session id.
    pub fn lookup(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        self.registry.get(id)
    }

    /// Runs a command and returns its combined output.
    ///
    /// A non-zero exit is not an error here; callers inspect
    /// [`CommandOutput::exit_status`].
    pub async fn exec(&self, id: &str, command: &str) -> Result<CommandOutput, SessionError> {
        let session = self.lookup(id)?;
        debug!(session_id = %id, command, "Executing command");
        session
            .connection()
            .exec(command)
            .await
            .map_err(SessionError::Exec)
    }

    /// Lists a remote directory.
    pub async fn list(&self, id: &str, path: &str) -> Result<Vec<FileInfo>, SessionError> {
        let session = self.lookup(id)?;
        session
            .files()
            .list(path)
            .await
            .map_err(SessionError::Transfer)
    }

    /// Uploads bytes to a remote path.
    pub async fn upload(
        &self,
        id: &str,
        data: &[u8],
        remote_path: &str,
    ) -> Result<(), SessionError> {
        let session = self.lookup(id)?;
        session
            .files()
            .upload(data, remote_path)
            .await
            .map_err(SessionError::Transfer)
    }

    /// Downloads a remote file.
    pub async fn download(&self, id: &str, remote_path: &str) -> Result<Vec<u8>, SessionError> {
        let session = self.lookup(id)?;
        session
            .files()
            .download(remote_path)
            .await
            .map_err(SessionError::Transfer)
    }

    /// Deletes a remote file.
    pub async fn delete(&self, id: &str, path: &str) -> Result<(), SessionError> {
        let session = self.lookup(id)?;
        session
            .files()
            .delete(path)
            .await
            .map_err(SessionError::Transfer)
    }

    /// Creates a remote directory.
    pub async fn mkdir(&self, id: &str, path: &str) -> Result<(), SessionError> {
        let session = self.lookup(id)?;
        session
            .files()
            .mkdir(path)
            .await
            .map_err(SessionError::Transfer)
    }

    /// Renames a remote path.
    pub async fn rename(
        &self,
        id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), SessionError> {
        let session = self.lookup(id)?;
        session
            .files()
            .rename(old_path, new_path)
            .await
            .map_err(SessionError::Transfer)
    }

    /// Destroys every live session.
    pub async fn shutdown_all(&self) {
        let ids = self.registry.ids();
        if !ids.is_empty() {
            info!(count = ids.len(), "Closing remaining sessions");
        }
        for id in ids {
            // Already removed by a concurrent destroy.
            let _ = self.registry.remove(&id).await;
        }
    }

    /// Returns the number of live sessions.
    pub fn count(&self) -> usize {
        self.registry.len()
    }

    /// Returns the ids of all live sessions.
    pub fn list_ids(&self) -> Vec<SessionId> {
        self.registry.ids()
    }
}
