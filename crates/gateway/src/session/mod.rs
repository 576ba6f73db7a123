//! Session lifecycle.
//!
//! A [`Session`] pairs one authenticated SSH connection with the SFTP client
//! layered on it. Sessions live in the [`SessionRegistry`] and are created and
//! torn down by the [`SessionManager`].

pub mod manager;
pub mod registry;

use thiserror::Error;
use tracing::warn;

use crate::ssh::{FileTransfer, RemoteConnection, SshError};

pub use manager::SessionManager;
pub use registry::SessionRegistry;

/// Opaque session identifier (UUID v4 string).
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Unknown or already removed session id.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// Connecting or authenticating failed.
    #[error("failed to connect: {0}")]
    Connect(#[source] SshError),

    /// The SFTP client could not be started on a fresh connection.
    #[error("SFTP init failed: {0}")]
    FileTransferInit(#[source] SshError),

    /// Running a command failed at the transport level.
    #[error("failed to execute command: {0}")]
    Exec(#[source] SshError),

    /// A remote file operation failed.
    #[error("{0}")]
    Transfer(#[source] SshError),
}

/// A live remote session.
pub struct Session {
    id: SessionId,
    connection: Box<dyn RemoteConnection>,
    files: Box<dyn FileTransfer>,
}

impl Session {
    /// Creates a session from an open connection and its transfer client.
    pub fn new(
        id: SessionId,
        connection: Box<dyn RemoteConnection>,
        files: Box<dyn FileTransfer>,
    ) -> Self {
        Self {
            id,
            connection,
            files,
        }
    }

    /// Returns the session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the SSH connection.
    pub fn connection(&self) -> &dyn RemoteConnection {
        self.connection.as_ref()
    }

    /// Returns the file transfer client.
    pub fn files(&self) -> &dyn FileTransfer {
        self.files.as_ref()
    }

    /// Closes the transfer client, then the connection.
    ///
    /// Close failures are logged; teardown always runs to the end.
    pub async fn close(&self) {
        if let Err(e) = self.files.close().await {
            warn!(session_id = %self.id, error = %e, "Failed to close SFTP client");
        }
        if let Err(e) = self.connection.close().await {
            warn!(session_id = %self.id, error = %e, "Failed to close SSH connection");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}
