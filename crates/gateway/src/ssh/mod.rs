//! Remote SSH collaborators.
//!
//! The session core only talks to the traits in this module. The production
//! implementations live in [`client`], [`channel`] and [`sftp`] and are built
//! on `russh` and `russh-sftp`; `crate::test_support` provides in-memory
//! ones.

pub mod channel;
pub mod client;
pub mod sftp;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use protocol::{ConnectRequest, FileInfo, TerminalSize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

pub use channel::RusshShellChannel;
pub use client::{RusshConnection, RusshConnector};
pub use sftp::SftpFileTransfer;

/// Read half of a remote shell stream (stdout or stderr).
pub type ShellReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a remote shell stream (stdin).
pub type ShellWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors raised by the SSH collaborators.
#[derive(Debug, Error)]
pub enum SshError {
    /// TCP connect or SSH handshake failed.
    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// The connection attempt exceeded the configured timeout.
    #[error("timed out connecting to {addr} after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    /// The supplied private key could not be decoded.
    #[error("failed to parse private key: {0}")]
    InvalidKey(String),

    /// The server rejected every supplied credential.
    #[error("authentication failed for user {0}")]
    AuthenticationFailed(String),

    /// A channel could not be opened or a channel request was refused.
    #[error("channel error: {0}")]
    Channel(String),

    /// A stream handle was requested twice.
    #[error("{0} stream already taken")]
    StreamTaken(&'static str),

    /// An SFTP operation failed.
    #[error("sftp error: {0}")]
    Sftp(String),

    /// The connection has been closed.
    #[error("connection closed")]
    Closed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection parameters for one SSH session.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
}

impl ConnectionConfig {
    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<ConnectRequest> for ConnectionConfig {
    fn from(req: ConnectRequest) -> Self {
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());
        Self {
            host: req.host,
            port: req.port,
            username: req.username,
            password: non_empty(req.password),
            private_key: non_empty(req.private_key),
            passphrase: non_empty(req.passphrase),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.is_some())
            .field("private_key", &self.private_key.is_some())
            .field("passphrase", &self.passphrase.is_some())
            .finish()
    }
}

/// Terminal mode opcodes sent with a PTY request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtyMode {
    /// Local echo.
    Echo,
    /// Input baud rate.
    InputSpeed,
    /// Output baud rate.
    OutputSpeed,
}

/// Pseudo-terminal request parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// `TERM` value, e.g. `xterm-256color`.
    pub term: String,
    /// Initial geometry.
    pub size: TerminalSize,
    /// Terminal modes.
    pub modes: Vec<(PtyMode, u32)>,
}

impl PtyRequest {
    /// Creates a request with echo on and 14400 baud in both directions.
    pub fn new(term: impl Into<String>, size: TerminalSize) -> Self {
        Self {
            term: term.into(),
            size,
            modes: vec![
                (PtyMode::Echo, 1),
                (PtyMode::InputSpeed, 14400),
                (PtyMode::OutputSpeed, 14400),
            ],
        }
    }
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self::new("xterm-256color", TerminalSize::default())
    }
}

/// Captured result of a one-shot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Combined stdout and stderr, lossily decoded.
    pub output: String,
    /// Exit status, if the server sent one.
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    /// Returns true when the command reported a zero exit status.
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Opens authenticated connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dials and authenticates.
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn RemoteConnection>, SshError>;
}

/// An authenticated SSH connection.
///
/// Closing the connection must make in-flight channel and transfer operations
/// fail instead of hanging.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Opens a fresh session channel for an interactive shell.
    async fn open_channel(&self) -> Result<Box<dyn ShellChannel>, SshError>;

    /// Runs a command to completion and captures its combined output.
    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError>;

    /// Starts a file transfer client on this connection.
    async fn open_file_transfer(&self) -> Result<Box<dyn FileTransfer>, SshError>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), SshError>;
}

/// An interactive session channel.
///
/// Setup order is `request_pty`, `take_*`, `start_shell`. After start,
/// `window_change`, `wait` and `close` may be called concurrently.
#[async_trait]
pub trait ShellChannel: Send + Sync {
    /// Requests a pseudo-terminal.
    async fn request_pty(&self, request: &PtyRequest) -> Result<(), SshError>;

    /// Takes the stdin writer. Shutting it down sends EOF to the remote.
    fn take_stdin(&self) -> Result<ShellWriter, SshError>;

    /// Takes the stdout reader.
    fn take_stdout(&self) -> Result<ShellReader, SshError>;

    /// Takes the stderr reader.
    fn take_stderr(&self) -> Result<ShellReader, SshError>;

    /// Starts the login shell.
    async fn start_shell(&self) -> Result<(), SshError>;

    /// Notifies the remote of a new terminal size.
    async fn window_change(&self, size: TerminalSize) -> Result<(), SshError>;

    /// Waits for the channel to finish and returns the exit status, if any.
    async fn wait(&self) -> Option<u32>;

    /// Closes the channel.
    async fn close(&self) -> Result<(), SshError>;
}

/// Remote file operations layered on a connection.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Lists a directory.
    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, SshError>;

    /// Writes `data` to `remote_path`, replacing any existing file.
    async fn upload(&self, data: &[u8], remote_path: &str) -> Result<(), SshError>;

    /// Reads the whole file at `remote_path`.
    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, SshError>;

    /// Removes a file or an empty directory.
    async fn delete(&self, path: &str) -> Result<(), SshError>;

    /// Creates a directory.
    async fn mkdir(&self, path: &str) -> Result<(), SshError>;

    /// Renames a file or directory.
    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), SshError>;

    /// Ends the transfer session.
    async fn close(&self) -> Result<(), SshError>;
}

/// Joins a listed directory and an entry name without doubling the root slash.
pub fn join_remote_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Returns the last component of a remote path.
pub fn remote_basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "." } else { "/" };
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Returns the parent directory of a remote path.
pub fn remote_parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => ".",
    }
}

/// Renders a unix mode the way `ls -l` does, e.g. `drwxr-xr-x`.
pub fn format_mode(mode: u32, is_dir: bool) -> String {
    const S_IFMT: u32 = 0o170000;
    const S_IFLNK: u32 = 0o120000;

    let kind = if is_dir {
        'd'
    } else if mode & S_IFMT == S_IFLNK {
        'L'
    } else {
        '-'
    };

    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}
