use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{next_close_order, MemoryFileTransfer, MockShellChannel, ShellRecorder, ShellScript};
use crate::ssh::{
    CommandOutput, ConnectionConfig, Connector, FileTransfer, RemoteConnection, ShellChannel,
    SshError,
};

type ErrorFactory = Arc<dyn Fn() -> SshError + Send + Sync>;

struct ConnectionInner {
    script: ShellScript,
    files: MemoryFileTransfer,
    fail_file_transfer: bool,
    close_delay: Option<Duration>,
    cancel: CancellationToken,
    closed: AtomicBool,
    close_order: Mutex<Option<u64>>,
    shells: Mutex<Vec<ShellRecorder>>,
}

/// In-memory [`RemoteConnection`].
///
/// Closing it cancels every shell opened on it and makes later operations
/// fail with [`SshError::Closed`].
#[derive(Clone)]
pub struct MockConnection {
    inner: Arc<ConnectionInner>,
}

impl MockConnection {
    /// Creates a connection whose shells echo their input.
    pub fn new() -> Self {
        Self::build(ShellScript::echo(), MemoryFileTransfer::new(), false, None)
    }

    fn build(
        script: ShellScript,
        files: MemoryFileTransfer,
        fail_file_transfer: bool,
        close_delay: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                script,
                files,
                fail_file_transfer,
                close_delay,
                cancel: CancellationToken::new(),
                closed: AtomicBool::new(false),
                close_order: Mutex::new(None),
                shells: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Sets the script played by shells opened on this connection.
    pub fn with_script(self, script: ShellScript) -> Self {
        let inner = &self.inner;
        Self::build(script, inner.files.clone(), inner.fail_file_transfer, inner.close_delay)
    }

    /// Makes `close` take `delay` before it completes.
    pub fn with_close_delay(self, delay: Duration) -> Self {
        let inner = &self.inner;
        Self::build(
            inner.script.clone(),
            inner.files.clone(),
            inner.fail_file_transfer,
            Some(delay),
        )
    }

    /// Returns true once `close` has completed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns the position of the close call in the global close sequence.
    pub fn close_order(&self) -> Option<u64> {
        *self
            .inner
            .close_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the recorders of every shell opened so far.
    pub fn shells(&self) -> Vec<ShellRecorder> {
        self.inner
            .shells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the file tree served by this connection.
    pub fn files(&self) -> &MemoryFileTransfer {
        &self.inner.files
    }

    fn ensure_open(&self) -> Result<(), SshError> {
        if self.is_closed() || self.inner.cancel.is_cancelled() {
            return Err(SshError::Closed);
        }
        Ok(())
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteConnection for MockConnection {
    async fn open_channel(&self) -> Result<Box<dyn ShellChannel>, SshError> {
        self.ensure_open()?;
        let recorder = ShellRecorder::default();
        self.inner
            .shells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(recorder.clone());
        Ok(Box::new(MockShellChannel::new(
            self.inner.script.clone(),
            recorder,
            self.inner.cancel.child_token(),
        )))
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        self.ensure_open()?;
        if command.trim() == "false" {
            return Ok(CommandOutput {
                output: String::new(),
                exit_status: Some(1),
            });
        }
        Ok(CommandOutput {
            output: format!("{}\n", command),
            exit_status: Some(0),
        })
    }

    async fn open_file_transfer(&self) -> Result<Box<dyn FileTransfer>, SshError> {
        self.ensure_open()?;
        if self.inner.fail_file_transfer {
            return Err(SshError::Sftp("subsystem request failed".to_string()));
        }
        Ok(Box::new(self.inner.files.clone()))
    }

    async fn close(&self) -> Result<(), SshError> {
        // Cancel first so in-flight shells end while the close is pending.
        self.inner.cancel.cancel();
        if let Some(delay) = self.inner.close_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            *self
                .inner
                .close_order
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(next_close_order());
        }
        Ok(())
    }
}

/// [`Connector`] handing out [`MockConnection`]s.
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Option<ShellScript>,
    files: Option<MemoryFileTransfer>,
    failure: Option<ErrorFactory>,
    fail_file_transfer: bool,
    attempts: Arc<AtomicUsize>,
    connections: Arc<Mutex<Vec<MockConnection>>>,
}

impl MockConnector {
    /// Creates a connector whose connections always succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector whose every connect fails with `error()`.
    pub fn failing(error: impl Fn() -> SshError + Send + Sync + 'static) -> Self {
        Self {
            failure: Some(Arc::new(error)),
            ..Self::default()
        }
    }

    /// Sets the shell script for new connections.
    pub fn with_script(mut self, script: ShellScript) -> Self {
        self.script = Some(script);
        self
    }

    /// Serves `files` from every new connection.
    pub fn with_files(mut self, files: MemoryFileTransfer) -> Self {
        self.files = Some(files);
        self
    }

    /// Makes the file transfer client fail to start.
    pub fn with_failing_file_transfer(mut self) -> Self {
        self.fail_file_transfer = true;
        self
    }

    /// Returns the number of connect calls.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns every connection handed out so far.
    pub fn connections(&self) -> Vec<MockConnection> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _config: &ConnectionConfig,
    ) -> Result<Box<dyn RemoteConnection>, SshError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = &self.failure {
            return Err(failure());
        }

        let connection = MockConnection::build(
            self.script.clone().unwrap_or_else(ShellScript::echo),
            self.files.clone().unwrap_or_default(),
            self.fail_file_transfer,
            None,
        );
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(connection.clone());
        Ok(Box::new(connection))
    }
}
