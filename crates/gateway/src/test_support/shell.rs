use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use protocol::TerminalSize;
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::ssh::{PtyRequest, ShellChannel, ShellReader, ShellWriter, SshError};

/// What a [`MockShellChannel`] does once started.
#[derive(Debug, Clone, Default)]
pub struct ShellScript {
    /// Written to stdout right after start.
    pub banner: Vec<u8>,
    /// Written to stderr right after start.
    pub stderr: Vec<u8>,
    /// Echo stdin back on stdout until stdin closes. Without echo the shell
    /// exits right after writing its banner.
    pub echo: bool,
    /// Exit status reported when the shell ends on its own.
    pub exit_status: Option<u32>,
}

impl ShellScript {
    /// A shell that prints `output` and exits with status 0.
    pub fn prints(output: &str) -> Self {
        Self {
            banner: output.as_bytes().to_vec(),
            exit_status: Some(0),
            ..Self::default()
        }
    }

    /// A shell that echoes its input until stdin closes.
    pub fn echo() -> Self {
        Self {
            echo: true,
            exit_status: Some(0),
            ..Self::default()
        }
    }

    /// Sets the stdout banner.
    pub fn with_banner(mut self, banner: &str) -> Self {
        self.banner = banner.as_bytes().to_vec();
        self
    }

    /// Sets the stderr output.
    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.as_bytes().to_vec();
        self
    }
}

/// Something the shell received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// Bytes written to stdin.
    Input(Vec<u8>),
    /// A window change request.
    Resize(TerminalSize),
}

#[derive(Debug, Default)]
struct RecorderState {
    pty: Option<PtyRequest>,
    events: Vec<ShellEvent>,
    stdin_closed: bool,
    started: bool,
    closed: bool,
}

/// Shared view of everything a [`MockShellChannel`] received.
#[derive(Debug, Clone, Default)]
pub struct ShellRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl ShellRecorder {
    fn with<T>(&self, f: impl FnOnce(&mut RecorderState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Returns all events in arrival order.
    pub fn events(&self) -> Vec<ShellEvent> {
        self.with(|s| s.events.clone())
    }

    /// Returns every byte written to stdin, concatenated.
    pub fn stdin(&self) -> Vec<u8> {
        self.with(|s| {
            s.events
                .iter()
                .filter_map(|event| match event {
                    ShellEvent::Input(bytes) => Some(bytes.as_slice()),
                    ShellEvent::Resize(_) => None,
                })
                .flatten()
                .copied()
                .collect()
        })
    }

    /// Returns every window change, in order.
    pub fn window_changes(&self) -> Vec<TerminalSize> {
        self.with(|s| {
            s.events
                .iter()
                .filter_map(|event| match event {
                    ShellEvent::Resize(size) => Some(*size),
                    ShellEvent::Input(_) => None,
                })
                .collect()
        })
    }

    /// Returns the PTY request, if one was made.
    pub fn pty(&self) -> Option<PtyRequest> {
        self.with(|s| s.pty.clone())
    }

    /// Returns true once stdin has been shut down.
    pub fn stdin_closed(&self) -> bool {
        self.with(|s| s.stdin_closed)
    }

    /// Returns true once the shell has been started.
    pub fn started(&self) -> bool {
        self.with(|s| s.started)
    }

    /// Returns true once the channel has been closed.
    pub fn closed(&self) -> bool {
        self.with(|s| s.closed)
    }
}

/// Stdin writer that records each write before passing it to the shell task.
struct RecordingWriter {
    recorder: ShellRecorder,
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let Some(tx) = self.tx.as_ref() else {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        };
        if tx.send(buf.to_vec()).is_err() {
            self.tx = None;
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        self.recorder
            .with(|s| s.events.push(ShellEvent::Input(buf.to_vec())));
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx = None;
        self.recorder.with(|s| s.stdin_closed = true);
        Poll::Ready(Ok(()))
    }
}

struct ShellParts {
    stdout: DuplexStream,
    stderr: DuplexStream,
    input: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[derive(Default)]
struct Handles {
    stdin: Option<ShellWriter>,
    stdout: Option<ShellReader>,
    stderr: Option<ShellReader>,
    parts: Option<ShellParts>,
}

/// Scripted [`ShellChannel`].
///
/// Cancelling the token passed to [`MockShellChannel::new`] (as closing the
/// owning [`super::MockConnection`] does) ends the shell: stdout and stderr
/// reach EOF and stdin writes fail.
pub struct MockShellChannel {
    script: ShellScript,
    recorder: ShellRecorder,
    handles: Mutex<Handles>,
    cancel: CancellationToken,
    exit_tx: Arc<watch::Sender<Option<Option<u32>>>>,
}

impl MockShellChannel {
    /// Creates a channel that will play `script`.
    pub fn new(script: ShellScript, recorder: ShellRecorder, cancel: CancellationToken) -> Self {
        let (stdout_client, stdout_shell) = tokio::io::duplex(64 * 1024);
        let (stderr_client, stderr_shell) = tokio::io::duplex(64 * 1024);
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let handles = Handles {
            stdin: Some(Box::new(RecordingWriter {
                recorder: recorder.clone(),
                tx: Some(input_tx),
            })),
            stdout: Some(Box::new(stdout_client)),
            stderr: Some(Box::new(stderr_client)),
            parts: Some(ShellParts {
                stdout: stdout_shell,
                stderr: stderr_shell,
                input: input_rx,
            }),
        };

        let (exit_tx, _) = watch::channel(None);
        Self {
            script,
            recorder,
            handles: Mutex::new(handles),
            cancel,
            exit_tx: Arc::new(exit_tx),
        }
    }

    /// Returns the recorder shared with this channel.
    pub fn recorder(&self) -> &ShellRecorder {
        &self.recorder
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn play(script: ShellScript, parts: ShellParts) -> Option<u32> {
    let ShellParts {
        mut stdout,
        mut stderr,
        mut input,
    } = parts;

    if !script.banner.is_empty() {
        let _ = stdout.write_all(&script.banner).await;
    }
    if !script.stderr.is_empty() {
        let _ = stderr.write_all(&script.stderr).await;
    }
    drop(stderr);

    if script.echo {
        while let Some(bytes) = input.recv().await {
            if stdout.write_all(&bytes).await.is_err() {
                break;
            }
        }
    }
    script.exit_status
}

#[async_trait]
impl ShellChannel for MockShellChannel {
    async fn request_pty(&self, request: &PtyRequest) -> Result<(), SshError> {
        if self.cancel.is_cancelled() {
            return Err(SshError::Closed);
        }
        self.recorder.with(|s| s.pty = Some(request.clone()));
        Ok(())
    }

    fn take_stdin(&self) -> Result<ShellWriter, SshError> {
        self.handles()
            .stdin
            .take()
            .ok_or(SshError::StreamTaken("stdin"))
    }

    fn take_stdout(&self) -> Result<ShellReader, SshError> {
        self.handles()
            .stdout
            .take()
            .ok_or(SshError::StreamTaken("stdout"))
    }

    fn take_stderr(&self) -> Result<ShellReader, SshError> {
        self.handles()
            .stderr
            .take()
            .ok_or(SshError::StreamTaken("stderr"))
    }

    async fn start_shell(&self) -> Result<(), SshError> {
        if self.cancel.is_cancelled() {
            return Err(SshError::Closed);
        }
        let parts = self
            .handles()
            .parts
            .take()
            .ok_or_else(|| SshError::Channel("shell already started".to_string()))?;
        self.recorder.with(|s| s.started = true);

        let script = self.script.clone();
        let cancel = self.cancel.clone();
        let exit_tx = Arc::clone(&self.exit_tx);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = play(script, parts) => status,
                _ = cancel.cancelled() => None,
            };
            exit_tx.send_replace(Some(status));
        });
        Ok(())
    }

    async fn window_change(&self, size: TerminalSize) -> Result<(), SshError> {
        if self.cancel.is_cancelled() {
            return Err(SshError::Closed);
        }
        self.recorder.with(|s| s.events.push(ShellEvent::Resize(size)));
        Ok(())
    }

    async fn wait(&self) -> Option<u32> {
        if !self.recorder.started() {
            return None;
        }
        let mut rx = self.exit_tx.subscribe();
        let status = match rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => exit.flatten(),
            Err(_) => None,
        };
        status
    }

    async fn close(&self) -> Result<(), SshError> {
        self.recorder.with(|s| s.closed = true);
        self.cancel.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_prints_then_exits() {
        let channel = MockShellChannel::new(
            ShellScript::prints("hello\n"),
            ShellRecorder::default(),
            CancellationToken::new(),
        );
        let mut stdout = channel.take_stdout().unwrap();
        channel.start_shell().await.unwrap();

        let mut out = Vec::new();
        stdout.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello\n");
        assert_eq!(channel.wait().await, Some(0));
    }

    #[tokio::test]
    async fn test_echo_until_stdin_closes() {
        let channel = MockShellChannel::new(
            ShellScript::echo(),
            ShellRecorder::default(),
            CancellationToken::new(),
        );
        let mut stdin = channel.take_stdin().unwrap();
        let mut stdout = channel.take_stdout().unwrap();
        channel.start_shell().await.unwrap();

        stdin.write_all(b"ping").await.unwrap();
        stdin.shutdown().await.unwrap();

        let mut out = Vec::new();
        stdout.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"ping");
        assert!(channel.recorder().stdin_closed());
    }

    #[tokio::test]
    async fn test_cancel_ends_shell() {
        let cancel = CancellationToken::new();
        let channel = MockShellChannel::new(
            ShellScript::echo(),
            ShellRecorder::default(),
            cancel.clone(),
        );
        let mut stdout = channel.take_stdout().unwrap();
        channel.start_shell().await.unwrap();

        cancel.cancel();

        let mut out = Vec::new();
        stdout.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(channel.wait().await, None);
    }

    #[tokio::test]
    async fn test_streams_can_only_be_taken_once() {
        let channel = MockShellChannel::new(
            ShellScript::default(),
            ShellRecorder::default(),
            CancellationToken::new(),
        );
        assert!(channel.take_stderr().is_ok());
        assert!(matches!(
            channel.take_stderr(),
            Err(SshError::StreamTaken("stderr"))
        ));
    }

    #[tokio::test]
    async fn test_wait_reports_exit_to_every_waiter() {
        let channel = std::sync::Arc::new(MockShellChannel::new(
            ShellScript::prints("bye\n"),
            ShellRecorder::default(),
            CancellationToken::new(),
        ));
        let mut stdout = channel.take_stdout().unwrap();
        channel.start_shell().await.unwrap();

        let waiter = {
            let channel = std::sync::Arc::clone(&channel);
            tokio::spawn(async move { channel.wait().await })
        };
        let mut out = Vec::new();
        stdout.read_to_end(&mut out).await.unwrap();

        assert_eq!(waiter.await.unwrap(), Some(0));
        // A late waiter sees the recorded status without blocking.
        assert_eq!(channel.wait().await, Some(0));
    }

    #[tokio::test]
    async fn test_wait_before_start_returns_immediately() {
        let channel = MockShellChannel::new(
            ShellScript::echo(),
            ShellRecorder::default(),
            CancellationToken::new(),
        );
        assert_eq!(channel.wait().await, None);
    }
}
