//! Interactive shell channel over a `russh` session channel.
//!
//! A `russh` channel is a single message stream. The relay wants three byte
//! streams, so once the shell starts a driver task owns the channel and
//! bridges it to in-memory pipes:
//!
//! - stdin pipe bytes become channel data, pipe EOF becomes channel EOF
//! - channel data lands in the stdout pipe, extended data (stderr) in the
//!   stderr pipe
//! - resize and close requests arrive over a control queue
//!
//! When the channel ends the driver drops its pipe ends, so readers see EOF,
//! and publishes the exit status.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use protocol::TerminalSize;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use super::{PtyMode, PtyRequest, ShellChannel, ShellReader, ShellWriter, SshError};

const PIPE_CAPACITY: usize = 64 * 1024;
const STDIN_CHUNK: usize = 4096;
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

enum Control {
    WindowChange(TerminalSize),
    Close,
}

/// Driver-side pipe ends.
struct DriverPipes {
    stdin: DuplexStream,
    stdout: DuplexStream,
    stderr: DuplexStream,
}

/// Client-side pipe ends, handed out by the `take_*` methods.
#[derive(Default)]
struct ClientPipes {
    stdin: Option<ShellWriter>,
    stdout: Option<ShellReader>,
    stderr: Option<ShellReader>,
}

enum State {
    /// Channel not started yet; pty requests go straight to it.
    Idle(Channel<Msg>, DriverPipes),
    /// Driver task owns the channel.
    Running(mpsc::UnboundedSender<Control>),
    /// Closed before start, or the start failed.
    Finished,
}

/// [`ShellChannel`] implementation for `russh`.
pub struct RusshShellChannel {
    state: tokio::sync::Mutex<State>,
    client: Mutex<ClientPipes>,
    exit_tx: Arc<watch::Sender<Option<Option<u32>>>>,
}

impl RusshShellChannel {
    pub(crate) fn new(channel: Channel<Msg>) -> Self {
        let (stdin_client, stdin_driver) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_client, stdout_driver) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_client, stderr_driver) = tokio::io::duplex(PIPE_CAPACITY);

        let client = ClientPipes {
            stdin: Some(Box::new(stdin_client)),
            stdout: Some(Box::new(stdout_client)),
            stderr: Some(Box::new(stderr_client)),
        };
        let driver = DriverPipes {
            stdin: stdin_driver,
            stdout: stdout_driver,
            stderr: stderr_driver,
        };

        let (exit_tx, _) = watch::channel(None);
        Self {
            state: tokio::sync::Mutex::new(State::Idle(channel, driver)),
            client: Mutex::new(client),
            exit_tx: Arc::new(exit_tx),
        }
    }

    fn take<T>(
        &self,
        name: &'static str,
        pick: impl FnOnce(&mut ClientPipes) -> Option<T>,
    ) -> Result<T, SshError> {
        let mut pipes = self
            .client
            .lock()
            .map_err(|_| SshError::Channel("pipe lock poisoned".to_string()))?;
        pick(&mut pipes).ok_or(SshError::StreamTaken(name))
    }

    fn finish(&self, status: Option<u32>) {
        self.exit_tx.send_replace(Some(status));
    }
}

fn pty_modes(request: &PtyRequest) -> Vec<(Pty, u32)> {
    request
        .modes
        .iter()
        .map(|(mode, value)| {
            let opcode = match mode {
                PtyMode::Echo => Pty::ECHO,
                PtyMode::InputSpeed => Pty::TTY_OP_ISPEED,
                PtyMode::OutputSpeed => Pty::TTY_OP_OSPEED,
            };
            (opcode, *value)
        })
        .collect()
}

/// Waits for the reply to a `want_reply` channel request.
async fn await_reply(channel: &mut Channel<Msg>, what: &str) -> Result<(), SshError> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => {
                return Err(SshError::Channel(format!("{} request rejected", what)))
            }
            Some(ChannelMsg::Close) | None => {
                return Err(SshError::Channel(format!(
                    "channel closed during {} request",
                    what
                )))
            }
            Some(other) => trace!(?other, "Ignoring message while awaiting reply"),
        }
    }
}

#[async_trait]
impl ShellChannel for RusshShellChannel {
    async fn request_pty(&self, request: &PtyRequest) -> Result<(), SshError> {
        let mut state = self.state.lock().await;
        let State::Idle(channel, _) = &mut *state else {
            return Err(SshError::Channel("pty must be requested before start".to_string()));
        };

        channel
            .request_pty(
                true,
                &request.term,
                request.size.cols,
                request.size.rows,
                0,
                0,
                &pty_modes(request),
            )
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;
        await_reply(channel, "pty").await
    }

    fn take_stdin(&self) -> Result<ShellWriter, SshError> {
        self.take("stdin", |pipes| pipes.stdin.take())
    }

    fn take_stdout(&self) -> Result<ShellReader, SshError> {
        self.take("stdout", |pipes| pipes.stdout.take())
    }

    fn take_stderr(&self) -> Result<ShellReader, SshError> {
        self.take("stderr", |pipes| pipes.stderr.take())
    }

    async fn start_shell(&self) -> Result<(), SshError> {
        let mut state = self.state.lock().await;
        if !matches!(&*state, State::Idle(..)) {
            return Err(SshError::Channel("shell already started".to_string()));
        }
        let State::Idle(mut channel, pipes) = std::mem::replace(&mut *state, State::Finished)
        else {
            return Err(SshError::Closed);
        };

        let started = match channel.request_shell(true).await {
            Ok(()) => await_reply(&mut channel, "shell").await,
            Err(e) => Err(SshError::Channel(e.to_string())),
        };
        if let Err(e) = started {
            let _ = channel.close().await;
            self.finish(None);
            return Err(e);
        }

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let exit_tx = Arc::clone(&self.exit_tx);
        tokio::spawn(async move {
            let status = drive(channel, pipes, control_rx).await;
            exit_tx.send_replace(Some(status));
        });

        *state = State::Running(control_tx);
        Ok(())
    }

    async fn window_change(&self, size: TerminalSize) -> Result<(), SshError> {
        let state = self.state.lock().await;
        match &*state {
            State::Idle(channel, _) => channel
                .window_change(size.cols, size.rows, 0, 0)
                .await
                .map_err(|e| SshError::Channel(e.to_string())),
            State::Running(control) => control
                .send(Control::WindowChange(size))
                .map_err(|_| SshError::Closed),
            State::Finished => Err(SshError::Closed),
        }
    }

    async fn wait(&self) -> Option<u32> {
        let mut rx = self.exit_tx.subscribe();
        {
            let state = self.state.lock().await;
            if matches!(&*state, State::Idle(..)) {
                return None;
            }
        }
        let status = match rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => exit.flatten(),
            Err(_) => None,
        };
        status
    }

    async fn close(&self) -> Result<(), SshError> {
        let mut state = self.state.lock().await;
        if let State::Running(control) = &*state {
            // The driver may already be gone, which also means closed.
            let _ = control.send(Control::Close);
            return Ok(());
        }
        match std::mem::replace(&mut *state, State::Finished) {
            State::Idle(channel, _) => {
                self.finish(None);
                channel
                    .close()
                    .await
                    .map_err(|e| SshError::Channel(e.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Pumps between the channel and the pipes until the channel ends.
async fn drive(
    mut channel: Channel<Msg>,
    pipes: DriverPipes,
    mut control: mpsc::UnboundedReceiver<Control>,
) -> Option<u32> {
    let DriverPipes {
        stdin,
        stdout,
        stderr,
    } = pipes;
    let mut stdin = Some(stdin);
    let mut stdout = Some(stdout);
    let mut stderr = Some(stderr);
    let mut exit_status = None;
    let mut buf = vec![0u8; STDIN_CHUNK];

    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if let Some(out) = stdout.as_mut() {
                        if out.write_all(&data).await.is_err() {
                            stdout = None;
                        }
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == SSH_EXTENDED_DATA_STDERR => {
                    if let Some(err) = stderr.as_mut() {
                        if err.write_all(&data).await.is_err() {
                            stderr = None;
                        }
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                    debug!(exit_status = code, "Remote shell exited");
                    exit_status = Some(code);
                }
                Some(ChannelMsg::Eof) => {
                    stdout = None;
                    stderr = None;
                }
                Some(ChannelMsg::Close) | None => break,
                Some(other) => trace!(?other, "Ignoring channel message"),
            },
            read = async {
                match stdin.as_mut() {
                    Some(input) => input.read(&mut buf).await,
                    None => std::future::pending().await,
                }
            } => match read {
                Ok(0) | Err(_) => {
                    stdin = None;
                    let _ = channel.eof().await;
                }
                Ok(n) => {
                    if channel.data(&buf[..n]).await.is_err() {
                        stdin = None;
                    }
                }
            },
            request = control.recv() => match request {
                Some(Control::WindowChange(size)) => {
                    let _ = channel.window_change(size.cols, size.rows, 0, 0).await;
                }
                Some(Control::Close) | None => {
                    let _ = channel.close().await;
                    break;
                }
            },
        }
    }

    drop(stdin);
    drop(stdout);
    drop(stderr);
    exit_status
}
