//! Terminal relay.
//!
//! Bridges one client-facing duplex message stream to one remote interactive
//! shell. Three pump tasks run per relay:
//!
//! 1. shell stdout to the client; its end is the relay's completion signal
//! 2. shell stderr to the client, best effort
//! 3. client to shell stdin, with resize control messages intercepted
//!
//! stdout and stderr messages share the outbound stream with no relative
//! ordering guarantee; each stream's own order is preserved.

mod utf8;

use std::fmt::Display;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use protocol::ControlMessage;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::session::SessionId;
use crate::ssh::{
    PtyRequest, RemoteConnection, ShellChannel, ShellReader, ShellWriter, SshError,
};

pub use utf8::Utf8Carry;

/// Read buffer size for the shell output pumps.
pub const OUTPUT_CHUNK: usize = 1024;

/// Errors raised while setting up or running a relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to open channel: {0}")]
    OpenChannel(#[source] SshError),

    #[error("PTY request failed: {0}")]
    PtyRequest(#[source] SshError),

    #[error("failed to obtain shell streams: {0}")]
    Streams(#[source] SshError),

    #[error("failed to start shell: {0}")]
    StartShell(#[source] SshError),

    /// A shell stream failed mid-relay. Logged, never returned to a caller.
    #[error("{stream} stream error: {source}")]
    Io {
        stream: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Why the stdout pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    /// The shell closed its output.
    Eof,
    /// Reading shell output failed.
    ReadError,
    /// The client could no longer be written to.
    ClientGone,
}

type Outbound<Tx> = Arc<Mutex<Tx>>;

/// Per-session terminal relay.
#[derive(Debug, Clone)]
pub struct TerminalRelay {
    session_id: SessionId,
    pty: PtyRequest,
}

impl TerminalRelay {
    /// Creates a relay for `session_id` requesting `pty`.
    pub fn new(session_id: impl Into<SessionId>, pty: PtyRequest) -> Self {
        Self {
            session_id: session_id.into(),
            pty,
        }
    }

    /// Runs the relay to completion.
    ///
    /// `outbound` receives shell output as text messages; `inbound` yields
    /// client messages. Returns the shell's exit status once the shell
    /// output has ended and the channel has finished. The outbound sink is
    /// closed on every return path.
    pub async fn run<Tx, Rx, E>(
        &self,
        connection: &dyn RemoteConnection,
        outbound: Tx,
        inbound: Rx,
    ) -> Result<Option<u32>, RelayError>
    where
        Tx: Sink<String> + Send + Unpin + 'static,
        Tx::Error: Display + Send,
        Rx: Stream<Item = Result<Vec<u8>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let outbound = Arc::new(Mutex::new(outbound));

        let (channel, stdin, stdout, stderr) = match self.open_shell(connection).await {
            Ok(parts) => parts,
            Err(e) => {
                close_outbound(&outbound, &self.session_id).await;
                return Err(e);
            }
        };
        info!(session_id = %self.session_id, "Terminal relay started");

        let (done_tx, done_rx) = oneshot::channel();
        let (input_done_tx, input_done_rx) = oneshot::channel();
        let mut pumps = JoinSet::new();

        {
            let outbound = Arc::clone(&outbound);
            let session_id = self.session_id.clone();
            pumps.spawn(async move {
                let end = pump_output("stdout", stdout, outbound, &session_id).await;
                let _ = done_tx.send(end);
            });
        }
        {
            let outbound = Arc::clone(&outbound);
            let session_id = self.session_id.clone();
            pumps.spawn(async move {
                let end = pump_output("stderr", stderr, outbound, &session_id).await;
                debug!(session_id = %session_id, ?end, "stderr pump stopped");
            });
        }
        {
            let channel = Arc::clone(&channel);
            let session_id = self.session_id.clone();
            pumps.spawn(async move {
                pump_input(inbound, stdin, channel, &session_id).await;
                let _ = input_done_tx.send(());
            });
        }

        let mut done_rx = done_rx;
        let end = tokio::select! {
            end = &mut done_rx => end.unwrap_or(PumpEnd::ReadError),
            _ = input_done_rx => {
                // Client went away: end the shell so its output pump finishes.
                debug!(session_id = %self.session_id, "Client stream ended");
                if let Err(e) = channel.close().await {
                    debug!(session_id = %self.session_id, error = %e, "Channel close failed");
                }
                done_rx.await.unwrap_or(PumpEnd::ClientGone)
            }
        };

        if end != PumpEnd::Eof {
            let _ = channel.close().await;
        }
        let exit_status = channel.wait().await;

        close_outbound(&outbound, &self.session_id).await;
        if let Err(e) = channel.close().await {
            debug!(session_id = %self.session_id, error = %e, "Channel close failed");
        }
        pumps.shutdown().await;

        info!(
            session_id = %self.session_id,
            ?end,
            exit_status = ?exit_status,
            "Terminal relay finished"
        );
        Ok(exit_status)
    }

    async fn open_shell(
        &self,
        connection: &dyn RemoteConnection,
    ) -> Result<(Arc<dyn ShellChannel>, ShellWriter, ShellReader, ShellReader), RelayError> {
        let channel = connection
            .open_channel()
            .await
            .map_err(RelayError::OpenChannel)?;
        let channel: Arc<dyn ShellChannel> = Arc::from(channel);

        let setup = async {
            channel
                .request_pty(&self.pty)
                .await
                .map_err(RelayError::PtyRequest)?;
            let stdin = channel.take_stdin().map_err(RelayError::Streams)?;
            let stdout = channel.take_stdout().map_err(RelayError::Streams)?;
            let stderr = channel.take_stderr().map_err(RelayError::Streams)?;
            channel.start_shell().await.map_err(RelayError::StartShell)?;
            Ok::<_, RelayError>((stdin, stdout, stderr))
        };

        match setup.await {
            Ok((stdin, stdout, stderr)) => Ok((channel, stdin, stdout, stderr)),
            Err(e) => {
                let _ = channel.close().await;
                Err(e)
            }
        }
    }
}

/// Forwards shell output to the client until EOF, a read error, or a failed
/// send.
async fn pump_output<Tx>(
    stream: &'static str,
    mut reader: ShellReader,
    outbound: Outbound<Tx>,
    session_id: &str,
) -> PumpEnd
where
    Tx: Sink<String> + Unpin,
    Tx::Error: Display,
{
    let mut buf = [0u8; OUTPUT_CHUNK];
    let mut carry = Utf8Carry::new();

    loop {
        let text = match reader.read(&mut buf).await {
            Ok(0) => {
                if let Some(tail) = carry.finish() {
                    let _ = send_text(&outbound, tail, stream, session_id).await;
                }
                return PumpEnd::Eof;
            }
            Ok(n) => carry.decode(&buf[..n]),
            Err(source) => {
                let err = RelayError::Io { stream, source };
                debug!(session_id, error = %err, "Shell read failed");
                return PumpEnd::ReadError;
            }
        };

        if text.is_empty() {
            continue;
        }
        if !send_text(&outbound, text, stream, session_id).await {
            return PumpEnd::ClientGone;
        }
    }
}

async fn send_text<Tx>(
    outbound: &Outbound<Tx>,
    text: String,
    stream: &'static str,
    session_id: &str,
) -> bool
where
    Tx: Sink<String> + Unpin,
    Tx::Error: Display,
{
    let mut sink = outbound.lock().await;
    match sink.send(text).await {
        Ok(()) => true,
        Err(e) => {
            debug!(session_id, stream, error = %e, "Client send failed");
            false
        }
    }
}

/// Forwards client messages to shell stdin, applying resize requests.
async fn pump_input<Rx, E>(
    inbound: Rx,
    mut stdin: ShellWriter,
    channel: Arc<dyn ShellChannel>,
    session_id: &str,
) where
    Rx: Stream<Item = Result<Vec<u8>, E>>,
    E: Display,
{
    let mut inbound = std::pin::pin!(inbound);

    while let Some(message) = inbound.next().await {
        let payload = match message {
            Ok(payload) => payload,
            Err(e) => {
                debug!(session_id, error = %e, "Client read failed");
                break;
            }
        };

        if let Some(size) = ControlMessage::parse_resize(&payload) {
            debug!(session_id, cols = size.cols, rows = size.rows, "Resizing terminal");
            if let Err(e) = channel.window_change(size).await {
                warn!(session_id, error = %e, "Window change failed");
            }
            continue;
        }

        if let Err(source) = write_input(&mut stdin, &payload).await {
            let err = RelayError::Io {
                stream: "stdin",
                source,
            };
            debug!(session_id, error = %err, "Shell write failed");
            break;
        }
    }

    if let Err(e) = stdin.shutdown().await {
        debug!(session_id, error = %e, "Closing shell stdin failed");
    }
}

async fn write_input(stdin: &mut ShellWriter, payload: &[u8]) -> std::io::Result<()> {
    stdin.write_all(payload).await?;
    stdin.flush().await
}

async fn close_outbound<Tx>(outbound: &Outbound<Tx>, session_id: &str)
where
    Tx: Sink<String> + Unpin,
    Tx::Error: Display,
{
    if let Err(e) = outbound.lock().await.close().await {
        debug!(session_id, error = %e, "Closing client stream failed");
    }
}
