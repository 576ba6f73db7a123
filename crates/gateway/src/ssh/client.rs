//! SSH connections backed by `russh`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use tracing::{debug, info, warn};

use super::channel::RusshShellChannel;
use super::sftp::SftpFileTransfer;
use super::{
    CommandOutput, ConnectionConfig, Connector, FileTransfer, RemoteConnection, ShellChannel,
    SshError,
};

/// Client-side protocol callbacks.
///
/// Host keys are accepted without verification; the fingerprint is logged.
struct ClientHandler {
    addr: String,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            addr = %self.addr,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting server host key"
        );
        Ok(true)
    }
}

/// Dials SSH servers with `russh`.
#[derive(Debug, Clone)]
pub struct RusshConnector {
    connect_timeout: Duration,
    keepalive_interval: Option<Duration>,
}

impl RusshConnector {
    /// Creates a connector.
    pub fn new(connect_timeout: Duration, keepalive_interval: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            keepalive_interval,
        }
    }

    async fn authenticate(
        handle: &mut Handle<ClientHandler>,
        config: &ConnectionConfig,
    ) -> Result<(), SshError> {
        let user = config.username.as_str();

        if let Some(key_text) = &config.private_key {
            let key = russh_keys::decode_secret_key(key_text, config.passphrase.as_deref())
                .map_err(|e| SshError::InvalidKey(e.to_string()))?;
            let accepted = handle
                .authenticate_publickey(user, Arc::new(key))
                .await
                .map_err(|e| SshError::Connect {
                    addr: config.address(),
                    reason: e.to_string(),
                })?;
            if accepted {
                debug!(user, "Public key authentication succeeded");
                return Ok(());
            }
            debug!(user, "Public key rejected");
        }

        if let Some(password) = &config.password {
            let accepted = handle
                .authenticate_password(user, password)
                .await
                .map_err(|e| SshError::Connect {
                    addr: config.address(),
                    reason: e.to_string(),
                })?;
            if accepted {
                debug!(user, "Password authentication succeeded");
                return Ok(());
            }
        }

        Err(SshError::AuthenticationFailed(user.to_string()))
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Some(Duration::from_secs(30)))
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn RemoteConnection>, SshError> {
        let addr = config.address();
        info!(addr = %addr, user = %config.username, "Connecting to SSH server");

        let ssh_config = Arc::new(client::Config {
            keepalive_interval: self.keepalive_interval,
            keepalive_max: 3,
            ..Default::default()
        });
        let handler = ClientHandler { addr: addr.clone() };

        let mut handle = tokio::time::timeout(
            self.connect_timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| SshError::Timeout {
            addr: addr.clone(),
            timeout: self.connect_timeout,
        })?
        .map_err(|e| SshError::Connect {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;

        if let Err(e) = Self::authenticate(&mut handle, config).await {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(e);
        }

        info!(addr = %addr, "SSH connection established");
        Ok(Box::new(RusshConnection::new(addr, handle)))
    }
}

/// An authenticated `russh` client connection.
pub struct RusshConnection {
    addr: String,
    handle: Handle<ClientHandler>,
    closed: AtomicBool,
}

impl RusshConnection {
    fn new(addr: String, handle: Handle<ClientHandler>) -> Self {
        Self {
            addr,
            handle,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), SshError> {
        if self.closed.load(Ordering::Acquire) || self.handle.is_closed() {
            return Err(SshError::Closed);
        }
        Ok(())
    }

    async fn open_session(&self) -> Result<russh::Channel<client::Msg>, SshError> {
        self.ensure_open()?;
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))
    }
}

#[async_trait]
impl RemoteConnection for RusshConnection {
    async fn open_channel(&self) -> Result<Box<dyn ShellChannel>, SshError> {
        let channel = self.open_session().await?;
        Ok(Box::new(RusshShellChannel::new(channel)))
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        let mut channel = self.open_session().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        let mut output = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, .. } => output.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                ChannelMsg::Failure => {
                    return Err(SshError::Channel("exec request rejected".to_string()))
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        debug!(addr = %self.addr, exit_status = ?exit_status, "Command finished");
        Ok(CommandOutput {
            output: String::from_utf8_lossy(&output).into_owned(),
            exit_status,
        })
    }

    async fn open_file_transfer(&self) -> Result<Box<dyn FileTransfer>, SshError> {
        let channel = self.open_session().await?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;
        let transfer = SftpFileTransfer::start(channel.into_stream()).await?;
        Ok(Box::new(transfer))
    }

    async fn close(&self) -> Result<(), SshError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(addr = %self.addr, "Disconnecting");
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            warn!(addr = %self.addr, error = %e, "Disconnect failed");
            return Err(SshError::Channel(e.to_string()));
        }
        Ok(())
    }
}
