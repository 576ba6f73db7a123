//! Gateway server wiring.
//!
//! [`Gateway`] owns the configuration, the session manager and the shutdown
//! token. It builds the router, serves it until shutdown is requested and
//! then closes every remaining session.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{self, AppState, RouterOptions};
use crate::config::Config;
use crate::session::SessionManager;
use crate::ssh::{Connector, RusshConnector};

/// The HTTP/WebSocket gateway.
pub struct Gateway {
    config: Config,
    manager: SessionManager,
    shutdown_token: CancellationToken,
}

impl Gateway {
    /// Creates a gateway that dials real SSH servers.
    pub fn new(config: Config) -> Self {
        let connector = RusshConnector::new(
            config.ssh.connect_timeout(),
            config.ssh.keepalive_interval(),
        );
        Self::with_connector(config, Arc::new(connector))
    }

    /// Creates a gateway over a custom connector.
    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            manager: SessionManager::new(connector),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Returns the session manager.
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Returns the shutdown token for external tasks to observe or trigger
    /// shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Builds the application router.
    pub fn router(&self) -> Router {
        let state = AppState::new(self.manager.clone(), self.config.ssh.pty_request());
        let options = RouterOptions {
            cors_permissive: self.config.server.cors_permissive,
            max_upload_size: usize::try_from(self.config.transfer.max_upload_size)
                .unwrap_or(usize::MAX),
        };
        api::router(state, options)
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.server.socket_addr()?;
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))
    }

    /// Serves requests on `listener` until the shutdown token is cancelled,
    /// then closes all sessions.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr: SocketAddr = listener.local_addr()?;
        info!("ShellGate listening on {}", local_addr);

        let token = self.shutdown_token.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("server error")?;

        self.shutdown().await;
        Ok(())
    }

    /// Cancels the shutdown token and closes every remaining session.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let ids = self.manager.list_ids();
        if ids.is_empty() {
            info!("Gateway stopped");
            return;
        }

        info!("Closing {} active session(s)", ids.len());
        for id in &ids {
            debug!(session_id = %id, "Closing session on shutdown");
        }
        self.manager.shutdown_all().await;
        info!("Gateway stopped");
    }
}
