//! # ShellGate Gateway
//!
//! Exposes remote SSH servers to browser clients. Each session pairs one
//! authenticated SSH connection with an SFTP client; sessions are created
//! over HTTP, driven through command execution and file transfer endpoints,
//! and attached to an interactive shell over a WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                    api (axum Router)                  │
//! │   handlers: connect / exec / sftp    terminal (ws)    │
//! └──────────────┬───────────────────────────┬────────────┘
//!                │                           │
//!       ┌────────▼─────────┐       ┌─────────▼─────────┐
//!       │  SessionManager  │       │   TerminalRelay   │
//!       │  SessionRegistry │       │  (per WebSocket)  │
//!       └────────┬─────────┘       └─────────┬─────────┘
//!                │                           │
//!       ┌────────▼───────────────────────────▼─────────┐
//!       │  ssh: Connector / RemoteConnection /         │
//!       │       ShellChannel / FileTransfer (russh)    │
//!       └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`api`]: HTTP routes, WebSocket upgrade and error mapping
//! - [`session`]: session registry and lifecycle manager
//! - [`relay`]: WebSocket to shell byte relay
//! - [`ssh`]: SSH and SFTP client seams and their russh implementations
//! - [`config`]: TOML configuration with environment overrides
//! - [`logging`]: tracing subscriber setup
//! - [`server`]: binds, serves and shuts down the gateway
//! - `test_support`: in-memory SSH collaborators for tests (`test-support`
//!   feature)

pub mod api;
pub mod config;
pub mod logging;
pub mod relay;
pub mod server;
pub mod session;
pub mod ssh;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use config::Config;
pub use server::Gateway;
pub use session::{SessionId, SessionManager};
