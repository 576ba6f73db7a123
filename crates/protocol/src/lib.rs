//! # ShellGate Protocol Library
//!
//! This crate provides the wire types exchanged between the ShellGate server
//! and browser clients.
//!
//! ## Overview
//!
//! - **HTTP bodies**: connect, exec and SFTP request/response types
//! - **Terminal control**: the `{"type":"resize","cols":N,"rows":N}` message
//!   carried in-band on the terminal WebSocket
//! - **Errors**: request validation failures
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ControlMessage, TerminalSize};
//!
//! let frame = ControlMessage::resize(TerminalSize::new(120, 40)).to_json();
//! assert_eq!(
//!     ControlMessage::parse_resize(frame.as_bytes()),
//!     Some(TerminalSize::new(120, 40))
//! );
//!
//! // Anything else is terminal input.
//! assert_eq!(ControlMessage::parse_resize(b"ls -la\n"), None);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Message definitions
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    ConnectRequest, ConnectResponse, ControlMessage, DownloadQuery, ErrorBody, ExecRequest,
    ExecResponse, FileInfo, HealthResponse, ListQuery, ListResponse, MessageResponse,
    PathRequest, RenameRequest, TerminalSize, RESIZE_TYPE,
};
