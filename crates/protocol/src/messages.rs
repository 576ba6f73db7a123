//! Message definitions for ShellGate.
//!
//! This module defines the JSON bodies exchanged over the HTTP API and the
//! in-band control message carried on the terminal WebSocket. Everything here
//! is plain data: the gateway owns all behaviour.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{require_all, ProtocolError, Result};

/// Control message `type` that requests a terminal resize.
pub const RESIZE_TYPE: &str = "resize";

// ============================================================================
// Terminal Messages
// ============================================================================

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Width in columns.
    pub cols: u32,
    /// Height in rows.
    pub rows: u32,
}

impl TerminalSize {
    /// Creates a new terminal size.
    pub fn new(cols: u32, rows: u32) -> Self {
        Self { cols, rows }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 40 }
    }
}

/// In-band control message sent by the browser on the terminal socket.
///
/// All three fields are required. Extra fields are ignored. Anything that does
/// not decode into this shape is terminal input, not a control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Message kind. Only `"resize"` is acted upon.
    #[serde(rename = "type")]
    pub kind: String,
    /// Requested width in columns.
    pub cols: u32,
    /// Requested height in rows.
    pub rows: u32,
}

impl ControlMessage {
    /// Builds a resize control message.
    pub fn resize(size: TerminalSize) -> Self {
        Self {
            kind: RESIZE_TYPE.to_string(),
            cols: size.cols,
            rows: size.rows,
        }
    }

    /// Decodes a control message from a raw frame payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Returns the requested size if `payload` is a resize control message.
    ///
    /// Returns `None` for everything else, which callers forward verbatim.
    pub fn parse_resize(payload: &[u8]) -> Option<TerminalSize> {
        match Self::parse(payload) {
            Ok(msg) if msg.kind == RESIZE_TYPE => Some(TerminalSize::new(msg.cols, msg.rows)),
            _ => None,
        }
    }

    /// Serializes the message to its JSON text form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ============================================================================
// Session Messages
// ============================================================================

/// Request to open a new SSH session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Remote host name or address.
    pub host: String,
    /// Remote SSH port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Password for password authentication.
    #[serde(default)]
    pub password: Option<String>,
    /// PEM/OpenSSH encoded private key for public key authentication.
    #[serde(default)]
    pub private_key: Option<String>,
    /// Passphrase protecting `private_key`.
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl ConnectRequest {
    /// Checks the required fields.
    ///
    /// Credentials are not checked here; the SSH layer decides what it accepts.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ProtocolError::MissingField("host"));
        }
        if self.port == 0 {
            return Err(ProtocolError::InvalidField {
                field: "port",
                reason: "must be between 1 and 65535".to_string(),
            });
        }
        if self.username.trim().is_empty() {
            return Err(ProtocolError::MissingField("username"));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Response confirming a new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// Opaque session identifier used by every other call.
    pub session_id: String,
}

/// Request to run a single command on a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Target session.
    pub session_id: String,
    /// Command line passed to the remote shell.
    pub command: String,
}

impl ExecRequest {
    /// Checks the required fields.
    pub fn validate(&self) -> Result<()> {
        require_all(&[("session_id", &self.session_id)])?;
        require_all(&[("command", &self.command)])
    }
}

/// Result of a command run.
///
/// A command that exits non-zero still yields its captured output; `error`
/// describes the failure alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResponse {
    /// Combined stdout and stderr.
    pub output: String,
    /// Remote exit status, when the server reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<u32>,
    /// Failure description for a non-zero exit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// File Messages
// ============================================================================

/// Metadata for one remote directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Entry name (not full path).
    pub name: String,
    /// Full remote path.
    pub path: String,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified_time: DateTime<Utc>,
    /// Mode string such as `drwxr-xr-x`.
    pub permissions: String,
}

/// Query for listing a remote directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    /// Target session.
    #[serde(default)]
    pub session_id: String,
    /// Directory to list.
    #[serde(default)]
    pub path: String,
}

impl ListQuery {
    /// Checks the required fields.
    pub fn validate(&self) -> Result<()> {
        require_all(&[("session_id", &self.session_id), ("path", &self.path)])
    }
}

/// Directory listing. `files` is an empty array for an empty directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    /// Entries in the directory.
    pub files: Vec<FileInfo>,
}

/// Query for downloading a remote file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadQuery {
    /// Target session.
    #[serde(default)]
    pub session_id: String,
    /// File to download.
    #[serde(default)]
    pub remote_path: String,
}

impl DownloadQuery {
    /// Checks the required fields.
    pub fn validate(&self) -> Result<()> {
        require_all(&[
            ("session_id", &self.session_id),
            ("remote_path", &self.remote_path),
        ])
    }
}

/// Request naming one remote path (delete, mkdir).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRequest {
    /// Target session.
    pub session_id: String,
    /// Remote path.
    pub path: String,
}

impl PathRequest {
    /// Checks the required fields.
    pub fn validate(&self) -> Result<()> {
        require_all(&[("session_id", &self.session_id), ("path", &self.path)])
    }
}

/// Request to rename a remote path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    /// Target session.
    pub session_id: String,
    /// Existing path.
    pub old_path: String,
    /// New path.
    pub new_path: String,
}

impl RenameRequest {
    /// Checks the required fields.
    pub fn validate(&self) -> Result<()> {
        require_all(&[
            ("session_id", &self.session_id),
            ("old_path", &self.old_path),
            ("new_path", &self.new_path),
        ])
    }
}

// ============================================================================
// Generic Responses
// ============================================================================

/// Acknowledgement with a short status word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Status word such as `"deleted"`.
    pub message: String,
}

impl MessageResponse {
    /// Creates an acknowledgement.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human readable failure description.
    pub error: String,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Liveness probe response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is accepting requests.
    pub status: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resize() {
        let size = ControlMessage::parse_resize(br#"{"type":"resize","cols":120,"rows":40}"#);
        assert_eq!(size, Some(TerminalSize::new(120, 40)));
    }

    #[test]
    fn test_parse_resize_ignores_extra_fields() {
        let size =
            ControlMessage::parse_resize(br#"{"type":"resize","cols":90,"rows":30,"px":1}"#);
        assert_eq!(size, Some(TerminalSize::new(90, 30)));
    }

    #[test]
    fn test_parse_resize_other_type_is_not_resize() {
        let payload = br#"{"type":"ping","cols":120,"rows":40}"#;
        assert!(ControlMessage::parse(payload).is_ok());
        assert_eq!(ControlMessage::parse_resize(payload), None);
    }

    #[test]
    fn test_parse_resize_missing_field() {
        assert_eq!(
            ControlMessage::parse_resize(br#"{"type":"resize","cols":120}"#),
            None
        );
        assert_eq!(
            ControlMessage::parse_resize(br#"{"cols":120,"rows":40}"#),
            None
        );
    }

    #[test]
    fn test_parse_resize_rejects_non_json_and_wrong_types() {
        assert_eq!(ControlMessage::parse_resize(b"ls -la\n"), None);
        assert_eq!(ControlMessage::parse_resize(b"{\"type\":\"resize\""), None);
        assert_eq!(ControlMessage::parse_resize(b"\"resize\""), None);
        assert_eq!(
            ControlMessage::parse_resize(br#"{"type":"resize","cols":"120","rows":40}"#),
            None
        );
        assert_eq!(
            ControlMessage::parse_resize(br#"{"type":"resize","cols":-1,"rows":40}"#),
            None
        );
    }

    #[test]
    fn test_control_message_to_json() {
        let json = ControlMessage::resize(TerminalSize::new(100, 50)).to_json();
        assert_eq!(
            ControlMessage::parse_resize(json.as_bytes()),
            Some(TerminalSize::new(100, 50))
        );
    }

    #[test]
    fn test_default_terminal_size() {
        assert_eq!(TerminalSize::default(), TerminalSize::new(80, 40));
    }

    #[test]
    fn test_connect_request_optional_credentials() {
        let req: ConnectRequest =
            serde_json::from_str(r#"{"host":"example.com","port":22,"username":"root"}"#)
                .unwrap();
        assert_eq!(req.password, None);
        assert_eq!(req.private_key, None);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_connect_request_missing_port_fails_to_decode() {
        let result =
            serde_json::from_str::<ConnectRequest>(r#"{"host":"example.com","username":"root"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_connect_request_validate() {
        let mut req = ConnectRequest {
            host: "example.com".to_string(),
            port: 22,
            username: "root".to_string(),
            password: Some("secret".to_string()),
            private_key: None,
            passphrase: None,
        };
        assert!(req.validate().is_ok());

        req.port = 0;
        assert!(matches!(
            req.validate(),
            Err(ProtocolError::InvalidField { field: "port", .. })
        ));

        req.port = 22;
        req.username = String::new();
        assert_eq!(req.validate(), Err(ProtocolError::MissingField("username")));
    }

    #[test]
    fn test_connect_request_debug_redacts_secrets() {
        let req = ConnectRequest {
            host: "example.com".to_string(),
            port: 22,
            username: "root".to_string(),
            password: Some("hunter2".to_string()),
            private_key: Some("-----BEGIN KEY-----".to_string()),
            passphrase: Some("open sesame".to_string()),
        };
        let debug = format!("{:?}", req);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("BEGIN KEY"));
        assert!(!debug.contains("open sesame"));
        assert!(debug.contains("example.com"));
    }

    #[test]
    fn test_exec_response_omits_empty_fields() {
        let resp = ExecResponse {
            output: "hi\n".to_string(),
            exit_status: None,
            error: None,
        };
        assert_eq!(serde_json::to_string(&resp).unwrap(), r#"{"output":"hi\n"}"#);
    }

    #[test]
    fn test_list_query_validate() {
        let query = ListQuery {
            session_id: "abc".to_string(),
            path: String::new(),
        };
        assert_eq!(
            query.validate().unwrap_err().to_string(),
            "session_id and path required"
        );
    }

    #[test]
    fn test_rename_request_validate() {
        let req = RenameRequest {
            session_id: "abc".to_string(),
            old_path: "/a".to_string(),
            new_path: "/b".to_string(),
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_file_info_serializes_rfc3339() {
        let info = FileInfo {
            name: "notes.txt".to_string(),
            path: "/home/me/notes.txt".to_string(),
            is_directory: false,
            size: 12,
            modified_time: DateTime::from_timestamp(0, 0).unwrap(),
            permissions: "-rw-r--r--".to_string(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["modified_time"], "1970-01-01T00:00:00Z");
        assert_eq!(json["is_directory"], false);
    }

    #[test]
    fn test_empty_list_response_is_array() {
        let json = serde_json::to_string(&ListResponse::default()).unwrap();
        assert_eq!(json, r#"{"files":[]}"#);
    }

    #[test]
    fn test_health_response() {
        let json = serde_json::to_string(&HealthResponse::default()).unwrap();
        assert_eq!(json, r#"{"status":"ok"}"#);
    }
}
