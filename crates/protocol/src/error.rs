//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering request validation and decoding failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A required field was missing or empty.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// Two or more required fields were missing or empty.
    #[error("{} required", .0.join(" and "))]
    MissingFields(Vec<&'static str>),

    /// A field was present but held an unusable value.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Failed to deserialize a message.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Deserialization(err.to_string())
    }
}

/// Checks that every named field is non-empty.
///
/// Mirrors the message format browser clients already rely on:
/// `"session_id and path required"`.
pub fn require_all(fields: &[(&'static str, &str)]) -> Result<()> {
    let missing: Vec<&'static str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

    match missing.len() {
        0 => Ok(()),
        1 if fields.len() == 1 => Err(ProtocolError::MissingField(missing[0])),
        _ => Err(ProtocolError::MissingFields(
            fields.iter().map(|(name, _)| *name).collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_display() {
        let err = ProtocolError::MissingField("host");
        assert_eq!(err.to_string(), "host is required");
    }

    #[test]
    fn test_missing_fields_display() {
        let err = ProtocolError::MissingFields(vec!["session_id", "path"]);
        assert_eq!(err.to_string(), "session_id and path required");
    }

    #[test]
    fn test_require_all_ok() {
        assert!(require_all(&[("session_id", "abc"), ("path", "/tmp")]).is_ok());
    }

    #[test]
    fn test_require_all_reports_every_field_when_any_missing() {
        let err = require_all(&[("session_id", "abc"), ("path", "")]).unwrap_err();
        assert_eq!(err.to_string(), "session_id and path required");
    }

    #[test]
    fn test_require_all_single_field() {
        let err = require_all(&[("command", "  ")]).unwrap_err();
        assert_eq!(err, ProtocolError::MissingField("command"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let err: ProtocolError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }
}
