//! Configuration management for the ShellGate server.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/shellgate/config.toml`.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::TerminalSize;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ssh::PtyRequest;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("port must be non-zero")]
    InvalidPort,

    #[error("bind must be an IP address, got {0}")]
    InvalidBindAddress(String),

    #[error("connect_timeout_secs must be between 1 and 300, got {0}")]
    InvalidConnectTimeout(u64),

    #[error("terminal geometry must be non-zero, got {cols}x{rows}")]
    InvalidGeometry { cols: u32, rows: u32 },

    #[error("term must not be empty")]
    EmptyTerm,

    #[error("max_upload_size must be greater than 0, got {0}")]
    InvalidMaxUploadSize(u64),

    #[error("level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the ShellGate server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP listener configuration.
    pub server: ServerConfig,

    /// Outbound SSH configuration.
    pub ssh: SshConfig,

    /// File transfer configuration.
    pub transfer: TransferConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: String,

    /// Port to listen on.
    pub port: u16,

    /// Allow any origin, method and header.
    pub cors_permissive: bool,
}

/// Outbound SSH configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshConfig {
    /// TCP connect and handshake timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Keepalive interval in seconds (0 disables keepalives).
    pub keepalive_interval_secs: u64,

    /// `TERM` requested for interactive shells.
    pub term: String,

    /// Initial terminal width.
    pub cols: u32,

    /// Initial terminal height.
    pub rows: u32,
}

/// File transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum upload body size in bytes (default: 100MB).
    pub max_upload_size: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// Optional log file; rotated daily.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8822,
            cors_permissive: true,
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            keepalive_interval_secs: 30,
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 40,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl ServerConfig {
    /// Returns the socket address to listen on.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl SshConfig {
    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns the keepalive interval, or `None` when disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0)
            .then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    /// Returns the PTY request for new terminals.
    pub fn pty_request(&self) -> PtyRequest {
        PtyRequest::new(self.term.clone(), TerminalSize::new(self.cols, self.rows))
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shellgate")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SHELLGATE_PORT: Override listen port
    /// - SHELLGATE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("SHELLGATE_PORT") {
            if !port.is_empty() {
                match port.parse::<u16>() {
                    Ok(port) => {
                        tracing::info!("Overriding port from environment: {}", port);
                        self.server.port = port;
                    }
                    Err(_) => {
                        tracing::warn!("Ignoring invalid SHELLGATE_PORT value: {}", port);
                    }
                }
            }
        }

        if let Ok(level) = std::env::var("SHELLGATE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log level from environment: {}", level);
                self.log.level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        self.server.socket_addr()?;

        // 1-300 seconds
        let timeout = self.ssh.connect_timeout_secs;
        if !(1..=300).contains(&timeout) {
            return Err(ConfigError::InvalidConnectTimeout(timeout));
        }

        if self.ssh.cols == 0 || self.ssh.rows == 0 {
            return Err(ConfigError::InvalidGeometry {
                cols: self.ssh.cols,
                rows: self.ssh.rows,
            });
        }

        if self.ssh.term.trim().is_empty() {
            return Err(ConfigError::EmptyTerm);
        }

        if self.transfer.max_upload_size == 0 {
            return Err(ConfigError::InvalidMaxUploadSize(
                self.transfer.max_upload_size,
            ));
        }

        let level = self.log.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 8822);
        assert!(config.server.cors_permissive);
        assert_eq!(config.ssh.connect_timeout_secs, 10);
        assert_eq!(config.ssh.term, "xterm-256color");
        assert_eq!((config.ssh.cols, config.ssh.rows), (80, 40));
        assert_eq!(config.transfer.max_upload_size, 100 * 1024 * 1024);
        assert_eq!(config.log.level, "info");
        assert!(config.log.file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_empty() {
        // Empty TOML should use all defaults
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
port = 9000

[ssh]
cols = 132
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.ssh.cols, 132);
        // Other values should be defaults
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.ssh.rows, 40);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[server]
bind = "127.0.0.1"
port = 2200
cors_permissive = false

[ssh]
connect_timeout_secs = 5
keepalive_interval_secs = 0
term = "vt100"
cols = 100
rows = 30

[transfer]
max_upload_size = 1048576

[log]
level = "debug"
file = "/var/log/shellgate.log"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(
            config.server.socket_addr().unwrap(),
            "127.0.0.1:2200".parse().unwrap()
        );
        assert!(!config.server.cors_permissive);
        assert_eq!(config.ssh.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.ssh.keepalive_interval(), None);
        let pty = config.ssh.pty_request();
        assert_eq!(pty.term, "vt100");
        assert_eq!(pty.size, TerminalSize::new(100, 30));
        assert_eq!(config.transfer.max_upload_size, 1048576);
        assert_eq!(config.log.level, "debug");
        assert_eq!(
            config.log.file,
            Some(PathBuf::from("/var/log/shellgate.log"))
        );
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[server
port = 1
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[server]
port = "eighty"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.server.port = 4242;
        config.log.file = Some(PathBuf::from("/tmp/gw.log"));
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_invalid_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let err = format!("{:#}", Config::load(&path).unwrap_err());
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_validate_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort));
    }

    #[test]
    fn test_validate_bind() {
        let mut config = Config::default();
        config.server.bind = "not-an-ip".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBindAddress("not-an-ip".to_string()))
        );
    }

    #[test]
    fn test_validate_connect_timeout_bounds() {
        let mut config = Config::default();
        config.ssh.connect_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidConnectTimeout(0)));

        config.ssh.connect_timeout_secs = 301;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidConnectTimeout(301))
        );

        config.ssh.connect_timeout_secs = 300;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_geometry() {
        let mut config = Config::default();
        config.ssh.rows = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidGeometry { cols: 80, rows: 0 })
        );
    }

    #[test]
    fn test_validate_upload_size() {
        let mut config = Config::default();
        config.transfer.max_upload_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxUploadSize(0)));
    }

    #[test]
    fn test_validate_log_level_case_insensitive() {
        let mut config = Config::default();
        config.log.level = "WARN".to_string();
        assert!(config.validate().is_ok());

        config.log.level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("shellgate/config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_override_port() {
        std::env::set_var("SHELLGATE_PORT", "9100");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.port, 9100);

        std::env::remove_var("SHELLGATE_PORT");
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_port_ignored() {
        std::env::set_var("SHELLGATE_PORT", "http");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.port, 8822);

        std::env::remove_var("SHELLGATE_PORT");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("SHELLGATE_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.log.level, "info");

        std::env::remove_var("SHELLGATE_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::remove_var("SHELLGATE_PORT");
        std::env::set_var("SHELLGATE_LOG_LEVEL", "trace");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.log.level, "trace");
        assert_eq!(config.server.port, 8822);

        std::env::remove_var("SHELLGATE_LOG_LEVEL");
    }
}
