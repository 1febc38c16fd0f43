//! Configuration loading for drop-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).
//! Every section and field is optional; missing values take the defaults below.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for drop-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Room configuration.
    #[serde(default)]
    pub rooms: RoomsConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the WebSocket listener (default: 0.0.0.0:8765).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Largest accepted WebSocket message in bytes (default: 32MB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Room configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    /// Messages buffered per room while a peer is absent (default: 100).
    ///
    /// 0 disables buffering: relaying to an empty slot fails with
    /// `peer_not_ready`.
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
    /// Maximum number of live rooms (default: 10000).
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum new connections per IP address per minute (default: 60).
    #[serde(default = "default_connections_per_ip")]
    pub connections_per_ip: u32,
    /// Maximum messages per connection per minute (default: 600).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Seconds a connection may stay open without registering (default: 30).
    #[serde(default = "default_register_timeout_secs")]
    pub register_timeout_secs: u64,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Serve `/health` and `/metrics` (default: true).
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8765".to_string()
}

fn default_max_message_size() -> usize {
    32 * 1024 * 1024 // 32MB
}

fn default_replay_capacity() -> usize {
    100
}

fn default_max_rooms() -> usize {
    10_000
}

fn default_connections_per_ip() -> u32 {
    60
}

fn default_messages_per_minute() -> u32 {
    600
}

fn default_register_timeout_secs() -> u64 {
    30
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_http_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            replay_capacity: default_replay_capacity(),
            max_rooms: default_max_rooms(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connections_per_ip: default_connections_per_ip(),
            messages_per_minute: default_messages_per_minute(),
            register_timeout_secs: default_register_timeout_secs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
            enabled: default_http_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8765");
        assert_eq!(config.server.max_message_size, 1 << 25);
        assert_eq!(config.rooms.replay_capacity, 100);
        assert!(config.http.enabled);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:9000"

[rooms]
replay_capacity = 0

[limits]
messages_per_minute = 30

[http]
enabled = false
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.server.max_message_size, 1 << 25);
        assert_eq!(config.rooms.replay_capacity, 0);
        assert_eq!(config.rooms.max_rooms, 10_000);
        assert_eq!(config.limits.messages_per_minute, 30);
        assert_eq!(config.limits.register_timeout_secs, 30);
        assert!(!config.http.enabled);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.limits.connections_per_ip, 60);
        assert_eq!(config.http.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[rooms]\nmax_rooms = 5\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.rooms.max_rooms, 5);
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn from_file_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[rooms\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
