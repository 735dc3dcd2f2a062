//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Size of the connection pool, which also caps concurrent storage calls.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "filmhub_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Shared secret for WebSocket session tokens. Empty means a random
    /// secret is generated at startup, which invalidates tokens on restart.
    #[serde(default)]
    pub token_secret: String,
}

/// Tunables for the room hub.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Outbound frames buffered per connection. A connection whose queue is
    /// full when a broadcast arrives is evicted from its room.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Largest accepted chat message, in bytes.
    #[serde(default = "default_max_chat_message_len")]
    pub max_chat_message_len: usize,

    /// Name shown for users without an identity or a name of their own.
    #[serde(default = "default_guest_label")]
    pub guest_label: String,

    /// Avatar URLs containing this marker are the stock placeholder and are
    /// sent to clients as `null`.
    #[serde(default = "default_avatar_placeholder_marker")]
    pub avatar_placeholder_marker: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Rooms idle for longer than this are deleted. `0` disables the sweeper.
    #[serde(default = "default_stale_room_after_secs")]
    pub stale_room_after_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub interval_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    "filmhub.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_max_chat_message_len() -> usize {
    65_536
}

fn default_guest_label() -> String {
    filmhub_types::GUEST_LABEL.to_string()
}

fn default_avatar_placeholder_marker() -> String {
    "default".to_string()
}

fn default_stale_room_after_secs() -> u64 {
    24 * 60 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    60 * 60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_chat_message_len: default_max_chat_message_len(),
            guest_label: default_guest_label(),
            avatar_placeholder_marker: default_avatar_placeholder_marker(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            stale_room_after_secs: default_stale_room_after_secs(),
            interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl DatabaseConfig {
    pub fn runtime_settings(&self) -> filmhub_db::DbRuntimeSettings {
        filmhub_db::DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults when the
/// file does not exist.
///
/// Environment variable overrides:
/// - `FILMHUB_HOST` overrides `server.host`
/// - `FILMHUB_PORT` overrides `server.port`
/// - `FILMHUB_DB_PATH` overrides `database.path`
/// - `FILMHUB_LOG_LEVEL` overrides `logging.level`
/// - `FILMHUB_LOG_JSON` overrides `logging.json` ("true" or "1" to enable)
/// - `FILMHUB_TOKEN_SECRET` overrides `auth.token_secret`
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => parse_config(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Parses configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(contents)?)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("FILMHUB_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = host;
    }
    if let Some(port) = var("FILMHUB_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = port;
    }
    if let Some(db_path) = var("FILMHUB_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("FILMHUB_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("FILMHUB_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(secret) = var("FILMHUB_TOKEN_SECRET") {
        config.auth.token_secret = secret;
    }
}
