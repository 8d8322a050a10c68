//! TOML Configuration File Support
//!
//! Centralized configuration loading for the relay client, from a TOML
//! file at `~/.config/relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`RELAY_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! tenant = "acme"
//!
//! [connection]
//! connect_timeout_ms = 10000
//! reconnect_attempts = 5
//! reconnect_base_delay_ms = 1000
//! reconnect_max_delay_ms = 30000
//!
//! [rooms]
//! ack_timeout_ms = 5000
//! settle_delay_ms = 200
//!
//! [streams]
//! liveness_window_ms = 45000
//!
//! [transport]
//! kind = "unix_socket"
//! socket_path = "/run/user/1000/relay/push.sock"
//!
//! [submission]
//! api_url = "https://assist.example.com/api"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::ClientOptions;
use crate::connection::ConnectionConfig;
use crate::ids::TenantId;
use crate::rooms::RoomConfig;
use crate::streaming::StreamConfig;
use crate::submission::SubmissionConfig;
use crate::transport::{TransportConfig, TransportType};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Connection section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionToml {
    /// Handshake timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Whether to reconnect after an unexpected closure
    pub reconnect: Option<bool>,
    /// Reconnect attempts before giving up
    pub reconnect_attempts: Option<u32>,
    /// First reconnect delay in milliseconds
    pub reconnect_base_delay_ms: Option<u64>,
    /// Reconnect delay cap in milliseconds
    pub reconnect_max_delay_ms: Option<u64>,
    /// Add jitter to reconnect delays
    pub reconnect_jitter: Option<bool>,
}

/// Rooms section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsToml {
    /// Join acknowledgement timeout in milliseconds
    pub ack_timeout_ms: Option<u64>,
    /// Pause after an unacknowledged join, in milliseconds
    pub settle_delay_ms: Option<u64>,
}

/// Streams section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsToml {
    /// Liveness window in milliseconds
    pub liveness_window_ms: Option<u64>,
}

/// Transport section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// `in_process`, `unix_socket`, or `websocket`
    pub kind: Option<String>,
    /// Unix socket path
    pub socket_path: Option<PathBuf>,
    /// WebSocket URL
    pub ws_url: Option<String>,
}

/// Submission section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionToml {
    /// API root URL
    pub api_url: Option<String>,
    /// Bearer token
    pub bearer_token: Option<String>,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Default tenant
    pub tenant: Option<String>,
    /// Connection configuration section
    pub connection: ConnectionToml,
    /// Rooms configuration section
    pub rooms: RoomsToml,
    /// Streams configuration section
    pub streams: StreamsToml,
    /// Transport configuration section
    pub transport: TransportToml,
    /// Submission configuration section
    pub submission: SubmissionToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the relay client
#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    /// Tenant to connect as
    pub tenant: Option<TenantId>,
    /// Connection lifecycle
    pub connection: ConnectionConfig,
    /// Room joins
    pub rooms: RoomConfig,
    /// Stream sessions
    pub streams: StreamConfig,
    /// Push channel transport
    pub transport: TransportConfig,
    /// Submission endpoints
    pub submission: SubmissionConfig,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            tenant: None,
            connection: ConnectionConfig::default(),
            rooms: RoomConfig::default(),
            streams: StreamConfig::default(),
            transport: default_transport(),
            submission: SubmissionConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

/// Local push relay where Unix sockets exist; in-process elsewhere
fn default_transport() -> TransportConfig {
    #[cfg(unix)]
    {
        TransportConfig::local()
    }
    #[cfg(not(unix))]
    {
        TransportConfig::default()
    }
}

impl RelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Options for [`StreamClient::new`](crate::client::StreamClient::new)
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            connection: self.connection.clone(),
            rooms: self.rooms.clone(),
            streams: self.streams.clone(),
        }
    }

    /// Reject values the client cannot work with
    ///
    /// # Errors
    ///
    /// `ValidationError` naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("connection.connect_timeout", self.connection.connect_timeout),
            ("rooms.ack_timeout", self.rooms.ack_timeout),
            ("streams.liveness_window", self.streams.liveness_window),
            ("submission.request_timeout", self.submission.request_timeout),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ValidationError(format!("{name} must be non-zero")));
        }

        let reconnect = &self.connection.reconnect;
        if reconnect.max_delay < reconnect.base_delay {
            return Err(ConfigError::ValidationError(
                "reconnect max delay is shorter than the base delay".into(),
            ));
        }
        if reconnect.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "reconnect multiplier must be at least 1.0".into(),
            ));
        }
        if self.submission.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError("submission API URL is empty".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/relay/relay.toml` or
/// `~/.config/relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("relay").join("relay.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the result fails validation. A missing config file is not an error.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |name| std::env::var(name).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// As [`load_config_from_path`].
pub fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<RelayConfig, ConfigError> {
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_config = read_toml(config_path)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

fn read_toml(path: &Path) -> Result<RelayToml, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) -> Result<(), ConfigError> {
    if let Some(tenant) = &toml.tenant {
        config.tenant = Some(tenant.as_str().into());
    }

    // Connection settings
    let reconnect = &mut config.connection.reconnect;
    if let Some(ms) = toml.connection.connect_timeout_ms {
        config.connection.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(enabled) = toml.connection.reconnect {
        reconnect.enabled = enabled;
    }
    if let Some(attempts) = toml.connection.reconnect_attempts {
        reconnect.max_attempts = attempts;
    }
    if let Some(ms) = toml.connection.reconnect_base_delay_ms {
        reconnect.base_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.connection.reconnect_max_delay_ms {
        reconnect.max_delay = Duration::from_millis(ms);
    }
    if let Some(jitter) = toml.connection.reconnect_jitter {
        reconnect.use_jitter = jitter;
    }

    // Room and stream settings
    if let Some(ms) = toml.rooms.ack_timeout_ms {
        config.rooms.ack_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.rooms.settle_delay_ms {
        config.rooms.settle_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.streams.liveness_window_ms {
        config.streams.liveness_window = Duration::from_millis(ms);
    }

    // Transport settings
    config.transport.transport = select_transport(
        &config.transport.transport,
        toml.transport.kind.as_deref(),
        toml.transport.socket_path.clone(),
        toml.transport.ws_url.clone(),
    )?;

    // Submission settings
    if let Some(url) = &toml.submission.api_url {
        config.submission.base_url = url.clone();
    }
    if toml.submission.bearer_token.is_some() {
        config.submission.bearer_token = toml.submission.bearer_token.clone();
    }
    if let Some(ms) = toml.submission.request_timeout_ms {
        config.submission.request_timeout = Duration::from_millis(ms);
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config(
    config: &mut RelayConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let millis = |name: &str| {
        env(name)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
    };
    let mut touched = false;

    if let Some(tenant) = env("RELAY_TENANT") {
        config.tenant = Some(tenant.into());
        touched = true;
    }
    if let Some(timeout) = millis("RELAY_CONNECT_TIMEOUT_MS") {
        config.connection.connect_timeout = timeout;
        touched = true;
    }
    if let Some(attempts) = env("RELAY_RECONNECT_ATTEMPTS").and_then(|v| v.parse::<u32>().ok()) {
        config.connection.reconnect.max_attempts = attempts;
        touched = true;
    }
    if let Some(timeout) = millis("RELAY_ACK_TIMEOUT_MS") {
        config.rooms.ack_timeout = timeout;
        touched = true;
    }
    if let Some(window) = millis("RELAY_LIVENESS_WINDOW_MS") {
        config.streams.liveness_window = window;
        touched = true;
    }
    if let Some(url) = env("RELAY_API_URL") {
        config.submission.base_url = url;
        touched = true;
    }
    if let Some(token) = env("RELAY_API_TOKEN") {
        config.submission.bearer_token = Some(token);
        touched = true;
    }

    let kind = env("RELAY_TRANSPORT");
    let socket = env("RELAY_SOCKET").map(PathBuf::from);
    let ws_url = env("RELAY_WS_URL");
    if kind.is_some() || socket.is_some() || ws_url.is_some() {
        config.transport.transport =
            select_transport(&config.transport.transport, kind.as_deref(), socket, ws_url)?;
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
    Ok(())
}

/// Resolve a transport from an optional kind plus optional endpoint
///
/// Without a kind, endpoint overrides apply to the current transport only.
fn select_transport(
    current: &TransportType,
    kind: Option<&str>,
    socket_path: Option<PathBuf>,
    ws_url: Option<String>,
) -> Result<TransportType, ConfigError> {
    let Some(kind) = kind else {
        return Ok(match current.clone() {
            #[cfg(unix)]
            TransportType::UnixSocket { path } => TransportType::UnixSocket {
                path: socket_path.or(path),
            },
            #[cfg(feature = "websocket")]
            TransportType::WebSocket { url } => TransportType::WebSocket {
                url: ws_url.unwrap_or(url),
            },
            other => other,
        });
    };

    match kind.to_lowercase().as_str() {
        "in_process" | "inprocess" => Ok(TransportType::InProcess),

        #[cfg(unix)]
        "unix_socket" | "unix" | "socket" => Ok(TransportType::UnixSocket { path: socket_path }),

        #[cfg(feature = "websocket")]
        "websocket" | "ws" => {
            let url = ws_url.ok_or_else(|| {
                ConfigError::ValidationError("websocket transport needs a URL".into())
            })?;
            Ok(TransportType::WebSocket { url })
        }

        other => {
            // Endpoints go unused on builds without the optional transports
            let _ = (&socket_path, &ws_url);
            Err(ConfigError::ValidationError(format!(
                "unsupported transport '{other}'"
            )))
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Tenant override
    pub tenant: Option<String>,
    /// Transport kind override
    pub transport: Option<String>,
    /// Socket path override
    pub socket_path: Option<PathBuf>,
    /// WebSocket URL override
    pub ws_url: Option<String>,
    /// Submission API URL override
    pub api_url: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set tenant override
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Set transport kind override
    #[must_use]
    pub fn with_transport(mut self, kind: impl Into<String>) -> Self {
        self.transport = Some(kind.into());
        self
    }

    /// Set socket path override
    #[must_use]
    pub fn with_socket_path(mut self, path: PathBuf) -> Self {
        self.socket_path = Some(path);
        self
    }

    /// Set WebSocket URL override
    #[must_use]
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Set submission API URL override
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.tenant.is_none()
            && self.transport.is_none()
            && self.socket_path.is_none()
            && self.ws_url.is_none()
            && self.api_url.is_none()
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// `ValidationError` for an unknown transport kind or an invalid result.
    pub fn apply(&self, config: &mut RelayConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }

        if let Some(tenant) = &self.tenant {
            config.tenant = Some(tenant.as_str().into());
        }
        if let Some(url) = &self.api_url {
            config.submission.base_url = url.clone();
        }
        config.transport.transport = select_transport(
            &config.transport.transport,
            self.transport.as_deref(),
            self.socket_path.clone(),
            self.ws_url.clone(),
        )?;

        config.source = ConfigSource::Cli;
        config.validate()
    }
}
