//! Command line and file configuration.

use crate::error::{AppError, AppResult};
use clap::Parser;
use delayer_ws::{ConnectionConfig, Endpoint};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default config file, read only if present.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "FEED_DELAYER_CONFIG";

/// Relay a tick feed to stdout with a fixed delay.
#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = None,
    after_help = "Example:\n    feed-delayer 60 R_100"
)]
pub struct Args {
    /// Delay in seconds (non-negative integer)
    #[arg(
        value_name = "DELAY_IN_SECONDS",
        value_parser = parse_delay,
        allow_hyphen_values = true
    )]
    pub delay: u64,

    /// Symbol to subscribe to
    #[arg(value_name = "SYMBOL_NAME")]
    pub symbol: String,

    /// Configuration file path (can also be set via FEED_DELAYER_CONFIG env var)
    #[arg(short, long)]
    pub config: Option<String>,
}

/// Parse a delay argument.
///
/// Only plain decimal digits are accepted (surrounding whitespace ignored);
/// signs, fractions and trailing text are rejected.
pub fn parse_delay(raw: &str) -> AppResult<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::InvalidDelay(raw.to_string()));
    }
    trimmed
        .parse()
        .map_err(|_| AppError::InvalidDelay(raw.to_string()))
}

/// What the process does once the transport is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Drain pending emissions, then exit with failure.
    #[default]
    Exit,
    /// Drain pending emissions, then stay alive and idle until interrupted.
    Stall,
}

/// WebSocket transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// User-Agent sent on the upgrade request.
    pub user_agent: String,
    /// TCP connect timeout (ms).
    pub connect_timeout_ms: u64,
    /// TLS handshake timeout (ms).
    pub tls_timeout_ms: u64,
    /// WebSocket upgrade timeout (ms).
    pub handshake_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            user_agent: defaults.user_agent,
            connect_timeout_ms: defaults.connect_timeout_ms,
            tls_timeout_ms: defaults.tls_timeout_ms,
            handshake_timeout_ms: defaults.handshake_timeout_ms,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Log filter used when RUST_LOG is unset.
    pub log_level: String,
    /// Statistics summary interval (seconds). 0 disables.
    pub stats_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stats_interval_secs: 60,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Behaviour after a transport failure.
    pub on_transport_failure: FailurePolicy,
    /// Upstream feed endpoint.
    pub endpoint: Endpoint,
    /// Transport settings.
    pub websocket: WsConfig,
    /// Logging and statistics.
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Path precedence: `cli_path` > `FEED_DELAYER_CONFIG` > default path. An
    /// explicitly named file must exist; a missing default file yields the
    /// built-in defaults. Returns the path actually read, if any.
    pub fn load(cli_path: Option<String>) -> AppResult<(Self, Option<String>)> {
        let explicit = cli_path.or_else(|| std::env::var(CONFIG_ENV_VAR).ok());

        let path = match explicit {
            Some(path) => path,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => DEFAULT_CONFIG_PATH.to_string(),
            None => return Ok((Self::default(), None)),
        };

        let config = Self::from_file(&path)?;
        Ok((config, Some(path)))
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.endpoint.host.trim().is_empty() {
            return Err(AppError::Config("endpoint.host is empty".to_string()));
        }
        if self.endpoint.port == 0 {
            return Err(AppError::Config("endpoint.port must be non-zero".to_string()));
        }
        if !self.endpoint.path.starts_with('/') {
            return Err(AppError::Config(format!(
                "endpoint.path must start with '/': {}",
                self.endpoint.path
            )));
        }
        let ws = &self.websocket;
        if ws.connect_timeout_ms == 0 || ws.tls_timeout_ms == 0 || ws.handshake_timeout_ms == 0 {
            return Err(AppError::Config(
                "websocket timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Transport configuration for the handshake sequencer.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            endpoint: self.endpoint.clone(),
            user_agent: self.websocket.user_agent.clone(),
            connect_timeout_ms: self.websocket.connect_timeout_ms,
            tls_timeout_ms: self.websocket.tls_timeout_ms,
            handshake_timeout_ms: self.websocket.handshake_timeout_ms,
        }
    }
}
