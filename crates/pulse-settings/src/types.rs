//! Settings type definitions.
//!
//! Field names are `snake_case` so that the JSON file and the `PULSE_*`
//! environment keys (`PULSE_CONNECTION__HEARTBEAT_INTERVAL_MS`) name the
//! same thing. Every section implements [`Default`] with production values
//! and is marked `#[serde(default)]` so partial JSON works.

use pulse_core::backoff::BackoffConfig;
use pulse_core::constants::DEFAULT_TERMINAL_CLOSE_CODES;
use pulse_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// # JSON Format
///
/// ```json
/// {
///   "api": { "base_url": "https://analysis.example.com/api" },
///   "connection": { "reconnect": { "max_attempts": 8 } }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseSettings {
    /// Settings schema version.
    pub version: String,
    /// Backend HTTP settings.
    pub api: ApiSettings,
    /// Progress stream behavior.
    pub connection: ConnectionSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for PulseSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            api: ApiSettings::default(),
            connection: ConnectionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl PulseSettings {
    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("api.base_url is empty".into()));
        }
        if self.api.request_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "api.request_timeout_ms must be positive".into(),
            ));
        }
        let conn = &self.connection;
        if conn.heartbeat_interval_ms == 0 || conn.heartbeat_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "connection heartbeat interval and timeout must be positive".into(),
            ));
        }
        if conn.heartbeat_timeout_ms < conn.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "connection.heartbeat_timeout_ms ({}) is shorter than heartbeat_interval_ms ({})",
                conn.heartbeat_timeout_ms, conn.heartbeat_interval_ms
            )));
        }
        if conn.throttle_window_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.throttle_window_ms must be positive".into(),
            ));
        }
        if conn.reconnect.base_delay_ms > conn.reconnect.max_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "connection.reconnect.base_delay_ms ({}) exceeds max_delay_ms ({})",
                conn.reconnect.base_delay_ms, conn.reconnect.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Backend HTTP settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// HTTP base address of the analysis backend. The streaming address is
    /// derived from it.
    pub base_url: String,
    /// Timeout for HTTP requests (restart trigger) in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

/// Progress stream behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Interval between heartbeat probes in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// How long an unanswered probe may stay unanswered, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Minimum spacing between progress deliveries in milliseconds.
    pub throttle_window_ms: u64,
    /// Close codes that end reconnection immediately.
    pub terminal_close_codes: Vec<u16>,
    /// Reconnect backoff.
    pub reconnect: BackoffConfig,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 60_000,
            heartbeat_timeout_ms: 180_000,
            throttle_window_ms: 100,
            terminal_close_codes: DEFAULT_TERMINAL_CLOSE_CODES.to_vec(),
            reconnect: BackoffConfig::default(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
