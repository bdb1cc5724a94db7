//! Runtime configuration injected into a [`ConnectionManager`](crate::ConnectionManager).

use std::time::Duration;

use pulse_core::backoff::BackoffConfig;
use pulse_settings::PulseSettings;

/// Everything the manager and its collaborators need, in runtime units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// HTTP base address of the analysis backend.
    pub api_base_url: String,
    /// Timeout for the restart request.
    pub request_timeout: Duration,
    /// Interval between heartbeat probes.
    pub heartbeat_interval: Duration,
    /// Time an unanswered probe may stay unanswered.
    pub heartbeat_timeout: Duration,
    /// Minimum spacing between progress deliveries.
    pub throttle_window: Duration,
    /// Reconnect backoff parameters.
    pub backoff: BackoffConfig,
    /// Close codes that end reconnection immediately.
    pub terminal_close_codes: Vec<u16>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&PulseSettings::default())
    }
}

impl From<&PulseSettings> for ClientConfig {
    fn from(settings: &PulseSettings) -> Self {
        let conn = &settings.connection;
        Self {
            api_base_url: settings.api.base_url.clone(),
            request_timeout: Duration::from_millis(settings.api.request_timeout_ms),
            heartbeat_interval: Duration::from_millis(conn.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(conn.heartbeat_timeout_ms),
            throttle_window: Duration::from_millis(conn.throttle_window_ms),
            backoff: conn.reconnect.clone(),
            terminal_close_codes: conn.terminal_close_codes.clone(),
        }
    }
}

impl ClientConfig {
    /// Replace the backend base address.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}
