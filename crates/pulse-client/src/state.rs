//! Observable connection state.

use std::fmt;

use pulse_core::DocumentId;
use serde::Serialize;

/// Lifecycle state of a manager's single connection.
///
/// `Idle → Connecting → Open → Closing → Idle`, with `Reconnecting`
/// re-entering `Connecting` once the backoff delay elapses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No handle, nothing scheduled.
    #[default]
    Idle,
    /// A transport open is in flight.
    Connecting,
    /// The transport is open and the heartbeat runs.
    Open,
    /// Waiting out a backoff delay before the next open.
    Reconnecting,
    /// Tearing the handle down.
    Closing,
}

impl ConnectionState {
    /// Whether a handle exists or a reconnect is scheduled.
    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a manager's state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ManagerSnapshot {
    /// Subscribed document, if any.
    pub document_id: Option<DocumentId>,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Whether the transport is open.
    pub is_connected: bool,
    /// Whether the last teardown was requested by the caller.
    pub is_manually_disconnected: bool,
    /// Reconnect attempts made since the last successful open.
    pub reconnect_attempts: u32,
    /// Generation of the current (or last) handle.
    pub generation: u64,
    /// Heartbeat tasks currently alive.
    pub active_heartbeats: usize,
}
