//! Package-level and protocol constants.

/// Current version of the Pulse client (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "pulse";

/// Path prefix of the per-document progress stream.
pub const ANALYSIS_STREAM_PATH: &str = "/ws/analysis";

/// WebSocket close code for a normal, client-initiated close.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code reported when a close frame carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// WebSocket close code used when the stream ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Application close code the server sends when the document or session
/// no longer exists.
pub const CLOSE_SESSION_EXPIRED: u16 = 4001;

/// Close codes after which reconnecting is pointless.
pub const DEFAULT_TERMINAL_CLOSE_CODES: [u16; 2] = [CLOSE_NO_STATUS, CLOSE_SESSION_EXPIRED];

/// Reason reported for a terminal close that arrived without one.
pub const DEFAULT_TERMINAL_REASON: &str = "document not found or session expired";
