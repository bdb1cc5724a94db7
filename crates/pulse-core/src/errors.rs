//! Error taxonomy for the progress client.
//!
//! Every failure the client can report is a [`ProgressError`] variant. The
//! variants are cheap to clone so the connection manager can hand the same
//! error to a subscriber and to its own logging.
//!
//! Nothing here is fatal to the host process: the worst outcome is "stop
//! retrying and let the caller decide", signalled by
//! [`ProgressError::is_terminal`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// ErrorCategory
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse classification used for logging and retry decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad caller input.
    Validation,
    /// Malformed inbound frame.
    Decode,
    /// Low-level connection failure.
    Transport,
    /// Liveness probe went unanswered.
    Liveness,
    /// Server signalled the job no longer exists.
    Terminal,
    /// Reconnect budget exhausted.
    Exhausted,
    /// HTTP restart trigger failed.
    Restart,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Decode => "decode",
            Self::Transport => "transport",
            Self::Liveness => "liveness",
            Self::Terminal => "terminal",
            Self::Exhausted => "exhausted",
            Self::Restart => "restart",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProgressError
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by the progress client.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProgressError {
    /// The document id was empty, non-finite, or missing. No connection
    /// was attempted.
    #[error("invalid document id {value}: cannot open progress stream")]
    InvalidIdentifier {
        /// Rendering of the rejected value.
        value: String,
    },

    /// An inbound frame was not valid JSON or not a progress object. The
    /// connection stays open.
    #[error("failed to decode progress frame: {message}")]
    MessageDecode {
        /// Decoder message.
        message: String,
    },

    /// The transport failed to open or errored while open.
    #[error("progress stream error at {url}: {message}")]
    Transport {
        /// Streaming URL.
        url: String,
        /// Underlying error message.
        message: String,
    },

    /// No liveness was observed within the heartbeat timeout.
    #[error("no heartbeat response within {timeout_ms}ms")]
    HeartbeatTimeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The server closed the stream with a code that means the job or
    /// session is gone.
    #[error(
        "progress stream closed permanently (code {code}): {reason}; restart the analysis to continue"
    )]
    TerminalClose {
        /// WebSocket close code.
        code: u16,
        /// Close reason (server supplied or default).
        reason: String,
    },

    /// Reconnect attempts ran out.
    #[error("gave up reconnecting after {attempts} attempts; check the network and reconnect")]
    MaxAttemptsExceeded {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The HTTP restart trigger failed.
    #[error("restart request failed: {detail}")]
    RestartRequestFailed {
        /// HTTP status, if a response arrived.
        status: Option<u16>,
        /// Server `detail` or a generic message.
        detail: String,
    },
}

impl ProgressError {
    /// Error category for classification.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidIdentifier { .. } => ErrorCategory::Validation,
            Self::MessageDecode { .. } => ErrorCategory::Decode,
            Self::Transport { .. } => ErrorCategory::Transport,
            Self::HeartbeatTimeout { .. } => ErrorCategory::Liveness,
            Self::TerminalClose { .. } => ErrorCategory::Terminal,
            Self::MaxAttemptsExceeded { .. } => ErrorCategory::Exhausted,
            Self::RestartRequestFailed { .. } => ErrorCategory::Restart,
        }
    }

    /// Whether the connection will stay down until the caller connects
    /// again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier { .. }
                | Self::TerminalClose { .. }
                | Self::MaxAttemptsExceeded { .. }
        )
    }

    /// Whether the manager answers this error with a reconnect cycle.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::HeartbeatTimeout { .. })
    }
}

impl From<serde_json::Error> for ProgressError {
    fn from(err: serde_json::Error) -> Self {
        Self::MessageDecode {
            message: err.to_string(),
        }
    }
}

/// Result type for progress client operations.
pub type Result<T> = std::result::Result<T, ProgressError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
