//! Reconnect decisions.
//!
//! The policy is pure: it looks at the attempt counter and the reason the
//! connection went away, and returns what the manager should do. The
//! manager owns the counter and applies the decision.

use std::time::Duration;

use pulse_core::ProgressError;
use pulse_core::backoff::BackoffConfig;
use pulse_core::constants::{DEFAULT_TERMINAL_CLOSE_CODES, DEFAULT_TERMINAL_REASON};

/// Why the current connection went away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureCause {
    /// The server (or the stream) closed the connection.
    Closed {
        /// Close code; `None` when the transport reported none.
        code: Option<u16>,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// The transport failed to open or errored while open.
    Transport {
        /// Underlying error message.
        message: String,
    },
    /// The heartbeat went unanswered.
    HeartbeatTimeout,
}

/// Terminal outcome of a [`ReconnectDecision`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The close code means the job or session is gone.
    TerminalClose {
        /// Close code.
        code: u16,
        /// Close reason, defaulted when the server sent none.
        reason: String,
    },
    /// The attempt budget is spent.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
}

impl StopReason {
    /// The error surfaced to the subscriber.
    #[must_use]
    pub fn into_error(self) -> ProgressError {
        match self {
            Self::TerminalClose { code, reason } => ProgressError::TerminalClose { code, reason },
            Self::Exhausted { attempts } => ProgressError::MaxAttemptsExceeded { attempts },
        }
    }
}

/// What to do after a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Open again after `delay`.
    Retry {
        /// Zero-based attempt index the delay was computed for.
        attempt: u32,
        /// Backoff delay including jitter.
        delay: Duration,
    },
    /// Do not reconnect.
    Stop(StopReason),
}

/// Bounded exponential backoff with terminal close codes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    backoff: BackoffConfig,
    terminal_codes: Vec<u16>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default(), DEFAULT_TERMINAL_CLOSE_CODES.to_vec())
    }
}

impl ReconnectPolicy {
    /// Create a policy.
    pub fn new(backoff: BackoffConfig, terminal_codes: Vec<u16>) -> Self {
        Self {
            backoff,
            terminal_codes,
        }
    }

    /// Backoff parameters.
    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Attempt budget.
    pub fn max_attempts(&self) -> u32 {
        self.backoff.max_attempts
    }

    /// Whether `code` ends reconnection regardless of remaining attempts.
    pub fn is_terminal_code(&self, code: u16) -> bool {
        self.terminal_codes.contains(&code)
    }

    /// Decide using a fresh random jitter draw.
    pub fn decide(&self, attempts: u32, cause: &FailureCause) -> ReconnectDecision {
        self.decide_with_random(attempts, cause, rand::random::<f64>())
    }

    /// Decide with a caller-supplied `random` in `[0.0, 1.0)`.
    ///
    /// `attempts` is the number of reconnects already scheduled since the
    /// last successful open; the returned retry is for attempt index
    /// `attempts`.
    pub fn decide_with_random(
        &self,
        attempts: u32,
        cause: &FailureCause,
        random: f64,
    ) -> ReconnectDecision {
        if let FailureCause::Closed {
            code: Some(code),
            reason,
        } = cause
        {
            if self.is_terminal_code(*code) {
                let reason = if reason.trim().is_empty() {
                    DEFAULT_TERMINAL_REASON.to_owned()
                } else {
                    reason.clone()
                };
                return ReconnectDecision::Stop(StopReason::TerminalClose {
                    code: *code,
                    reason,
                });
            }
        }

        if attempts >= self.backoff.max_attempts {
            return ReconnectDecision::Stop(StopReason::Exhausted { attempts });
        }

        ReconnectDecision::Retry {
            attempt: attempts,
            delay: self.backoff.delay_with_random(attempts, random),
        }
    }
}
