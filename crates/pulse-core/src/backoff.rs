//! Reconnect backoff configuration and delay calculation.
//!
//! Provides the types and math for reconnect scheduling. The async side
//! (sleeping, cancelling, drawing random numbers) lives in `pulse-client`;
//! this module only contains the portable building blocks:
//!
//! - [`BackoffConfig`]: attempt budget, base/cap delays, jitter width
//! - [`calculate_backoff_delay`]: capped exponential delay
//! - [`calculate_backoff_delay_with_random`]: the same plus additive jitter

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default reconnect attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 3000;
/// Default delay cap in milliseconds (before jitter).
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter width in milliseconds.
pub const DEFAULT_JITTER_MS: u64 = 1000;

/// Reconnect backoff parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Maximum number of reconnect attempts (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff in ms (default: 3000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the exponential part in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Width of the uniform jitter added on top, in ms (default: 1000).
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_ms() -> u64 {
    DEFAULT_JITTER_MS
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_ms: DEFAULT_JITTER_MS,
        }
    }
}

impl BackoffConfig {
    /// Half-open range `[low, high)` of delays for a zero-based attempt.
    #[must_use]
    pub fn delay_bounds_ms(&self, attempt: u32) -> (u64, u64) {
        let low = calculate_backoff_delay(attempt, self.base_delay_ms, self.max_delay_ms);
        (low, low.saturating_add(self.jitter_ms.max(1)))
    }

    /// Delay for a zero-based attempt given `random` in `[0.0, 1.0)`.
    #[must_use]
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> Duration {
        Duration::from_millis(calculate_backoff_delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_ms,
            random,
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Capped exponential delay: `min(max_delay, base_delay * 2^attempt)`.
///
/// `attempt` is zero-based (0 for the first retry). Large attempts saturate
/// instead of overflowing.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    exponential.min(max_delay_ms)
}

/// Capped exponential delay plus additive jitter.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG; the result lies
/// in `[capped, capped + jitter_ms)`. Out-of-range or `NaN` inputs are
/// clamped.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_ms: u64,
    random: f64,
) -> u64 {
    let capped = calculate_backoff_delay(attempt, base_delay_ms, max_delay_ms);
    let random = if random.is_nan() {
        0.0
    } else {
        random.clamp(0.0, 1.0)
    };
    let jitter = ((jitter_ms as f64) * random).floor() as u64;
    capped.saturating_add(jitter.min(jitter_ms.saturating_sub(1)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
