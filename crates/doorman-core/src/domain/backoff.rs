//! Backoff policy: decides retry delays.

use std::time::Duration;

/// Exponent at which exponential growth saturates.
///
/// 30s * 2^20 is roughly a year; anything larger stops being a useful
/// schedule and risks overflowing timestamp arithmetic.
const MAX_EXPONENT: u32 = 20;

/// Exponential backoff applied between a `Retry` outcome and the next
/// eligible run: `initial * 2^(attempts - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial_delay: Duration,
}

impl BackoffPolicy {
    pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(30);

    pub fn exponential(initial_delay: Duration) -> Self {
        Self { initial_delay }
    }

    /// Delay before the next run, given the attempt count *after* the failure
    /// was recorded (1 for the first failure).
    ///
    /// With the default 30s exponential policy:
    /// - attempt 1: 30s
    /// - attempt 2: 60s
    /// - attempt 3: 120s
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = (attempts.max(1) - 1).min(MAX_EXPONENT);
        self.initial_delay.saturating_mul(1 << exponent)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Self::DEFAULT_INITIAL_DELAY)
    }
}
