//! Retry schedule for failed publishes.

use std::time::Duration;

/// Exponential backoff with a cap.
///
/// The delay before attempt `n + 1` is `base_delay * 2^(n - 1)`, never more than
/// `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// A record is parked as failed once its attempts exceed this.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Returns true once `attempts` failures exceed the policy.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts > self.max_attempts
    }

    /// Attempt limit for reviving parked failures; always above `max_attempts`.
    pub fn retry_ceiling(&self) -> u32 {
        self.max_attempts.saturating_mul(2).max(self.max_attempts.saturating_add(1))
    }
}
