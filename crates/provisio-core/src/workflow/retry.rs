//! Attempt bookkeeping and linear backoff.
//!
//! Shared by the step-level retry loop in the executor and the call-level
//! retry loop in the resilient client. Both loops are explicit attempt
//! counters; this module only answers "may I try again" and "how long to wait".

use std::time::Duration;

/// Delay before the retry that follows failed attempt `attempt` (1-based).
///
/// `base × attempt`: with a base of 1s the waits are 1s, 2s, 3s, ...
pub fn linear_backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.max(1))
}

/// Retry limits for one retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first. Never below 1.
    pub max_attempts: u32,
    /// Base delay of the linear backoff.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Whether another attempt is allowed after failed attempt `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Wait to apply after failed attempt `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        linear_backoff(self.base_delay, attempt)
    }
}
