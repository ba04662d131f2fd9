//! Backoff and give-up policy for failing ticks.

use std::time::Duration;

/// How a timer reacts to consecutive tick failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Double the delay after each consecutive failure.
    pub backoff: bool,
    /// Ceiling for backed-off delays. Never shortens the base interval.
    pub max_backoff: Duration,
    /// Stop ticking after this many consecutive failures. `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: true,
            max_backoff: Duration::from_secs(600),
            max_consecutive_failures: None,
        }
    }
}

impl RetryPolicy {
    /// Plain fixed-interval retries, no cutoff.
    pub fn fixed() -> Self {
        Self {
            backoff: false,
            ..Self::default()
        }
    }

    /// Delay before the next tick after `failures` consecutive failures.
    pub fn next_delay(&self, interval: Duration, failures: u32) -> Duration {
        if !self.backoff || failures == 0 {
            return interval;
        }
        let cap = self.max_backoff.max(interval);
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        interval.checked_mul(factor).unwrap_or(cap).min(cap)
    }

    /// Check if the timer should stop after `failures` consecutive failures.
    pub fn should_give_up(&self, failures: u32) -> bool {
        self.max_consecutive_failures
            .is_some_and(|max| failures >= max)
    }
}
