//! Bounded exponential backoff for transient stream-read failures.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff policy applied between read attempts.
///
/// The delay before retry `n` (zero-based) is `base_interval * 2^n`, capped
/// at `max_interval`. At most `max_retries` retries are made for a single
/// read before the consumer gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_interval: Duration,
    /// Upper bound for any single delay.
    pub max_interval: Duration,
    /// Retries allowed per read. 0 disables retrying.
    pub max_retries: u32,
    /// Randomize each delay within `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            max_retries: 5,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Whether another retry is allowed after `retries_so_far` retries.
    #[must_use]
    pub fn allows(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// Delay to wait before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self
            .base_interval
            .checked_mul(factor)
            .unwrap_or(self.max_interval)
            .min(self.max_interval);

        if self.jitter && !delay.is_zero() {
            let half = delay / 2;
            let spread = rand::rng().random_range(0..=half.as_millis().max(1));
            #[allow(clippy::cast_possible_truncation)]
            let spread = Duration::from_millis(spread as u64);
            half + spread.min(half)
        } else {
            delay
        }
    }
}
