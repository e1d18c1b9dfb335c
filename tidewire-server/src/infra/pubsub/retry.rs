//! Bounded retry schedule shared by the task publisher and broker connects.
//!
//! The delay before retry `n` (0-indexed) is `first × factor^n`, clamped to
//! `max`. A factor of `1.0` gives the fixed delay the publisher uses by default.

use std::time::Duration;

use tidewire_config::{ConnectionRetry, PublisherConfig};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PublisherConfig::default())
    }
}

impl From<&PublisherConfig> for RetryPolicy {
    fn from(config: &PublisherConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            first: config.retry_delay,
            max: config.max_delay.max(config.retry_delay),
            factor: config.backoff_factor,
        }
    }
}

impl From<&ConnectionRetry> for RetryPolicy {
    fn from(config: &ConnectionRetry) -> Self {
        Self {
            max_retries: u32::try_from(config.retries).unwrap_or(u32::MAX),
            first: config.backoff_base,
            max: config.backoff_max.max(config.backoff_base),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            first: delay,
            max: delay,
            factor: 1.0,
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait before retry `retry` (0 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}
