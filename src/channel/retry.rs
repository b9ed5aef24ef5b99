//! Reconnect backoff policy.
//!
//! Delay for retry `n` (1-based) is `initial_backoff * 2^(n-1)`, capped at
//! `max_backoff`, optionally spread by a symmetric jitter. After
//! `max_retries` scheduled retries the policy yields `None` and the channel
//! gives up until the caller connects again.

use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Scheduled retries before `on_reconnect_failed` fires.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Jitter ratio (0.0..=1.0) applied to each delay. Zero disables it.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            jitter_ratio: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff delay for the given retry index (1-based).
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let multiplier = 1u32 << shift;
        let base = self
            .initial_backoff
            .checked_mul(multiplier)
            .unwrap_or(self.max_backoff);
        base.min(self.max_backoff)
    }

    /// Delay before retry `attempt`, or `None` once retries are exhausted.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        Some(self.with_jitter(self.backoff_delay(attempt)))
    }

    /// Apply jitter to a delay using a symmetric random range.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let millis = delay.as_millis() as f64;
        let spread = millis * ratio;
        let low = (millis - spread).max(0.0);
        let high = millis + spread;
        let sampled = if high <= low {
            low
        } else {
            rand::random::<f64>() * (high - low) + low
        };
        Duration::from_millis(sampled.round() as u64)
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
