//! Retry budget and exponential backoff with additive jitter.

use std::time::Duration;

/// Status codes eligible for retry.
pub const RETRY_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Whether an HTTP status is in the retry-eligible set.
pub fn is_retryable_status(status: u16) -> bool {
    RETRY_STATUS_CODES.contains(&status)
}

/// Retry budget and backoff curve for one operation class.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial try.
    pub attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Additive jitter as a fraction of the computed delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Backoff for a given attempt number (1-based), without jitter:
    /// `min(base · 2^(attempt-1), max)`.
    ///
    /// This is the value reported to clients in RETRYING_CHUNK; the actual
    /// sleep adds jitter on top, so the delay is never shorter than the
    /// reported one.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63);
        let millis = self
            .base_delay
            .as_millis()
            .saturating_mul(1u128 << exp)
            .min(self.max_delay.as_millis());
        Duration::from_millis(millis as u64)
    }

    /// Backoff with additive jitter in `[0, jitter_factor · delay)`,
    /// de-synchronizing concurrent part retries.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter_factor <= 0.0 {
            return base;
        }
        let unit = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64)
            / (u32::MAX as f64); // [0.0, 1.0)
        base + Duration::from_secs_f64(base.as_secs_f64() * self.jitter_factor * unit)
    }
}
