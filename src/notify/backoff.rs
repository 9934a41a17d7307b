//! Reconnect delay schedule.

use std::time::Duration;

use crate::config::RetrySettings;

/// Exponential backoff with a hard cap on the delay.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before the given attempt (1-based): `base * 2^(attempt - 1)`,
    /// saturating at the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let millis = self.base.as_millis().saturating_mul(1u128 << exponent);
        Duration::from_millis(millis.min(self.cap.as_millis()) as u64)
    }
}

impl From<&RetrySettings> for Backoff {
    fn from(settings: &RetrySettings) -> Self {
        Backoff::new(
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        )
    }
}
