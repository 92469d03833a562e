//! Reconnect backoff with jitter

use chat_common::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Spacing between failed reconnect attempts
///
/// The first attempt of every reconnect cycle is immediate; this policy only
/// spaces the retries after it. There is no attempt cap.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth per failed attempt
    pub backoff_factor: f64,
    /// Upper bound of the random extra delay, as a fraction of the computed delay
    pub jitter: f64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
            jitter: config.jitter,
        }
    }
}

impl ReconnectBackoff {
    /// Retry with no delay at all
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `attempt` (0-indexed)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let capped_ms = (base_ms * self.backoff_factor.powi(exponent))
            .min(self.max_delay.as_millis() as f64);

        let jitter_ms = if self.jitter > 0.0 && capped_ms > 0.0 {
            capped_ms * self.jitter * rand::thread_rng().gen::<f64>()
        } else {
            0.0
        };
        Duration::from_millis((capped_ms + jitter_ms) as u64)
    }
}
