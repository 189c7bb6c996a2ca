//! ABOUTME: Exponential backoff with bounded jitter for reconnection
//! ABOUTME: Jitter avoids synchronized retry storms across instances

use rand::Rng;
use std::time::Duration;

use crate::settings::ReconnectionConfig;

/// Computes the delay before each reconnection attempt.
///
/// `delay(n) = min(base * multiplier^n, max) + uniform(0, jitter)`.
/// Pre-jitter delays grow monotonically and saturate at `max_delay_ms`.
#[derive(Debug, Clone)]
pub struct ReconnectionPolicy {
    config: ReconnectionConfig,
}

impl ReconnectionPolicy {
    pub fn new(config: ReconnectionConfig) -> Self {
        Self { config }
    }

    /// Deterministic part of the delay for a given attempt (0-based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = self.config.backoff_multiplier.powi(attempt as i32);
        let delay_ms = (self.config.base_delay_ms as f64 * exponent)
            .min(self.config.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Full delay including a fresh jitter sample
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = if self.config.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        self.base_delay(attempt) + Duration::from_millis(jitter_ms)
    }
}
