//! Exponential backoff with jitter
//!
//! The delay before retry `attempt` (zero-based, counting the attempt that just
//! failed) is `min(base_delay * multiplier^attempt, max_delay)`. With jitter
//! enabled a uniform offset within +/-25% of that value is added and the
//! result clamped at zero.

use rand::Rng;
use std::time::Duration;

use crate::config::{RetryConfig, RETRY_JITTER_RATIO};

/// Backoff schedule derived from a [`RetryConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, multiplier: f64, jitter: bool) -> Self {
        Self {
            base,
            max,
            multiplier,
            jitter,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.base_delay,
            config.max_delay,
            config.backoff_multiplier,
            config.jitter_enabled,
        )
    }

    /// Capped exponential delay before jitter
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powf(attempt as f64);
        let nanos = self.base.as_nanos() as f64 * factor;

        if !nanos.is_finite() || nanos >= self.max.as_nanos() as f64 {
            return self.max;
        }
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }

    /// Delay to sleep before the next attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Delay using the supplied random source
    pub fn delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal(attempt);
        if !self.jitter || nominal.is_zero() {
            return nominal;
        }

        let offset = rng.gen_range(-RETRY_JITTER_RATIO..=RETRY_JITTER_RATIO);
        let jittered = nominal.as_nanos() as f64 * (1.0 + offset);
        Duration::from_nanos(jittered.max(0.0).round() as u64)
    }
}
