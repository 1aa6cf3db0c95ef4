//! Sliding-window rate limiter
//!
//! Two limits share one rolling one-second window of admitted timestamps:
//!
//! - `burst_limit` is a hard ceiling. A call arriving while the window already
//!   holds that many admissions is rejected and never admitted.
//! - `requests_per_second` is a pacing target. A call that pushes the window
//!   past it is admitted, then delayed until the oldest admission leaves the
//!   window.
//!
//! The read-filter-append sequence happens under a single lock acquisition;
//! the pacing delay is taken after the lock is released.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::clock::{Clock, Instant};
use crate::config::{RateLimitConfig, RATE_LIMIT_WINDOW};
use crate::error::{ApiError, ErrorKind};

/// Outcome of a single admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted, proceed immediately
    Immediate,
    /// Admitted, proceed after the delay
    Delayed(Duration),
    /// Rejected at the burst ceiling
    Rejected,
}

pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    window: Mutex<VecDeque<Instant>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("in_window", &self.in_window())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            window: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until the caller may proceed, or fail with a [`ErrorKind::BurstLimit`] error
    pub async fn check_limit(&self) -> Result<(), ApiError> {
        match self.admit() {
            Admission::Immediate => Ok(()),
            Admission::Delayed(wait) => {
                debug!("Rate limiter '{}' pacing call by {:?}", self.name, wait);
                self.clock.sleep(wait).await;
                Ok(())
            }
            Admission::Rejected => Err(ApiError::new(
                ErrorKind::BurstLimit,
                format!(
                    "Burst limit of {} requests per second exceeded for {}",
                    self.config.burst_limit, self.name
                ),
            )),
        }
    }

    /// Make the admission decision without waiting
    pub fn admit(&self) -> Admission {
        let now = self.clock.now();
        let mut window = self.window.lock();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) < RATE_LIMIT_WINDOW {
                break;
            }
            window.pop_front();
        }

        if window.len() >= self.config.burst_limit as usize {
            debug!(
                "Rate limiter '{}' rejected call, {} admitted in window",
                self.name,
                window.len()
            );
            return Admission::Rejected;
        }

        window.push_back(now);

        if window.len() <= self.config.requests_per_second as usize {
            return Admission::Immediate;
        }

        let oldest = window.front().copied().unwrap_or(now);
        let wait = RATE_LIMIT_WINDOW.saturating_sub(now.duration_since(oldest));
        if wait.is_zero() {
            Admission::Immediate
        } else {
            Admission::Delayed(wait)
        }
    }

    /// Admissions currently inside the rolling window
    pub fn in_window(&self) -> usize {
        let now = self.clock.now();
        self.window
            .lock()
            .iter()
            .filter(|at| now.duration_since(**at) < RATE_LIMIT_WINDOW)
            .count()
    }

    pub fn reset(&self) {
        self.window.lock().clear();
    }
}
