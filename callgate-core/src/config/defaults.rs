//! Default configuration values for Callgate
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Retry defaults
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_RETRY_JITTER: bool = true;
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;

/// Jitter band as a fraction of the computed delay, applied in both directions
pub const RETRY_JITTER_RATIO: f64 = 0.25;

// Circuit breaker defaults
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MONITORING_WINDOW_MS: u64 = 300_000;

/// Consecutive half-open successes needed to close the breaker
pub const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 2;

// Rate limiting defaults
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 10;
pub const DEFAULT_BURST_LIMIT: u32 = 20;

/// Width of the limiter's sliding window
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

// Batch defaults
pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;

// Health thresholds
pub const DEGRADED_SUCCESS_RATE: f64 = 0.8;

pub const DEFAULT_TIMEOUT_LABEL: &str = "Operation";

// Helper functions for Duration creation
pub const fn duration_ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
