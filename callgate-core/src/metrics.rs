//! Per-service call metrics
//!
//! One [`ApiMetrics`] record exists per service key. Every attempt made by the
//! orchestrator is folded in, so a failure the caller eventually sees is still
//! reflected here even when earlier attempts were retried.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ApiError;

/// Counters and rolling statistics for one service key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiMetrics {
    /// Attempts made, successful or not
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Retries scheduled after a failed attempt
    pub retry_attempts: u64,
    /// Times the service's breaker transitioned into Open
    pub circuit_breaker_trips: u64,
    /// Running mean over successful attempts only
    pub average_response_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ApiError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
}

impl ApiMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a successful attempt into the record
    pub fn record_success(&mut self, response_time: Duration, at: DateTime<Utc>) {
        self.total_requests += 1;
        self.successful_requests += 1;

        let sample = response_time.as_secs_f64() * 1000.0;
        let n = self.successful_requests as f64;
        self.average_response_time_ms += (sample - self.average_response_time_ms) / n;
        self.last_success = Some(at);
    }

    /// Fold a failed attempt into the record
    pub fn record_failure(&mut self, error: &ApiError) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.last_error = Some(error.clone());
    }

    pub fn record_retry(&mut self) {
        self.retry_attempts += 1;
    }

    pub fn record_trip(&mut self) {
        self.circuit_breaker_trips += 1;
    }

    /// Share of attempts that succeeded; 1.0 before any attempt
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    pub fn average_response_time(&self) -> Duration {
        Duration::from_secs_f64(self.average_response_time_ms.max(0.0) / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_running_mean_over_successes_only() {
        let mut metrics = ApiMetrics::new();
        let now = Utc::now();

        metrics.record_success(Duration::from_millis(100), now);
        metrics.record_failure(&ApiError::http(500, "boom"));
        metrics.record_success(Duration::from_millis(300), now);

        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.successful_requests, 2);
        assert_eq!(metrics.failed_requests, 1);
        assert!((metrics.average_response_time_ms - 200.0).abs() < 1e-9);
        assert_eq!(metrics.average_response_time().as_millis(), 200);
        assert_eq!(metrics.last_success, Some(now));
        assert_eq!(metrics.last_error.as_ref().and_then(|e| e.status), Some(500));
    }

    #[test]
    fn test_success_rate() {
        let mut metrics = ApiMetrics::new();
        assert_eq!(metrics.success_rate(), 1.0);

        metrics.record_success(Duration::from_millis(5), Utc::now());
        for _ in 0..3 {
            metrics.record_failure(&ApiError::http(503, "down"));
        }
        assert_eq!(metrics.success_rate(), 0.25);
    }

    #[test]
    fn test_serializes_without_empty_fields() {
        let json = serde_json::to_value(ApiMetrics::new()).unwrap();
        assert_eq!(json["total_requests"], 0);
        assert!(json.get("last_error").is_none());
        assert!(json.get("last_success").is_none());
    }
}
