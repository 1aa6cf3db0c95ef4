//! Service health derived from metrics and breaker state

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::DEGRADED_SUCCESS_RATE;
use crate::error::ApiError;
use crate::metrics::ApiMetrics;
use crate::patterns::CircuitBreakerState;

/// Health classification, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health report for one service key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub circuit_breaker_state: CircuitBreakerState,
    pub success_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ApiError>,
}

impl ServiceHealth {
    /// An open breaker is unhealthy regardless of the success rate
    pub fn evaluate(metrics: &ApiMetrics, breaker: CircuitBreakerState) -> Self {
        let success_rate = metrics.success_rate();
        let status = if breaker == CircuitBreakerState::Open {
            HealthStatus::Unhealthy
        } else if success_rate < DEGRADED_SUCCESS_RATE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            circuit_breaker_state: breaker,
            success_rate,
            last_error: metrics.last_error.clone(),
        }
    }
}

/// Worst status across `reports`; healthy when there are none
pub fn overall<'a>(reports: impl IntoIterator<Item = &'a ServiceHealth>) -> HealthStatus {
    reports
        .into_iter()
        .map(|report| report.status)
        .max()
        .unwrap_or(HealthStatus::Healthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn metrics(successes: u64, failures: u64) -> ApiMetrics {
        let mut metrics = ApiMetrics::new();
        for _ in 0..successes {
            metrics.record_success(Duration::from_millis(1), Utc::now());
        }
        for _ in 0..failures {
            metrics.record_failure(&ApiError::http(500, "boom"));
        }
        metrics
    }

    #[test]
    fn test_no_traffic_is_healthy() {
        let health = ServiceHealth::evaluate(&ApiMetrics::new(), CircuitBreakerState::Closed);
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.success_rate, 1.0);
        assert!(health.last_error.is_none());
    }

    #[test]
    fn test_low_success_rate_is_degraded() {
        let health = ServiceHealth::evaluate(&metrics(1, 3), CircuitBreakerState::Closed);
        assert_eq!(health.success_rate, 0.25);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.last_error.is_some());
    }

    #[test]
    fn test_eighty_percent_is_still_healthy() {
        let health = ServiceHealth::evaluate(&metrics(4, 1), CircuitBreakerState::HalfOpen);
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_open_breaker_is_unhealthy() {
        let health = ServiceHealth::evaluate(&metrics(10, 0), CircuitBreakerState::Open);
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_overall_takes_worst() {
        let healthy = ServiceHealth::evaluate(&metrics(1, 0), CircuitBreakerState::Closed);
        let degraded = ServiceHealth::evaluate(&metrics(1, 1), CircuitBreakerState::Closed);

        assert_eq!(overall([&healthy, &degraded]), HealthStatus::Degraded);
        assert_eq!(overall(std::iter::empty()), HealthStatus::Healthy);
    }

    #[test]
    fn test_serialized_shape() {
        let health = ServiceHealth::evaluate(&ApiMetrics::new(), CircuitBreakerState::HalfOpen);
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["circuit_breaker_state"], "HALF_OPEN");
    }
}
