//! Synthetic workloads for exercising a configuration
//!
//! A simulation pushes `requests` operations through
//! [`ResilienceOrchestrator::execute_batch`] on a virtual clock, so backoff
//! delays and breaker cooldowns cost no wall time. Each operation fails with a
//! 503 at `failure_rate` and otherwise succeeds after a short simulated
//! latency.

use callgate_core::{
    ApiError, ApiMetrics, BatchOptions, CallgateError, CallgateResult, Clock, HealthStatus,
    MockClock, Profile, ResilienceConfig, ResilienceOrchestrator, ServiceHealth,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const MIN_LATENCY_MS: u64 = 5;
const MAX_LATENCY_MS: u64 = 50;

/// Parameters of one simulation run
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub profile: Profile,
    pub service: String,
    pub requests: usize,
    pub failure_rate: f64,
    pub concurrency: usize,
    pub seed: u64,
    /// Configuration replacing the profile's settings
    pub config: Option<ResilienceConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub profile: Profile,
    pub service: String,
    pub requests: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub virtual_elapsed_ms: u128,
    pub overall_status: HealthStatus,
    pub metrics: Option<ApiMetrics>,
    pub health: Option<ServiceHealth>,
}

impl SimulationPlan {
    pub fn validate(&self) -> CallgateResult<()> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(CallgateError::InvalidConfiguration {
                field: "failure_rate".to_string(),
                message: format!("must be between 0.0 and 1.0, got {}", self.failure_rate),
            });
        }
        if self.service.trim().is_empty() {
            return Err(CallgateError::InvalidConfiguration {
                field: "service".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Run the simulation to completion
pub async fn run(plan: SimulationPlan) -> CallgateResult<SimulationReport> {
    plan.validate()?;

    let clock = MockClock::new();
    let config = match plan.config.clone() {
        Some(config) => config,
        None => plan.profile.config(),
    };
    let orchestrator = ResilienceOrchestrator::builder()
        .config(config)
        .clock(Arc::new(clock.clone()))
        .build()?;

    info!(
        "Simulating {} requests against '{}' ({} profile, failure rate {:.2})",
        plan.requests, plan.service, plan.profile, plan.failure_rate
    );

    let operations: Vec<_> = (0..plan.requests)
        .map(|i| {
            let seed = plan.seed.wrapping_add(i as u64);
            synthetic_operation(clock.clone(), plan.failure_rate, seed)
        })
        .collect();

    let options = BatchOptions::new().concurrency(plan.concurrency);
    let batch = orchestrator
        .execute_batch(&plan.service, "simulated", operations, options)
        .await?;

    let mut health = orchestrator.health_status();
    let report = SimulationReport {
        profile: plan.profile,
        service: plan.service.clone(),
        requests: plan.requests,
        success_count: batch.success_count,
        failure_count: batch.failure_count,
        virtual_elapsed_ms: clock.elapsed().as_millis(),
        overall_status: orchestrator.overall_status(),
        metrics: orchestrator.metrics(&plan.service),
        health: health.remove(&plan.service),
    };

    info!(
        "Simulation finished: {} succeeded, {} failed, status {}",
        report.success_count, report.failure_count, report.overall_status
    );
    Ok(report)
}

/// Operation that draws its outcome from its own seeded generator on every call
fn synthetic_operation(
    clock: MockClock,
    failure_rate: f64,
    seed: u64,
) -> impl FnMut() -> Pin<Box<dyn Future<Output = Result<u64, ApiError>> + Send>> {
    let mut rng = StdRng::seed_from_u64(seed);
    move || {
        let fails = rng.gen_bool(failure_rate);
        let latency = Duration::from_millis(rng.gen_range(MIN_LATENCY_MS..=MAX_LATENCY_MS));
        let clock = clock.clone();
        Box::pin(async move {
            clock.sleep(latency).await;
            if fails {
                Err(ApiError::http(503, "simulated upstream failure"))
            } else {
                Ok(latency.as_millis() as u64)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn plan(failure_rate: f64) -> SimulationPlan {
        SimulationPlan {
            profile: Profile::DataStore,
            service: "db".to_string(),
            requests: 20,
            failure_rate,
            concurrency: 4,
            seed: 7,
            config: None,
        }
    }

    #[tokio::test]
    async fn test_healthy_simulation() {
        let report = run(plan(0.0)).await.unwrap();

        assert_eq!(report.success_count, 20);
        assert_eq!(report.failure_count, 0);
        assert_eq!(report.overall_status, HealthStatus::Healthy);
        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.total_requests, 20);
        assert!(metrics.average_response_time_ms >= MIN_LATENCY_MS as f64);
    }

    #[tokio::test]
    async fn test_failing_simulation_opens_breaker() {
        let report = run(plan(1.0)).await.unwrap();

        assert_eq!(report.success_count, 0);
        assert_eq!(report.failure_count, 20);
        assert_eq!(report.overall_status, HealthStatus::Unhealthy);
        assert!(report.metrics.unwrap().circuit_breaker_trips >= 1);
        assert!(report.virtual_elapsed_ms > 0);
    }

    #[tokio::test]
    async fn test_same_seed_same_outcome() {
        let a = run(plan(0.3)).await.unwrap();
        let b = run(plan(0.3)).await.unwrap();
        assert_eq!(a.success_count, b.success_count);
        assert_eq!(a.failure_count, b.failure_count);
    }

    #[tokio::test]
    async fn test_config_file_replaces_profile() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "[retry]\nmax_retries = 0\n\n[circuit_breaker]\nfailure_threshold = 1000\n",
        )
        .unwrap();

        let mut plan = plan(1.0);
        plan.config = Some(ResilienceConfig::from_file(file.path()).unwrap());
        let report = run(plan).await.unwrap();

        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.total_requests, 20);
        assert_eq!(metrics.retry_attempts, 0);
        assert_eq!(metrics.circuit_breaker_trips, 0);
        assert_eq!(report.overall_status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_rejects_bad_failure_rate() {
        assert!(run(plan(1.5)).await.is_err());
    }
}
