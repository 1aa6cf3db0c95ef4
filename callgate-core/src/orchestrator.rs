//! Resilient execution of outbound calls
//!
//! [`ResilienceOrchestrator`] is the single entry point collaborators use to
//! reach a downstream service. Every attempt passes the service's rate limiter
//! and circuit breaker, is timed and folded into the service's metrics, and
//! failures are classified before deciding whether to back off and retry.
//!
//! The orchestrator knows nothing about what an operation does; it only sees a
//! service key, an operation label and a closure producing a future.
//!
//! ```rust
//! use callgate_core::{ApiError, Profile, ResilienceOrchestrator};
//!
//! # async fn example() -> Result<(), ApiError> {
//! let orchestrator = ResilienceOrchestrator::builder()
//!     .profile(Profile::VoiceApi)
//!     .build()
//!     .map_err(|e| ApiError::from_message(e.to_string()))?;
//!
//! let id = orchestrator
//!     .execute_with_retry("voice", "create_call", || async { Ok::<_, ApiError>("call-1") })
//!     .await?;
//! assert_eq!(id, "call-1");
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::classify;
use crate::clock::{self, Clock, SystemClock};
use crate::config::{
    Profile, ResilienceConfig, RetryOverride, ServiceConfig, DEFAULT_TIMEOUT_LABEL,
};
use crate::error::{ApiError, CallgateResult, ErrorKind};
use crate::health::{self, HealthStatus, ServiceHealth};
use crate::metrics::ApiMetrics;
use crate::patterns::{Backoff, CircuitBreakerState, CircuitBreakerStats};
use crate::registry::{ServiceEntry, ServiceRegistry};
use crate::telemetry;

/// Per-service resilience for arbitrary async operations.
///
/// Construct one per process (or per test) and hand it to collaborators;
/// all per-service state is owned by the instance.
pub struct ResilienceOrchestrator {
    config: Arc<ResilienceConfig>,
    clock: Arc<dyn Clock>,
    registry: ServiceRegistry,
}

impl std::fmt::Debug for ResilienceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceOrchestrator")
            .field("config", &self.config)
            .field("services", &self.registry.keys())
            .finish()
    }
}

impl Default for ResilienceOrchestrator {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}

impl ResilienceOrchestrator {
    /// Orchestrator on the system clock
    pub fn new(config: ResilienceConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Orchestrator reading time through `clock`
    pub fn with_clock(config: ResilienceConfig, clock: Arc<dyn Clock>) -> Self {
        let config = Arc::new(config);
        Self {
            registry: ServiceRegistry::new(config.clone(), clock.clone()),
            config,
            clock,
        }
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run `operation` with the service's retry settings
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        service_key: &str,
        operation_name: &str,
        operation: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ApiError>,
    {
        self.execute_with_override(service_key, operation_name, &RetryOverride::default(), operation)
            .await
    }

    /// Run `operation` with `overrides` merged over the service's retry settings.
    ///
    /// Makes up to `max_retries + 1` attempts. Each attempt waits on the rate
    /// limiter, then runs through the circuit breaker. Non-retryable failures
    /// and the failure of the last attempt are returned immediately; every
    /// returned error carries the service, operation and attempt time.
    pub async fn execute_with_override<F, Fut, T, E>(
        &self,
        service_key: &str,
        operation_name: &str,
        overrides: &RetryOverride,
        mut operation: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ApiError>,
    {
        let entry = self.registry.get_or_create(service_key);
        let retry = entry.retry.merged(overrides);
        let backoff = Backoff::from_config(&retry);
        let mut attempt: u32 = 0;

        loop {
            debug!(
                "Attempt {}/{} of {} on {}",
                attempt + 1,
                retry.max_retries + 1,
                operation_name,
                service_key
            );

            let error = match self.attempt(&entry, &mut operation).await {
                Ok((value, elapsed)) => {
                    self.on_success(&entry, service_key, operation_name, elapsed);
                    if attempt > 0 {
                        debug!(
                            "{} on {} succeeded after {} attempts",
                            operation_name,
                            service_key,
                            attempt + 1
                        );
                    }
                    return Ok(value);
                }
                Err(failure) => self.on_failure(&entry, service_key, operation_name, failure),
            };

            if !error.retryable {
                if self.config.log_errors {
                    error!(
                        "{} on {} failed with non-retryable {} error: {}",
                        operation_name, service_key, error.kind, error
                    );
                }
                return Err(error);
            }

            if attempt >= retry.max_retries {
                if self.config.log_errors {
                    error!(
                        "{} on {} failed after {} attempts: {}",
                        operation_name,
                        service_key,
                        attempt + 1,
                        error
                    );
                }
                return Err(error);
            }

            let delay = backoff.delay(attempt);
            if self.config.enable_metrics {
                entry.metrics.lock().record_retry();
                telemetry::record_retry(service_key, operation_name);
            }
            if self.config.log_errors {
                warn!(
                    "Retry attempt {}/{} for {} on {} after {} error: {} (waiting {:?})",
                    attempt + 1,
                    retry.max_retries,
                    operation_name,
                    service_key,
                    error.kind,
                    error,
                    delay
                );
            }

            self.clock.sleep(delay).await;
            attempt += 1;
        }
    }

    /// One pass through limiter and breaker
    async fn attempt<F, Fut, T, E>(
        &self,
        entry: &ServiceEntry,
        operation: &mut F,
    ) -> Result<(T, Duration), Failure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ApiError>,
    {
        entry.limiter.check_limit().await.map_err(Failure::rejected)?;
        entry.breaker.try_acquire().map_err(Failure::rejected)?;

        let started = self.clock.now();
        match operation().await {
            Ok(value) => {
                entry.breaker.record_success();
                Ok((value, self.clock.now().duration_since(started)))
            }
            Err(err) => {
                let tripped = entry.breaker.record_failure();
                Err(Failure {
                    error: err.into(),
                    tripped,
                    rejected: false,
                })
            }
        }
    }

    fn on_success(
        &self,
        entry: &ServiceEntry,
        service_key: &str,
        operation_name: &str,
        elapsed: Duration,
    ) {
        if !self.config.enable_metrics {
            return;
        }
        entry
            .metrics
            .lock()
            .record_success(elapsed, self.clock.wall_time());
        telemetry::record_success(service_key, operation_name, elapsed);
    }

    /// Classify, stamp and record a failed attempt
    fn on_failure(
        &self,
        entry: &ServiceEntry,
        service_key: &str,
        operation_name: &str,
        failure: Failure,
    ) -> ApiError {
        let error = classify::resolve(failure.error.with_context(
            service_key,
            operation_name,
            self.clock.wall_time(),
        ));

        if self.config.enable_metrics {
            let mut metrics = entry.metrics.lock();
            metrics.record_failure(&error);
            if failure.tripped {
                metrics.record_trip();
            }
            drop(metrics);

            telemetry::record_failure(service_key, operation_name, failure.rejected);
            if failure.tripped {
                telemetry::record_trip(service_key);
            }
        }

        if self.config.log_errors {
            debug!(
                "{} on {} attempt failed ({}, retryable: {}): {}",
                operation_name, service_key, error.kind, error.retryable, error
            );
        }

        error
    }

    /// Race `operation` against a timer.
    ///
    /// When the timer wins the operation's future is dropped and a
    /// [`ErrorKind::Timeout`] error reading `"<label> timed out after <ms>ms"`
    /// is returned. `label` defaults to `"Operation"`. Every error, the
    /// operation's own included, is classified and carries the label as its
    /// operation.
    pub async fn execute_with_timeout<F, Fut, T, E>(
        &self,
        timeout: Duration,
        label: Option<&str>,
        operation: F,
    ) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ApiError>,
    {
        let label = label.unwrap_or(DEFAULT_TIMEOUT_LABEL);
        let error = match clock::timeout(self.clock.as_ref(), timeout, operation()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err.into(),
            Err(_) => ApiError::new(
                ErrorKind::Timeout,
                format!("{} timed out after {}ms", label, timeout.as_millis()),
            ),
        };

        Err(classify::resolve(error.with_context(
            "",
            label,
            self.clock.wall_time(),
        )))
    }

    /// Metrics for `service_key`, if it has been used
    pub fn metrics(&self, service_key: &str) -> Option<ApiMetrics> {
        self.registry
            .get(service_key)
            .map(|entry| entry.metrics_snapshot())
    }

    pub fn all_metrics(&self) -> BTreeMap<String, ApiMetrics> {
        self.registry
            .entries()
            .into_iter()
            .map(|(key, entry)| (key, entry.metrics_snapshot()))
            .collect()
    }

    /// Clear the metrics of `service_key`; breaker and limiter state are kept
    pub fn reset_metrics(&self, service_key: &str) {
        if let Some(entry) = self.registry.get(service_key) {
            *entry.metrics.lock() = ApiMetrics::new();
            debug!("Reset metrics for service '{}'", service_key);
        }
    }

    pub fn circuit_state(&self, service_key: &str) -> Option<CircuitBreakerState> {
        self.registry
            .get(service_key)
            .map(|entry| entry.breaker.state())
    }

    pub fn breaker_stats(&self, service_key: &str) -> Option<CircuitBreakerStats> {
        self.registry
            .get(service_key)
            .map(|entry| entry.breaker.stats())
    }

    /// Service keys seen so far, sorted
    pub fn services(&self) -> Vec<String> {
        self.registry.keys()
    }

    /// Health of every service seen so far
    pub fn health_status(&self) -> BTreeMap<String, ServiceHealth> {
        self.registry
            .entries()
            .into_iter()
            .map(|(key, entry)| {
                let metrics = entry.metrics_snapshot();
                (key, ServiceHealth::evaluate(&metrics, entry.breaker.state()))
            })
            .collect()
    }

    /// Worst status across all services
    pub fn overall_status(&self) -> HealthStatus {
        health::overall(self.health_status().values())
    }
}

/// A failed attempt before classification
struct Failure {
    error: ApiError,
    tripped: bool,
    rejected: bool,
}

impl Failure {
    fn rejected(error: ApiError) -> Self {
        Self {
            error,
            tripped: false,
            rejected: true,
        }
    }
}

/// Builder for [`ResilienceOrchestrator`]
pub struct OrchestratorBuilder {
    config: ResilienceConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
            clock: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a named profile's settings as the defaults, keeping service entries
    pub fn profile(mut self, profile: Profile) -> Self {
        let service = profile.service_config();
        self.config.retry = service.retry;
        self.config.circuit_breaker = service.circuit_breaker;
        self.config.rate_limit = service.rate_limit;
        self
    }

    /// Settings for one service key
    pub fn service(mut self, service_key: impl Into<String>, service: ServiceConfig) -> Self {
        self.config.services.insert(service_key.into(), service);
        self
    }

    pub fn log_errors(mut self, enable: bool) -> Self {
        self.config.log_errors = enable;
        self
    }

    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.config.enable_metrics = enable;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and build
    pub fn build(self) -> CallgateResult<ResilienceOrchestrator> {
        self.config.validate()?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        Ok(ResilienceOrchestrator::with_clock(self.config, clock))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
