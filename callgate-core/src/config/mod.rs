//! Configuration for the resilience orchestrator
//!
//! This module provides a structured configuration system with sensible defaults,
//! named profiles, TOML file loading, environment variable support, and runtime
//! validation. Durations are written in humantime form ("500ms", "1m").

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{CallgateError, CallgateResult};

pub mod defaults;
pub mod profiles;

pub use defaults::*;
pub use profiles::Profile;

/// Retry and backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound for any single backoff delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Growth factor applied per attempt
    pub backoff_multiplier: f64,

    /// Randomize each delay within +/-25%
    pub jitter_enabled: bool,

    /// Suggested per-call timeout for use with `execute_with_timeout`.
    /// The retry loop itself does not enforce it.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: duration_ms(DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay: duration_ms(DEFAULT_RETRY_MAX_DELAY_MS),
            backoff_multiplier: DEFAULT_RETRY_MULTIPLIER,
            jitter_enabled: DEFAULT_RETRY_JITTER,
            timeout: duration_ms(DEFAULT_OPERATION_TIMEOUT_MS),
        }
    }
}

impl RetryConfig {
    /// Apply a per-call override on top of this configuration
    pub fn merged(&self, overrides: &RetryOverride) -> RetryConfig {
        RetryConfig {
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            base_delay: overrides.base_delay.unwrap_or(self.base_delay),
            max_delay: overrides.max_delay.unwrap_or(self.max_delay),
            backoff_multiplier: overrides
                .backoff_multiplier
                .unwrap_or(self.backoff_multiplier),
            jitter_enabled: overrides.jitter_enabled.unwrap_or(self.jitter_enabled),
            timeout: overrides.timeout.unwrap_or(self.timeout),
        }
    }

    pub fn validate(&self) -> CallgateResult<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                format!("must be a finite value >= 1.0, got {}", self.backoff_multiplier),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(invalid(
                "retry.max_delay",
                format!(
                    "must not be shorter than base_delay ({:?} < {:?})",
                    self.max_delay, self.base_delay
                ),
            ));
        }
        if self.timeout.is_zero() {
            return Err(invalid("retry.timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Partial retry settings supplied for a single call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOverride {
    pub max_retries: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub base_delay: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub max_delay: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
    pub jitter_enabled: Option<bool>,
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl RetryOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter_enabled = Some(enabled);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,

    /// Time after the last failure before a probe is allowed
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,

    /// Accepted for compatibility; failure counting is not windowed
    #[serde(with = "humantime_serde")]
    pub monitoring_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: duration_ms(DEFAULT_RECOVERY_TIMEOUT_MS),
            monitoring_window: duration_ms(DEFAULT_MONITORING_WINDOW_MS),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> CallgateResult<()> {
        if self.failure_threshold == 0 {
            return Err(invalid(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Sliding-window rate limit settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Pacing target; calls beyond it within one second are delayed
    pub requests_per_second: u32,

    /// Hard ceiling; calls beyond it within one second are rejected
    pub burst_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            burst_limit: DEFAULT_BURST_LIMIT,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> CallgateResult<()> {
        if self.requests_per_second == 0 {
            return Err(invalid("rate_limit.requests_per_second", "must be at least 1"));
        }
        if self.burst_limit == 0 {
            return Err(invalid("rate_limit.burst_limit", "must be at least 1"));
        }
        Ok(())
    }
}

/// Settings for one service key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
}

impl ServiceConfig {
    pub fn validate(&self) -> CallgateResult<()> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}

/// Root configuration structure for the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry settings for services without their own entry
    pub retry: RetryConfig,

    /// Breaker settings for services without their own entry
    pub circuit_breaker: CircuitBreakerConfig,

    /// Rate limit settings for services without their own entry
    pub rate_limit: RateLimitConfig,

    /// Log every failed attempt
    pub log_errors: bool,

    /// Record per-service metrics
    pub enable_metrics: bool,

    /// Per-service settings keyed by service key
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            log_errors: true,
            enable_metrics: true,
            services: BTreeMap::new(),
        }
    }
}

impl ResilienceConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings that apply to `service_key`
    pub fn service_config(&self, service_key: &str) -> ServiceConfig {
        self.services
            .get(service_key)
            .cloned()
            .unwrap_or_else(|| ServiceConfig {
                retry: self.retry.clone(),
                circuit_breaker: self.circuit_breaker.clone(),
                rate_limit: self.rate_limit.clone(),
            })
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> CallgateResult<Self> {
        let config: ResilienceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> CallgateResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> CallgateResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load configuration from `CALLGATE_*` environment variables over defaults
    pub fn from_env() -> CallgateResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup` over defaults
    pub fn from_lookup<F>(lookup: F) -> CallgateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "CALLGATE_MAX_RETRIES")? {
            config.retry.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "CALLGATE_BASE_DELAY_MS")? {
            config.retry.base_delay = duration_ms(v);
        }
        if let Some(v) = parse_var(&lookup, "CALLGATE_MAX_DELAY_MS")? {
            config.retry.max_delay = duration_ms(v);
        }
        if let Some(v) = parse_var(&lookup, "CALLGATE_BACKOFF_MULTIPLIER")? {
            config.retry.backoff_multiplier = v;
        }
        if let Some(v) = parse_var(&lookup, "CALLGATE_JITTER_ENABLED")? {
            config.retry.jitter_enabled = v;
        }
        if let Some(v) = parse_var(&lookup, "CALLGATE_TIMEOUT_MS")? {
            config.retry.timeout = duration_ms(v);
        }
        if let Some(v) = parse_var(&lookup, "CALLGATE_FAILURE_THRESHOLD")? {
            config.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "CALLGATE_RECOVERY_TIMEOUT_MS")? {
            config.circuit_breaker.recovery_timeout = duration_ms(v);
        }
        if let Some(v) = parse_var(&lookup, "CALLGATE_MONITORING_WINDOW_MS")? {
            config.circuit_breaker.monitoring_window = duration_ms(v);
        }
        if let Some(v) = parse_var(&lookup, "CALLGATE_REQUESTS_PER_SECOND")? {
            config.rate_limit.requests_per_second = v;
        }
        if let Some(v) = parse_var(&lookup, "CALLGATE_BURST_LIMIT")? {
            config.rate_limit.burst_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "CALLGATE_LOG_ERRORS")? {
            config.log_errors = v;
        }
        if let Some(v) = parse_var(&lookup, "CALLGATE_ENABLE_METRICS")? {
            config.enable_metrics = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> CallgateResult<()> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.rate_limit.validate()?;

        for (key, service) in &self.services {
            if key.trim().is_empty() {
                return Err(invalid("services", "service keys must not be empty"));
            }
            service.validate().map_err(|e| match e {
                CallgateError::InvalidConfiguration { field, message } => {
                    CallgateError::InvalidConfiguration {
                        field: format!("services.{}.{}", key, field),
                        message,
                    }
                }
                other => other,
            })?;
        }

        Ok(())
    }
}

/// Builder for ResilienceConfig
pub struct ResilienceConfigBuilder {
    config: ResilienceConfig,
}

impl ResilienceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
        }
    }

    pub fn from_profile(profile: Profile) -> Self {
        Self {
            config: profile.config(),
        }
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = circuit_breaker;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
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

    /// Settings for one service key, taking precedence over the defaults
    pub fn service(mut self, service_key: impl Into<String>, service: ServiceConfig) -> Self {
        self.config.services.insert(service_key.into(), service);
        self
    }

    pub fn build(self) -> CallgateResult<ResilienceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ResilienceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(field: &str, message: impl Into<String>) -> CallgateError {
    CallgateError::InvalidConfiguration {
        field: field.to_string(),
        message: message.into(),
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> CallgateResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CallgateError::Config(format!("Invalid {}: '{}'", key, raw))),
        None => Ok(None),
    }
}
