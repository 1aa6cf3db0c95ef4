//! Named default profiles for the three classes of downstream dependency
//!
//! The profiles differ only in their numeric knobs: a fast, high-volume voice
//! platform, a slow, low-volume language-model API, and a fast, high-volume
//! data store.

use super::defaults::{duration_ms, duration_secs};
use super::{CircuitBreakerConfig, RateLimitConfig, ResilienceConfig, RetryConfig, ServiceConfig};
use crate::error::CallgateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    VoiceApi,
    LanguageModel,
    DataStore,
}

impl Profile {
    pub const ALL: [Profile; 3] = [Profile::VoiceApi, Profile::LanguageModel, Profile::DataStore];

    pub fn name(&self) -> &'static str {
        match self {
            Profile::VoiceApi => "voice-api",
            Profile::LanguageModel => "language-model",
            Profile::DataStore => "data-store",
        }
    }

    /// Per-service knobs for this profile
    pub fn service_config(&self) -> ServiceConfig {
        match self {
            Profile::VoiceApi => ServiceConfig {
                retry: RetryConfig {
                    max_retries: 3,
                    base_delay: duration_secs(1),
                    max_delay: duration_secs(10),
                    backoff_multiplier: 2.0,
                    jitter_enabled: true,
                    timeout: duration_secs(30),
                },
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: 5,
                    recovery_timeout: duration_secs(60),
                    monitoring_window: duration_secs(300),
                },
                rate_limit: RateLimitConfig {
                    requests_per_second: 10,
                    burst_limit: 20,
                },
            },
            Profile::LanguageModel => ServiceConfig {
                retry: RetryConfig {
                    max_retries: 2,
                    base_delay: duration_secs(2),
                    max_delay: duration_secs(30),
                    backoff_multiplier: 2.0,
                    jitter_enabled: true,
                    timeout: duration_secs(60),
                },
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: 3,
                    recovery_timeout: duration_secs(120),
                    monitoring_window: duration_secs(600),
                },
                rate_limit: RateLimitConfig {
                    requests_per_second: 5,
                    burst_limit: 10,
                },
            },
            Profile::DataStore => ServiceConfig {
                retry: RetryConfig {
                    max_retries: 3,
                    base_delay: duration_ms(500),
                    max_delay: duration_secs(5),
                    backoff_multiplier: 1.5,
                    jitter_enabled: true,
                    timeout: duration_secs(10),
                },
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: 10,
                    recovery_timeout: duration_secs(30),
                    monitoring_window: duration_secs(60),
                },
                rate_limit: RateLimitConfig {
                    requests_per_second: 100,
                    burst_limit: 200,
                },
            },
        }
    }

    /// Full orchestrator configuration using this profile as the default
    pub fn config(&self) -> ResilienceConfig {
        let service = self.service_config();
        ResilienceConfig {
            retry: service.retry,
            circuit_breaker: service.circuit_breaker,
            rate_limit: service.rate_limit,
            ..ResilienceConfig::default()
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Profile {
    type Err = CallgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Profile::ALL
            .into_iter()
            .find(|profile| profile.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                CallgateError::Config(format!(
                    "unknown profile '{}', expected one of: voice-api, language-model, data-store",
                    s
                ))
            })
    }
}
