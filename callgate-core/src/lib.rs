pub mod batch;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod patterns;
pub mod registry;
pub mod telemetry;

pub use batch::{BatchOptions, BatchResult};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{
    CircuitBreakerConfig, Profile, RateLimitConfig, ResilienceConfig, ResilienceConfigBuilder,
    RetryConfig, RetryOverride, ServiceConfig,
};
pub use error::{ApiError, CallgateError, CallgateResult, ErrorKind};
pub use health::{HealthStatus, ServiceHealth};
pub use metrics::ApiMetrics;
pub use orchestrator::{OrchestratorBuilder, ResilienceOrchestrator};
pub use patterns::{CircuitBreakerState, CircuitBreakerStats};
