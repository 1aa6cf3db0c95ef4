//! Fault-tolerance primitives used by the orchestrator
//!
//! Each primitive is usable on its own; [`crate::orchestrator`] composes one
//! breaker and one limiter per service key with the backoff schedule.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitBreakerStats};
pub use rate_limiter::{Admission, RateLimiter};
pub use retry::Backoff;
