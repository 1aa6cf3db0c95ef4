//! Circuit Breaker Pattern for Fault Tolerance
//!
//! The circuit breaker stops calling a failing dependency for a cooldown period
//! so failing calls do not pile up against it.
//!
//! ## States
//!
//! - **Closed**: Normal operation, requests pass through
//! - **Open**: Failing fast, requests are rejected without being attempted
//! - **Half-Open**: Probing whether the dependency has recovered
//!
//! ## Transitions
//!
//! - Closed/Half-Open → Open once the consecutive failure count reaches
//!   `failure_threshold`. Any success resets the count.
//! - Open → Half-Open on the first call made more than `recovery_timeout`
//!   after the last failure.
//! - Half-Open → Closed after two successes in a row.
//!
//! `monitoring_window` is carried in the configuration but does not age out
//! failures; the count is purely consecutive.
//!
//! ## Usage Example
//!
//! ```rust
//! use std::sync::Arc;
//! use callgate_core::clock::SystemClock;
//! use callgate_core::config::CircuitBreakerConfig;
//! use callgate_core::error::ApiError;
//! use callgate_core::patterns::CircuitBreaker;
//!
//! # async fn example() -> Result<(), ApiError> {
//! let breaker = CircuitBreaker::new(
//!     "voice-api",
//!     CircuitBreakerConfig::default(),
//!     Arc::new(SystemClock::new()),
//! );
//!
//! let value = breaker.execute(|| async { Ok::<_, ApiError>(42) }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, Instant};
use crate::config::{CircuitBreakerConfig, HALF_OPEN_SUCCESS_THRESHOLD};
use crate::error::{ApiError, ErrorKind};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Normal operation - requests pass through
    Closed,
    /// Failing fast - requests are rejected immediately
    Open,
    /// Testing if service has recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "CLOSED"),
            CircuitBreakerState::Open => write!(f, "OPEN"),
            CircuitBreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Snapshot of a circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerStats {
    pub state: CircuitBreakerState,
    /// Consecutive failures since the last success
    pub failure_count: u32,
    /// Successes recorded in the current half-open period
    pub success_count: u32,
    /// Times the breaker has transitioned into Open
    pub trips: u64,
    /// Calls rejected while Open
    pub rejected_calls: u64,
    pub last_failure_at: Option<Instant>,
    pub last_opened_at: Option<Instant>,
}

/// Internal state for circuit breaker
#[derive(Debug)]
struct CircuitBreakerInternalState {
    state: CircuitBreakerState,
    failure_count: u32,
    success_count: u32,
    trips: u64,
    rejected_calls: u64,
    last_failure_at: Option<Instant>,
    last_opened_at: Option<Instant>,
}

impl CircuitBreakerInternalState {
    fn new() -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            trips: 0,
            rejected_calls: 0,
            last_failure_at: None,
            last_opened_at: None,
        }
    }
}

/// Per-service circuit breaker.
///
/// State lives behind a mutex that is only held for the bookkeeping around an
/// attempt, never across the attempt itself. Callers that need to observe
/// whether a failure tripped the breaker use [`CircuitBreaker::try_acquire`],
/// [`CircuitBreaker::record_success`] and [`CircuitBreaker::record_failure`]
/// directly; [`CircuitBreaker::execute`] composes them.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    internal_state: Mutex<CircuitBreakerInternalState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            internal_state: Mutex::new(CircuitBreakerInternalState::new()),
        }
    }

    /// Get the name of this circuit breaker
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation through the circuit breaker.
    ///
    /// Returns a [`ErrorKind::CircuitOpen`] error without invoking `operation`
    /// while the breaker is open; otherwise returns the operation's own result.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ApiError>,
    {
        self.try_acquire()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err.into())
            }
        }
    }

    /// Decide whether an attempt may proceed, moving Open → Half-Open when the
    /// recovery timeout has passed since the last failure.
    pub fn try_acquire(&self) -> Result<(), ApiError> {
        let now = self.clock.now();
        let mut state = self.internal_state.lock();

        if state.state != CircuitBreakerState::Open {
            return Ok(());
        }

        let recovered = state
            .last_failure_at
            .map(|at| now.duration_since(at) > self.config.recovery_timeout)
            .unwrap_or(true);

        if recovered {
            state.state = CircuitBreakerState::HalfOpen;
            state.success_count = 0;
            info!("Circuit breaker '{}' transitioning to half-open", self.name);
            return Ok(());
        }

        state.rejected_calls += 1;
        debug!("Circuit breaker '{}' rejected call while open", self.name);
        Err(ApiError::new(
            ErrorKind::CircuitOpen,
            format!("Circuit breaker is OPEN for {}", self.name),
        ))
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        let mut state = self.internal_state.lock();
        state.failure_count = 0;

        if state.state == CircuitBreakerState::HalfOpen {
            state.success_count += 1;
            if state.success_count >= HALF_OPEN_SUCCESS_THRESHOLD {
                state.state = CircuitBreakerState::Closed;
                state.success_count = 0;
                info!("Circuit breaker '{}' closing after successful probes", self.name);
            }
        }
    }

    /// Record a failed attempt. Returns `true` if this failure opened the breaker.
    pub fn record_failure(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.internal_state.lock();

        state.failure_count += 1;
        state.last_failure_at = Some(now);
        state.success_count = 0;

        if state.failure_count < self.config.failure_threshold {
            return false;
        }

        if state.state == CircuitBreakerState::Open {
            return false;
        }

        let previous = state.state;
        state.state = CircuitBreakerState::Open;
        state.last_opened_at = Some(now);
        state.trips += 1;
        warn!(
            "Circuit breaker '{}' opening after {} consecutive failures (was {})",
            self.name, state.failure_count, previous
        );
        true
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitBreakerState {
        self.internal_state.lock().state
    }

    /// Get current circuit breaker statistics
    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.internal_state.lock();
        CircuitBreakerStats {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            trips: state.trips,
            rejected_calls: state.rejected_calls,
            last_failure_at: state.last_failure_at,
            last_opened_at: state.last_opened_at,
        }
    }

    /// Force the circuit breaker to open (for testing or emergency)
    pub fn force_open(&self) {
        let now = self.clock.now();
        let mut state = self.internal_state.lock();
        if state.state != CircuitBreakerState::Open {
            state.trips += 1;
        }
        state.state = CircuitBreakerState::Open;
        state.last_failure_at = Some(now);
        state.last_opened_at = Some(now);
        state.success_count = 0;
        warn!("Circuit breaker '{}' forcibly opened", self.name);
    }

    /// Force the circuit breaker to close (for testing or recovery)
    pub fn force_close(&self) {
        let mut state = self.internal_state.lock();
        state.state = CircuitBreakerState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        info!("Circuit breaker '{}' forcibly closed", self.name);
    }

    /// Return to a fresh closed breaker, clearing all counters
    pub fn reset(&self) {
        *self.internal_state.lock() = CircuitBreakerInternalState::new();
    }
}
