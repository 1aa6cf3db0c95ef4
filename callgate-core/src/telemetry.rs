//! OpenTelemetry export of call metrics
//!
//! Instruments are created lazily on the global meter named `callgate`; with
//! no meter provider installed they are no-ops. Without the `observability`
//! feature every recorder compiles to nothing.

use std::time::Duration;

#[cfg(feature = "observability")]
mod otel {
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram, Meter},
        KeyValue,
    };
    use std::sync::OnceLock;

    static METRICS: OnceLock<CallMetrics> = OnceLock::new();

    pub(super) struct CallMetrics {
        _meter: Meter,
        pub attempts: Counter<u64>,
        pub failures: Counter<u64>,
        pub retries: Counter<u64>,
        pub breaker_trips: Counter<u64>,
        pub rejections: Counter<u64>,
        pub attempt_duration: Histogram<f64>,
    }

    impl CallMetrics {
        fn new(meter: Meter) -> Self {
            Self {
                attempts: meter
                    .u64_counter("callgate.attempts.total")
                    .with_description("Attempts made through the orchestrator")
                    .init(),
                failures: meter
                    .u64_counter("callgate.attempts.failed")
                    .with_description("Attempts that ended in an error")
                    .init(),
                retries: meter
                    .u64_counter("callgate.retries.total")
                    .with_description("Retries scheduled after a failed attempt")
                    .init(),
                breaker_trips: meter
                    .u64_counter("callgate.circuit_breaker.trips")
                    .with_description("Circuit breaker transitions into open")
                    .init(),
                rejections: meter
                    .u64_counter("callgate.rejections.total")
                    .with_description("Calls rejected by a breaker or the burst limit")
                    .init(),
                attempt_duration: meter
                    .f64_histogram("callgate.attempt.duration")
                    .with_description("Duration of successful attempts in seconds")
                    .init(),
                _meter: meter,
            }
        }
    }

    pub(super) fn metrics() -> &'static CallMetrics {
        METRICS.get_or_init(|| CallMetrics::new(global::meter("callgate")))
    }

    pub(super) fn labels(service: &str, operation: &str) -> [KeyValue; 2] {
        [
            KeyValue::new("service", service.to_string()),
            KeyValue::new("operation", operation.to_string()),
        ]
    }
}

/// A successful attempt and its duration
pub fn record_success(service: &str, operation: &str, elapsed: Duration) {
    #[cfg(feature = "observability")]
    {
        let m = otel::metrics();
        let labels = otel::labels(service, operation);
        m.attempts.add(1, &labels);
        m.attempt_duration.record(elapsed.as_secs_f64(), &labels);
    }
    #[cfg(not(feature = "observability"))]
    let _ = (service, operation, elapsed);
}

/// A failed attempt; `rejected` marks breaker and burst-limit rejections
pub fn record_failure(service: &str, operation: &str, rejected: bool) {
    #[cfg(feature = "observability")]
    {
        let m = otel::metrics();
        let labels = otel::labels(service, operation);
        m.attempts.add(1, &labels);
        m.failures.add(1, &labels);
        if rejected {
            m.rejections.add(1, &labels);
        }
    }
    #[cfg(not(feature = "observability"))]
    let _ = (service, operation, rejected);
}

pub fn record_retry(service: &str, operation: &str) {
    #[cfg(feature = "observability")]
    otel::metrics()
        .retries
        .add(1, &otel::labels(service, operation));
    #[cfg(not(feature = "observability"))]
    let _ = (service, operation);
}

pub fn record_trip(service: &str) {
    #[cfg(feature = "observability")]
    otel::metrics()
        .breaker_trips
        .add(1, &[opentelemetry::KeyValue::new("service", service.to_string())]);
    #[cfg(not(feature = "observability"))]
    let _ = service;
}
