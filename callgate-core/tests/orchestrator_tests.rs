use callgate_core::config::{CircuitBreakerConfig, RateLimitConfig, RetryConfig, ServiceConfig};
use callgate_core::{
    ApiError, BatchOptions, CircuitBreakerState, Clock, ErrorKind, HealthStatus, MockClock,
    ResilienceOrchestrator, SystemClock,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn service(max_retries: u32, failure_threshold: u32, burst_limit: u32) -> ServiceConfig {
    ServiceConfig {
        retry: RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            timeout: Duration::from_secs(5),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_secs(1),
            monitoring_window: Duration::from_secs(60),
        },
        rate_limit: RateLimitConfig {
            requests_per_second: burst_limit,
            burst_limit,
        },
    }
}

fn orchestrator(config: ServiceConfig) -> (ResilienceOrchestrator, MockClock) {
    let clock = MockClock::new();
    let orchestrator = ResilienceOrchestrator::builder()
        .service("svc", config)
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    (orchestrator, clock)
}

async fn call_once(
    orchestrator: &ResilienceOrchestrator,
    calls: &AtomicU32,
    outcome: Result<&'static str, ApiError>,
) -> Result<&'static str, ApiError> {
    orchestrator
        .execute_with_retry("svc", "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            let outcome = outcome.clone();
            async move { outcome }
        })
        .await
}

#[tokio::test]
async fn test_breaker_opens_after_three_failures_and_rejects_without_invoking() {
    let (orchestrator, _) = orchestrator(service(0, 3, 100));
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
        let err = call_once(&orchestrator, &calls, Err(ApiError::http(500, "boom")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
    }
    assert_eq!(orchestrator.circuit_state("svc"), Some(CircuitBreakerState::Open));

    let err = call_once(&orchestrator, &calls, Ok("ok")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CircuitOpen);
    assert_eq!(err.to_string(), "Circuit breaker is OPEN for svc");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_half_open_needs_two_successes() {
    let (orchestrator, clock) = orchestrator(service(0, 3, 100));
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
        let _ = call_once(&orchestrator, &calls, Err(ApiError::http(503, "down"))).await;
    }
    assert_eq!(orchestrator.circuit_state("svc"), Some(CircuitBreakerState::Open));

    clock.advance(Duration::from_millis(1001));

    call_once(&orchestrator, &calls, Ok("probe")).await.unwrap();
    assert_eq!(
        orchestrator.circuit_state("svc"),
        Some(CircuitBreakerState::HalfOpen)
    );

    call_once(&orchestrator, &calls, Ok("probe")).await.unwrap();
    assert_eq!(orchestrator.circuit_state("svc"), Some(CircuitBreakerState::Closed));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_burst_limit_admits_three_and_rejects_fourth() {
    let (orchestrator, _) = orchestrator(service(0, 10, 3));
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
        call_once(&orchestrator, &calls, Ok("ok")).await.unwrap();
    }
    let err = call_once(&orchestrator, &calls, Ok("ok")).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::BurstLimit);
    assert_eq!(err.service, "svc");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_network_error_then_success_invokes_twice() {
    let (orchestrator, clock) = orchestrator(service(3, 10, 100));
    let calls = AtomicU32::new(0);

    let value = orchestrator
        .execute_with_retry("svc", "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ApiError::from_message("Network request failed"))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "done");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // One jittered backoff of 100ms +/- 25%
    let sleeps = clock.sleeps();
    assert_eq!(sleeps.len(), 1);
    assert!(sleeps[0] >= Duration::from_millis(75) && sleeps[0] <= Duration::from_millis(125));

    let metrics = orchestrator.metrics("svc").unwrap();
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.retry_attempts, 1);
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let (orchestrator, clock) = orchestrator(service(3, 10, 100));
    let calls = AtomicU32::new(0);

    let err = call_once(&orchestrator, &calls, Err(ApiError::http(401, "Unauthorized")))
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.kind, ErrorKind::ClientError);
    assert!(!err.retryable);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_server_error_exhausts_retries() {
    let (orchestrator, _) = orchestrator(service(2, 10, 100));
    let calls = AtomicU32::new(0);

    let err = call_once(&orchestrator, &calls, Err(ApiError::http(500, "Internal")))
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(err.status, Some(500));
    assert_eq!(err.kind, ErrorKind::ServerError);
    assert!(err.retryable);
    assert_eq!(err.operation, "op");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_message() {
    let orchestrator = ResilienceOrchestrator::builder()
        .clock(Arc::new(SystemClock::new()))
        .build()
        .unwrap();

    let err = orchestrator
        .execute_with_timeout(Duration::from_millis(500), Some("x"), || async {
            tokio::time::sleep(Duration::from_millis(1000)).await;
            Ok::<_, ApiError>(())
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "x timed out after 500ms");
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_passes_through_fast_results() {
    let orchestrator = ResilienceOrchestrator::default();

    let value = orchestrator
        .execute_with_timeout(Duration::from_millis(500), None, || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, ApiError>(7)
        })
        .await
        .unwrap();
    assert_eq!(value, 7);

    let err = orchestrator
        .execute_with_timeout(Duration::from_millis(20), None, || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, ApiError>(7)
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Operation timed out after 20ms");

    let err = orchestrator
        .execute_with_timeout(Duration::from_millis(500), None, || async {
            Err::<(), _>(ApiError::http(404, "missing"))
        })
        .await
        .unwrap_err();
    assert_eq!(err.status, Some(404));
}

#[tokio::test]
async fn test_batch_with_one_failure() {
    let (orchestrator, _) = orchestrator(service(0, 10, 100));

    let ops: Vec<_> = (0..4u32)
        .map(|i| {
            move || async move {
                if i == 2 {
                    Err(ApiError::http(400, "bad input"))
                } else {
                    Ok(i * 10)
                }
            }
        })
        .collect();

    let result = orchestrator
        .execute_batch("svc", "bulk", ops, BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.success_count, 3);
    assert_eq!(result.failure_count, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].operation, "bulk");

    let mut values = result.results.clone();
    values.sort();
    assert_eq!(values, vec![0, 10, 30]);
}

type Nap = Pin<Box<dyn Future<Output = Result<u64, ApiError>> + Send>>;

/// Operations that succeed with their own latency after sleeping on `clock`
fn napping_ops(clock: &MockClock, latencies: &[u64]) -> Vec<impl FnMut() -> Nap> {
    latencies
        .iter()
        .map(|&ms| {
            let clock = clock.clone();
            move || {
                let clock = clock.clone();
                Box::pin(async move {
                    clock.sleep(Duration::from_millis(ms)).await;
                    Ok(ms)
                }) as Nap
            }
        })
        .collect()
}

#[tokio::test]
async fn test_batch_results_follow_completion_order() {
    let (orchestrator, clock) = orchestrator(service(0, 10, 100));

    let result = orchestrator
        .execute_batch(
            "svc",
            "bulk",
            napping_ops(&clock, &[300, 100, 200]),
            BatchOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.results, vec![100, 200, 300]);
    // Operations in one chunk run side by side
    assert_eq!(clock.elapsed(), Duration::from_millis(300));
}

#[tokio::test]
async fn test_batch_chunks_complete_in_sequence() {
    let (orchestrator, clock) = orchestrator(service(0, 10, 100));

    let result = orchestrator
        .execute_batch(
            "svc",
            "bulk",
            napping_ops(&clock, &[300, 100, 200]),
            BatchOptions::new().concurrency(2),
        )
        .await
        .unwrap();

    assert_eq!(result.results, vec![100, 300, 200]);
    assert_eq!(clock.elapsed(), Duration::from_millis(500));
}

#[tokio::test]
async fn test_health_reports_degraded_then_unhealthy() {
    let (orchestrator, _) = orchestrator(service(2, 10, 100));
    let calls = AtomicU32::new(0);

    call_once(&orchestrator, &calls, Ok("ok")).await.unwrap();
    let _ = call_once(&orchestrator, &calls, Err(ApiError::http(502, "bad gateway"))).await;

    let health = orchestrator.health_status();
    let svc = &health["svc"];
    assert_eq!(svc.success_rate, 0.25);
    assert_eq!(svc.status, HealthStatus::Degraded);
    assert_eq!(svc.circuit_breaker_state, CircuitBreakerState::Closed);
    assert_eq!(svc.last_error.as_ref().and_then(|e| e.status), Some(502));
    assert_eq!(orchestrator.overall_status(), HealthStatus::Degraded);

    // An open breaker outranks the success rate
    let (orchestrator, _) = orchestrator_with_threshold(3);
    call_once(&orchestrator, &calls, Ok("ok")).await.unwrap();
    let _ = call_once(&orchestrator, &calls, Err(ApiError::http(502, "bad gateway"))).await;

    let health = orchestrator.health_status();
    assert_eq!(health["svc"].success_rate, 0.25);
    assert_eq!(health["svc"].status, HealthStatus::Unhealthy);
    assert_eq!(health["svc"].circuit_breaker_state, CircuitBreakerState::Open);
}

fn orchestrator_with_threshold(threshold: u32) -> (ResilienceOrchestrator, MockClock) {
    orchestrator(service(2, threshold, 100))
}

#[tokio::test]
async fn test_services_are_isolated() {
    let clock = MockClock::new();
    let orchestrator = ResilienceOrchestrator::builder()
        .service("flaky", service(0, 1, 100))
        .service("steady", service(0, 1, 100))
        .clock(Arc::new(clock))
        .build()
        .unwrap();

    let _ = orchestrator
        .execute_with_retry("flaky", "op", || async { Err::<(), _>(ApiError::http(500, "x")) })
        .await;
    orchestrator
        .execute_with_retry("steady", "op", || async { Ok::<_, ApiError>(()) })
        .await
        .unwrap();

    assert_eq!(orchestrator.circuit_state("flaky"), Some(CircuitBreakerState::Open));
    assert_eq!(orchestrator.circuit_state("steady"), Some(CircuitBreakerState::Closed));
    assert_eq!(orchestrator.services(), vec!["flaky".to_string(), "steady".to_string()]);
    assert_eq!(orchestrator.all_metrics().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_state() {
    let orchestrator = Arc::new(
        ResilienceOrchestrator::builder()
            .service("shared", service(0, 1000, 1000))
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                for _ in 0..10 {
                    orchestrator
                        .execute_with_retry("shared", "op", || async { Ok::<_, ApiError>(()) })
                        .await
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let metrics = orchestrator.metrics("shared").unwrap();
    assert_eq!(metrics.total_requests, 160);
    assert_eq!(metrics.successful_requests, 160);
}
