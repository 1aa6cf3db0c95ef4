//! Lazily populated per-service state
//!
//! Each service key owns one bundle: a breaker, a limiter, a metrics record
//! and the retry settings that apply to it. Bundles are created on first use
//! and live as long as the registry.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::config::{ResilienceConfig, RetryConfig};
use crate::metrics::ApiMetrics;
use crate::patterns::{CircuitBreaker, RateLimiter};

/// State owned by one service key
#[derive(Debug)]
pub struct ServiceEntry {
    pub breaker: CircuitBreaker,
    pub limiter: RateLimiter,
    pub metrics: Mutex<ApiMetrics>,
    pub retry: RetryConfig,
}

impl ServiceEntry {
    fn new(key: &str, config: &ResilienceConfig, clock: Arc<dyn Clock>) -> Self {
        let service = config.service_config(key);
        Self {
            breaker: CircuitBreaker::new(key, service.circuit_breaker, clock.clone()),
            limiter: RateLimiter::new(key, service.rate_limit, clock),
            metrics: Mutex::new(ApiMetrics::new()),
            retry: service.retry,
        }
    }

    pub fn metrics_snapshot(&self) -> ApiMetrics {
        self.metrics.lock().clone()
    }
}

/// Service key to state bundle
pub struct ServiceRegistry {
    config: Arc<ResilienceConfig>,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, Arc<ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new(config: Arc<ResilienceConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: DashMap::new(),
        }
    }

    /// Bundle for `key`, created from the configuration on first use.
    ///
    /// Racing callers for a new key all receive the same bundle.
    pub fn get_or_create(&self, key: &str) -> Arc<ServiceEntry> {
        if let Some(entry) = self.entries.get(key) {
            return entry.value().clone();
        }

        self.entries
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!("Creating resilience state for service '{}'", key);
                Arc::new(ServiceEntry::new(key, &self.config, self.clock.clone()))
            })
            .value()
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<ServiceEntry>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Known service keys in sorted order
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Snapshot of every bundle, sorted by key
    pub fn entries(&self) -> Vec<(String, Arc<ServiceEntry>)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
