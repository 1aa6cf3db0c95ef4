//! Bounded-concurrency batch execution
//!
//! Operations are split into chunks of `concurrency`. Every operation of a
//! chunk runs through [`ResilienceOrchestrator::execute_with_retry`] at the
//! same time, and the next chunk starts only once the current one has
//! settled. Results are gathered in completion order within each chunk.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, warn};

use crate::config::DEFAULT_BATCH_CONCURRENCY;
use crate::error::ApiError;
use crate::orchestrator::ResilienceOrchestrator;

/// Options for [`ResilienceOrchestrator::execute_batch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Operations in flight at once; 0 is treated as 1
    pub concurrency: usize,
    /// Return the first failure instead of finishing the batch
    pub fail_fast: bool,
    /// Keep failed attempts' errors in the result
    pub collect_errors: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_BATCH_CONCURRENCY,
            fail_fast: false,
            collect_errors: true,
        }
    }
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn collect_errors(mut self, collect: bool) -> Self {
        self.collect_errors = collect;
        self
    }
}

/// Outcome of a batch that ran to completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult<T> {
    /// Successful values in completion order
    pub results: Vec<T>,
    /// Failures, when collected
    pub errors: Vec<ApiError>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            errors: Vec::new(),
            success_count: 0,
            failure_count: 0,
        }
    }
}

impl<T> BatchResult<T> {
    pub fn total(&self) -> usize {
        self.success_count + self.failure_count
    }

    pub fn is_complete_success(&self) -> bool {
        self.failure_count == 0
    }
}

impl ResilienceOrchestrator {
    /// Run every operation through the retry path with bounded concurrency.
    ///
    /// With `fail_fast` the first failure is returned and operations still in
    /// flight in its chunk are dropped; later chunks never start.
    pub async fn execute_batch<F, Fut, T, E>(
        &self,
        service_key: &str,
        operation_name: &str,
        operations: Vec<F>,
        options: BatchOptions,
    ) -> Result<BatchResult<T>, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ApiError>,
    {
        let concurrency = options.concurrency.max(1);
        let total = operations.len();
        let mut batch = BatchResult::default();
        let mut remaining = operations.into_iter();

        debug!(
            "Running batch of {} {} operations on {} with concurrency {}",
            total, operation_name, service_key, concurrency
        );

        loop {
            let mut in_flight: FuturesUnordered<_> = remaining
                .by_ref()
                .take(concurrency)
                .map(|operation| self.execute_with_retry(service_key, operation_name, operation))
                .collect();

            if in_flight.is_empty() {
                break;
            }

            while let Some(outcome) = in_flight.next().await {
                match outcome {
                    Ok(value) => {
                        batch.results.push(value);
                        batch.success_count += 1;
                    }
                    Err(error) if options.fail_fast => {
                        warn!(
                            "Batch {} on {} aborted after {} of {} operations: {}",
                            operation_name,
                            service_key,
                            batch.total() + 1,
                            total,
                            error
                        );
                        return Err(error);
                    }
                    Err(error) => {
                        batch.failure_count += 1;
                        if options.collect_errors {
                            batch.errors.push(error);
                        }
                    }
                }
            }
        }

        debug!(
            "Batch {} on {} finished: {} succeeded, {} failed",
            operation_name, service_key, batch.success_count, batch.failure_count
        );
        Ok(batch)
    }
}
