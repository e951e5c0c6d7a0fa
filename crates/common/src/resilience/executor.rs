//! Resilient execution: named circuit breakers composed with retry.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::error::ErrorClassification;
use crate::metrics::{MetricKey, MetricRegistry};
use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitOpenError,
};
use crate::resilience::retry::{policies, RetryConfig, RetryError, RetryExecutor};
use crate::time::{Clock, SystemClock};

/// Terminal outcome of a guarded execution.
#[derive(Debug, Error)]
pub enum ExecuteError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The circuit refused admission; the operation was not attempted
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Every admitted attempt failed with a retryable error
    #[error("'{resource}' failed after {attempts} attempts")]
    RetriesExhausted {
        resource: String,
        attempts: u32,
        #[source]
        source: E,
    },

    /// The failure was classified non-retryable
    #[error("'{resource}' failed with a non-retryable error")]
    NonRetryable {
        resource: String,
        #[source]
        source: E,
    },
}

/// Per-attempt outcome inside the retry loop. Open-circuit refusals are
/// synthetic and must never count as resource failures, so they travel in
/// their own variant.
#[derive(Debug, Error)]
enum AttemptError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error(transparent)]
    Open(CircuitOpenError),

    #[error(transparent)]
    Inner(E),
}

/// Executes operations against named resources under a circuit breaker and
/// a retry loop.
///
/// Breakers are created lazily per resource name and live for the process.
/// Each retried attempt individually acquires the breaker and reports its
/// outcome; an open circuit fails the whole execution fast instead of
/// burning retry attempts. Error-kind aggregates land in the shared
/// [`MetricRegistry`] and an in-memory stats map.
#[derive(Debug)]
pub struct ResilientExecutor<C: Clock + Clone = SystemClock> {
    breakers: DashMap<String, Arc<CircuitBreaker<C>>>,
    registry: Arc<MetricRegistry>,
    error_counts: DashMap<String, u64>,
    breaker_config: CircuitBreakerConfig,
    retry_config: RetryConfig,
    clock: C,
}

impl ResilientExecutor<SystemClock> {
    pub fn new(
        registry: Arc<MetricRegistry>,
        breaker_config: CircuitBreakerConfig,
        retry_config: RetryConfig,
    ) -> Self {
        Self::with_clock(registry, breaker_config, retry_config, SystemClock)
    }
}

impl<C: Clock + Clone> ResilientExecutor<C> {
    pub fn with_clock(
        registry: Arc<MetricRegistry>,
        breaker_config: CircuitBreakerConfig,
        retry_config: RetryConfig,
        clock: C,
    ) -> Self {
        Self {
            breakers: DashMap::new(),
            registry,
            error_counts: DashMap::new(),
            breaker_config,
            retry_config,
            clock,
        }
    }

    /// Run `operation` against `resource` with the executor's default retry
    /// configuration.
    pub async fn execute<F, Fut, T, E>(
        &self,
        resource: &str,
        operation: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: ErrorClassification + std::error::Error + Send + Sync + 'static,
    {
        self.execute_with_config(resource, self.retry_config.clone(), operation).await
    }

    /// Run `operation` against `resource` with an explicit retry
    /// configuration for this call only.
    #[instrument(skip(self, retry_config, operation), fields(resource = resource))]
    pub async fn execute_with_config<F, Fut, T, E>(
        &self,
        resource: &str,
        retry_config: RetryConfig,
        mut operation: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: ErrorClassification + std::error::Error + Send + Sync + 'static,
    {
        let breaker = self.breaker(resource);

        // Open-circuit refusals are non-retryable; inner errors follow
        // their own classification.
        let policy = policies::PredicateRetry::new(|error: &AttemptError<E>| match error {
            AttemptError::Open(_) => false,
            AttemptError::Inner(inner) => inner.is_retryable(),
        });
        let retry = RetryExecutor::with_policy(retry_config, policy);

        let result = retry
            .execute(|| {
                // Admission and operation construction happen before the
                // future is built so a refused attempt never invokes the
                // operation at all.
                let attempt = match breaker.try_acquire_owned() {
                    Ok(permit) => Ok((permit, operation())),
                    Err(refused) => Err(refused),
                };
                async move {
                    match attempt {
                        Ok((permit, fut)) => match fut.await {
                            Ok(value) => {
                                permit.success();
                                Ok(value)
                            }
                            Err(error) => {
                                permit.failure();
                                Err(AttemptError::Inner(error))
                            }
                        },
                        Err(refused) => Err(AttemptError::Open(refused)),
                    }
                }
            })
            .await;

        self.finish(resource, result)
    }

    /// Map the retry outcome to the public error type and record metrics.
    /// Runs strictly after every breaker lock is released.
    fn finish<T, E>(
        &self,
        resource: &str,
        result: Result<T, RetryError<AttemptError<E>>>,
    ) -> Result<T, ExecuteError<E>>
    where
        E: ErrorClassification + std::error::Error + Send + Sync + 'static,
    {
        match result {
            Ok(value) => {
                self.record_outcome(resource, "success");
                Ok(value)
            }
            Err(RetryError::NonRetryable { source: AttemptError::Open(open) })
            | Err(RetryError::Exhausted { source: AttemptError::Open(open), .. }) => {
                self.record_outcome(resource, "circuit_open");
                debug!(resource, "execution refused by open circuit");
                Err(ExecuteError::CircuitOpen(open))
            }
            Err(RetryError::Exhausted { attempts, source: AttemptError::Inner(source) }) => {
                self.record_outcome(resource, "failure");
                self.record_error(resource, &source);
                Err(ExecuteError::RetriesExhausted {
                    resource: resource.to_string(),
                    attempts,
                    source,
                })
            }
            Err(RetryError::NonRetryable { source: AttemptError::Inner(source) }) => {
                self.record_outcome(resource, "failure");
                self.record_error(resource, &source);
                Err(ExecuteError::NonRetryable { resource: resource.to_string(), source })
            }
        }
    }

    fn record_outcome(&self, resource: &str, outcome: &str) {
        self.registry.increment_counter(
            MetricKey::new("resilient_calls_total")
                .with_label("resource", resource)
                .with_label("outcome", outcome),
            1.0,
        );
    }

    fn record_error<E: ErrorClassification>(&self, resource: &str, error: &E) {
        let kind = error.kind();
        *self.error_counts.entry(kind.to_string()).or_insert(0) += 1;
        self.registry.increment_counter(
            MetricKey::new("resource_errors_total")
                .with_label("resource", resource)
                .with_label("kind", kind),
            1.0,
        );
    }

    /// Breaker for `resource`, created on first use.
    pub fn breaker(&self, resource: &str) -> Arc<CircuitBreaker<C>> {
        if let Some(existing) = self.breakers.get(resource) {
            return Arc::clone(&existing);
        }
        Arc::clone(&self.breakers.entry(resource.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::with_clock(
                resource,
                self.breaker_config.clone(),
                self.clock.clone(),
            ))
        }))
    }

    /// Status of one breaker, `None` when the resource was never called.
    pub fn breaker_status(&self, resource: &str) -> Option<CircuitBreakerStatus> {
        self.breakers.get(resource).map(|breaker| breaker.status())
    }

    /// Statuses of every known breaker, sorted by resource name.
    pub fn all_statuses(&self) -> Vec<CircuitBreakerStatus> {
        let mut statuses: Vec<CircuitBreakerStatus> =
            self.breakers.iter().map(|entry| entry.value().status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Aggregate error counts per classification kind.
    pub fn error_counts(&self) -> BTreeMap<String, u64> {
        self.error_counts.iter().map(|entry| (entry.key().clone(), *entry.value())).collect()
    }

    /// Shared metric registry the executor records into.
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }
}
