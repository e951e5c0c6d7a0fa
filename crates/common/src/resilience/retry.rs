//! Bounded retry with exponential backoff.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Retry bounds and backoff shape.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first (never zero)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Double the delay each attempt when true, fixed `base_delay` when not
    pub exponential: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential: true,
        }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Delay to sleep after the failure of `attempt` (1-based):
    /// `min(base · 2^(attempt-1), max)` when exponential, else `base`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.checked_mul(factor).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.base_delay > self.max_delay {
            return Err("base_delay must not exceed max_delay".to_string());
        }
        Ok(())
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn fixed_backoff(mut self) -> Self {
        self.config.exponential = false;
        self
    }

    pub fn build(self) -> Result<RetryConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Decides whether a given failure is worth another attempt.
pub trait RetryPolicy<E>: Send + Sync {
    /// `attempt` is the 1-based attempt that just failed.
    fn should_retry(&self, error: &E, attempt: u32) -> bool;
}

/// Stock policies.
pub mod policies {
    use super::RetryPolicy;
    use crate::error::ErrorClassification;

    /// Retry every failure until attempts run out.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> bool {
            true
        }
    }

    /// Never retry; the first failure propagates.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> bool {
            false
        }
    }

    /// Retry when the supplied predicate says so.
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<E, F> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E) -> bool + Send + Sync,
    {
        fn should_retry(&self, error: &E, _attempt: u32) -> bool {
            (self.predicate)(error)
        }
    }

    /// Retry based on the error's own classification.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Classified;

    impl<E: ErrorClassification> RetryPolicy<E> for Classified {
        fn should_retry(&self, error: &E, _attempt: u32) -> bool {
            error.is_retryable()
        }
    }
}

/// Terminal retry outcome, preserving the last underlying error.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Every attempt failed with a retryable error
    #[error("operation failed after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The policy refused to retry the failure
    #[error("operation failed with a non-retryable error")]
    NonRetryable {
        #[source]
        source: E,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The underlying error, regardless of how retrying ended.
    pub fn into_source(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source } => source,
        }
    }
}

/// Runs an async operation under a retry policy.
///
/// The final attempt's failure propagates immediately without a trailing
/// sleep, and non-retryable failures propagate on the spot.
#[derive(Debug)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl RetryExecutor<policies::Classified> {
    /// Executor retrying per the error's own
    /// [`ErrorClassification`](crate::error::ErrorClassification).
    pub fn classified(config: RetryConfig) -> Self {
        Self::with_policy(config, policies::Classified)
    }
}

impl<P> RetryExecutor<P> {
    pub fn with_policy(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` up to `max_attempts` times.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
        P: RetryPolicy<E>,
    {
        let mut attempt = 1u32;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.policy.should_retry(&error, attempt) {
                        return Err(RetryError::NonRetryable { source: error });
                    }
                    if attempt >= self.config.max_attempts {
                        return Err(RetryError::Exhausted { attempts: attempt, source: error });
                    }
                    let delay = self.config.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for resilience::retry.
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::{ErrorClassification, ResourceError};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig::builder()
            .max_attempts(max_attempts)
            .base_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(4))
            .build()
            .unwrap()
    }

    /// Validates `RetryConfig::delay_for_attempt` behavior for the
    /// exponential backoff scenario.
    ///
    /// Assertions:
    /// - Confirms delays double per attempt: base, 2x, 4x.
    /// - Confirms the delay caps at `max_delay`.
    #[test]
    fn test_exponential_backoff_with_cap() {
        let config = RetryConfig::builder()
            .max_attempts(10)
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5))
            .build()
            .unwrap();

        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(30), Duration::from_secs(5));
    }

    /// Validates `RetryConfig::delay_for_attempt` behavior for the fixed
    /// backoff scenario.
    ///
    /// Assertions:
    /// - Confirms every delay equals `base_delay` when exponential is off.
    #[test]
    fn test_fixed_backoff() {
        let config = RetryConfig::builder()
            .base_delay(Duration::from_millis(250))
            .fixed_backoff()
            .build()
            .unwrap();
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(config.delay_for_attempt(7), Duration::from_millis(250));
    }

    /// Validates `RetryConfigBuilder::build` behavior for the invalid
    /// configuration scenario.
    ///
    /// Assertions:
    /// - Ensures zero attempts and base > max are rejected.
    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::builder().max_attempts(0).build().is_err());
        assert!(RetryConfig::builder()
            .base_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(1))
            .build()
            .is_err());
    }

    /// Validates `RetryExecutor::execute` behavior for the
    /// succeed-before-exhaustion scenario.
    ///
    /// Assertions:
    /// - Confirms the operation runs until the first success.
    /// - Confirms the success value is returned.
    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let executor = RetryExecutor::classified(fast_config(5));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in_op = Arc::clone(&calls);
        let result = executor
            .execute(move || {
                let calls = Arc::clone(&calls_in_op);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ResourceError::transient("api", "flaky"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// Validates `RetryExecutor::execute` behavior for the attempt budget
    /// scenario (3 attempts, 2 sleeps).
    ///
    /// Assertions:
    /// - Confirms a persistent transient failure runs exactly 3 attempts.
    /// - Confirms tokio's paused clock advances by exactly two backoff
    ///   delays (no sleep after the final attempt).
    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_runs_exact_attempts_without_trailing_sleep() {
        let config = RetryConfig::builder()
            .max_attempts(3)
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(60))
            .build()
            .unwrap();
        let executor = RetryExecutor::classified(config);
        let calls = Arc::new(AtomicU32::new(0));

        let start = tokio::time::Instant::now();
        let calls_in_op = Arc::clone(&calls);
        let result: Result<(), _> = executor
            .execute(move || {
                let calls = Arc::clone(&calls_in_op);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ResourceError::transient("api", "still down"))
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two sleeps: 1s after attempt 1, 2s after attempt 2.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    /// Validates `RetryExecutor::execute` behavior for the non-retryable
    /// short-circuit scenario.
    ///
    /// Assertions:
    /// - Confirms a permanent failure propagates after exactly one attempt.
    /// - Confirms the source error is preserved.
    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let executor = RetryExecutor::classified(fast_config(5));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in_op = Arc::clone(&calls);
        let result: Result<(), _> = executor
            .execute(move || {
                let calls = Arc::clone(&calls_in_op);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ResourceError::permanent("api", "bad credentials"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(RetryError::NonRetryable { source }) => {
                assert_eq!(source.kind(), "permanent");
            }
            other => panic!("expected NonRetryable, got {other:?}"),
        }
    }

    /// Validates `policies::PredicateRetry` behavior for the custom policy
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the predicate overrides the error's own classification.
    #[tokio::test]
    async fn test_predicate_policy() {
        let policy = policies::PredicateRetry::new(|_: &ResourceError| false);
        let executor = RetryExecutor::with_policy(fast_config(5), policy);

        let result: Result<(), _> = executor
            .execute(|| async { Err(ResourceError::transient("api", "flaky")) })
            .await;
        assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
    }

    /// Validates `RetryError::into_source` behavior for the error unwrapping
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the original error survives both terminal variants.
    #[test]
    fn test_into_source() {
        let exhausted = RetryError::Exhausted {
            attempts: 3,
            source: ResourceError::transient("api", "down"),
        };
        assert_eq!(exhausted.into_source().kind(), "transient");

        let non_retryable =
            RetryError::NonRetryable { source: ResourceError::permanent("api", "bad") };
        assert_eq!(non_retryable.into_source().kind(), "permanent");
    }
}
