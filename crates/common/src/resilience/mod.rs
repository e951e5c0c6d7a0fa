//! Resilience primitives
//!
//! Circuit breaking and bounded retry for calls against unreliable external
//! dependencies, plus [`ResilientExecutor`] composing both per named
//! resource. An open circuit always fails fast; retries never burn attempts
//! against it.

pub mod circuit_breaker;
pub mod executor;
pub mod retry;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitOpenError,
    CircuitState, OwnedCallPermit,
};
pub use executor::{ExecuteError, ResilientExecutor};
pub use retry::{
    policies, RetryConfig, RetryConfigBuilder, RetryError, RetryExecutor, RetryPolicy,
};
