//! Breakwater common crate
//!
//! Leaf components shared by the runtime: error classification, clock
//! abstraction, the in-memory metric registry with snapshot persistence,
//! circuit breaking + retry, and workflow membership tracking.
//!
//! Nothing in this crate composes anything else into a running service;
//! that wiring lives in `breakwater-runtime`.

pub mod error;
pub mod metrics;
pub mod resilience;
pub mod time;
pub mod workflow;

pub use error::{ErrorClassification, ErrorSeverity, ResourceError};
pub use metrics::{MetricKey, MetricRegistry, MetricSample, RestoreReport, Snapshot, SnapshotStore};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState, ExecuteError,
    ResilientExecutor, RetryConfig, RetryError, RetryExecutor,
};
pub use time::{Clock, MockClock, SystemClock};
pub use workflow::{EventKind, EventRouter, ExecutionListener, PipelineEvent, WorkflowRegistry};
