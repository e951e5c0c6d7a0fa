//! Workflow membership and event routing
//!
//! The event source is at-least-once and outlives individual workflows, so
//! every event must be attributed to a currently-registered workflow before
//! it may touch shared state. [`WorkflowRegistry`] tracks membership and
//! activity; [`EventRouter`] gates delivery and records outcome metrics.

pub mod events;
pub mod registry;

pub use events::{EventKind, EventRouter, ExecutionListener, PipelineEvent, SharedListener};
pub use registry::WorkflowRegistry;
