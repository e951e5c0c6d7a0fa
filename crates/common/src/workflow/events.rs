//! Event routing gated on workflow membership.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::metrics::{MetricKey, MetricRegistry};
use crate::time::{Clock, SystemClock};
use crate::workflow::registry::WorkflowRegistry;

/// Callbacks invoked for events attributed to a registered workflow.
///
/// Implementations must tolerate duplicate deliveries; the upstream event
/// source is at-least-once.
pub trait ExecutionListener: Send + Sync {
    fn on_started(&self, workflow_id: &str);
    fn on_completed(&self, workflow_id: &str, duration: Duration);
    fn on_failed(&self, workflow_id: &str, error_kind: &str);
}

/// Shared listener handle stored in the registry.
pub type SharedListener = Arc<dyn ExecutionListener>;

/// What happened to a workflow execution.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Started,
    Completed { duration: Duration },
    Failed { error_kind: String },
}

/// One event from the pipeline's event source.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEvent {
    pub workflow_id: String,
    pub kind: EventKind,
}

impl PipelineEvent {
    pub fn started(workflow_id: impl Into<String>) -> Self {
        Self { workflow_id: workflow_id.into(), kind: EventKind::Started }
    }

    pub fn completed(workflow_id: impl Into<String>, duration: Duration) -> Self {
        Self { workflow_id: workflow_id.into(), kind: EventKind::Completed { duration } }
    }

    pub fn failed(workflow_id: impl Into<String>, error_kind: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            kind: EventKind::Failed { error_kind: error_kind.into() },
        }
    }
}

/// Routes pipeline events to registered listeners and the metric registry.
///
/// Every dispatch is gated on current membership, and membership is
/// re-checked after listener delivery before any metric is mutated, so an
/// unregister racing a slow handler cannot leak a stale workflow's metrics.
#[derive(Clone)]
pub struct EventRouter<C: Clock = SystemClock> {
    workflows: Arc<WorkflowRegistry<SharedListener, C>>,
    registry: Arc<MetricRegistry>,
}

impl<C: Clock> EventRouter<C> {
    pub fn new(
        workflows: Arc<WorkflowRegistry<SharedListener, C>>,
        registry: Arc<MetricRegistry>,
    ) -> Self {
        Self { workflows, registry }
    }

    /// Deliver one event. Returns whether it was accepted; stale, duplicate
    /// or cross-workflow events are dropped and counted, never errors.
    pub fn dispatch(&self, event: &PipelineEvent) -> bool {
        let id = event.workflow_id.as_str();
        if !self.workflows.is_active(id) {
            self.record_dropped("inactive");
            debug!(workflow_id = %id, "dropped event for inactive workflow");
            return false;
        }
        self.workflows.touch(id);

        let Some(listener) = self.workflows.get_listener(id) else {
            self.record_dropped("unregistered_midflight");
            return false;
        };

        match &event.kind {
            EventKind::Started => listener.on_started(id),
            EventKind::Completed { duration } => listener.on_completed(id, *duration),
            EventKind::Failed { error_kind } => listener.on_failed(id, error_kind),
        }

        // The listener may have run long; only still-registered workflows
        // get to mutate shared metrics.
        if !self.workflows.is_active(id) {
            self.record_dropped("unregistered_midflight");
            return false;
        }
        self.record_metrics(event);
        true
    }

    fn record_metrics(&self, event: &PipelineEvent) {
        let id = event.workflow_id.as_str();
        match &event.kind {
            EventKind::Started => {
                self.registry.increment_counter(
                    MetricKey::new("pipeline_workflow_events_total")
                        .with_label("workflow_id", id)
                        .with_label("event", "started"),
                    1.0,
                );
            }
            EventKind::Completed { duration } => {
                self.registry.increment_counter(
                    MetricKey::new("pipeline_workflow_executions_total")
                        .with_label("workflow_id", id)
                        .with_label("status", "success"),
                    1.0,
                );
                self.registry.observe_histogram(
                    MetricKey::new("pipeline_workflow_duration_seconds")
                        .with_label("workflow_id", id),
                    duration.as_secs_f64(),
                );
                self.registry.set_gauge(
                    MetricKey::new("pipeline_workflow_success_rate").with_label("workflow_id", id),
                    1.0,
                );
            }
            EventKind::Failed { error_kind } => {
                self.registry.increment_counter(
                    MetricKey::new("pipeline_workflow_executions_total")
                        .with_label("workflow_id", id)
                        .with_label("status", "failure"),
                    1.0,
                );
                self.registry.set_gauge(
                    MetricKey::new("pipeline_workflow_success_rate").with_label("workflow_id", id),
                    0.0,
                );
                self.registry.increment_counter(
                    MetricKey::new("pipeline_workflow_errors_total")
                        .with_label("workflow_id", id)
                        .with_label("error_kind", error_kind),
                    1.0,
                );
            }
        }
    }

    fn record_dropped(&self, reason: &str) {
        self.registry.increment_counter(
            MetricKey::new("pipeline_dropped_events_total").with_label("reason", reason),
            1.0,
        );
    }
}
