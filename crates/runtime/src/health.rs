//! Serializable health surface.

use std::collections::BTreeMap;

use breakwater_common::resilience::CircuitBreakerStatus;
use serde::Serialize;

/// Point-in-time view of the monitor for external health checks.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// Status of every breaker that has seen traffic, sorted by resource
    pub breakers: Vec<CircuitBreakerStatus>,
    /// Aggregate error counts per classification kind
    pub error_counts: BTreeMap<String, u64>,
    /// Workflows currently in flight
    pub active_workflow_count: usize,
    pub active_workflow_ids: Vec<String>,
    /// Age of the last persisted snapshot, absent before the first save
    pub snapshot_age_secs: Option<u64>,
}
