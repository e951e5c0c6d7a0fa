//! In-memory metric registry with restart-durable snapshots
//!
//! The registry holds three metric families (counters, gauges, histogram
//! aggregates) keyed by name + label set, mutated lock-free per key. The
//! snapshot store persists the exported samples to a JSON file atomically
//! and restores them at startup without ever decreasing a live counter.

pub mod export;
pub mod registry;
pub mod snapshot;

pub use export::render_text;
pub use registry::{MetricKey, MetricRegistry, MetricSample};
pub use snapshot::{RestoreReport, Snapshot, SnapshotError, SnapshotSample, SnapshotStore};
