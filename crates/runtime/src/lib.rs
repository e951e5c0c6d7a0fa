//! Breakwater runtime crate
//!
//! Wires the leaf components from `breakwater-common` into a running
//! monitor: typed configuration, the [`MonitorService`] lifecycle with
//! snapshot restore/saver and workflow reaper, the health report surface,
//! and the tracked-call wrapper.

pub mod config;
pub mod health;
pub mod service;
pub mod tracked;

pub use config::{ConfigError, MonitorConfig};
pub use health::HealthReport;
pub use service::{MonitorError, MonitorService};
pub use tracked::tracked;
