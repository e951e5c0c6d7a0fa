//! Monitor service lifecycle.
//!
//! `MonitorService` owns the registry, snapshot store, workflow registry,
//! and resilient executor, and runs two background tasks: a periodic
//! snapshot saver and a periodic workflow reaper. Persistence failures are
//! logged and never stop the service.

use std::sync::Arc;
use std::time::Duration;

use breakwater_common::metrics::{MetricRegistry, SnapshotStore};
use breakwater_common::resilience::ResilientExecutor;
use breakwater_common::workflow::{EventRouter, PipelineEvent, SharedListener, WorkflowRegistry};
use rand::Rng;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, MonitorConfig};
use crate::health::HealthReport;

/// Failure bringing the monitor up or down.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Running monitor: shared components plus background maintenance tasks.
pub struct MonitorService {
    registry: Arc<MetricRegistry>,
    store: Arc<SnapshotStore>,
    workflows: Arc<WorkflowRegistry<SharedListener>>,
    executor: Arc<ResilientExecutor>,
    router: EventRouter,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorService {
    /// Validate the config, build the components, restore the last
    /// snapshot when fresh enough, and spawn the maintenance tasks.
    pub fn open(config: MonitorConfig) -> Result<Self, MonitorError> {
        config.validate()?;

        let registry = Arc::new(MetricRegistry::new());
        let store = Arc::new(SnapshotStore::new(&config.snapshot_path));
        let workflows: Arc<WorkflowRegistry<SharedListener>> = Arc::new(WorkflowRegistry::new());
        let executor = Arc::new(ResilientExecutor::new(
            Arc::clone(&registry),
            config.breaker_config(),
            config.retry_config(),
        ));
        let router = EventRouter::new(Arc::clone(&workflows), Arc::clone(&registry));

        if store.should_restore(config.snapshot_max_age()) {
            let report = store.restore_into(&registry);
            info!(
                restored = report.restored,
                skipped = report.skipped,
                "metrics restored from snapshot"
            );
        } else {
            info!(path = %config.snapshot_path.display(), "no usable snapshot, starting cold");
        }

        let (shutdown, _) = watch::channel(false);
        let tasks = vec![
            spawn_saver(
                Arc::clone(&registry),
                Arc::clone(&store),
                config.snapshot_interval(),
                shutdown.subscribe(),
            ),
            spawn_reaper(
                Arc::clone(&workflows),
                config.sweep_interval(),
                config.workflow_max_inactive(),
                shutdown.subscribe(),
            ),
        ];

        Ok(Self { registry, store, workflows, executor, router, shutdown, tasks })
    }

    /// Stop the maintenance tasks and write a final snapshot. A failed
    /// final save is logged; shutdown still succeeds.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "maintenance task ended abnormally");
            }
        }
        if let Err(err) = self.store.save(&self.registry.export()) {
            warn!(error = %err, "final snapshot save failed");
        } else {
            info!("final snapshot saved");
        }
    }

    /// Route one pipeline event. Returns whether it was accepted.
    pub fn dispatch(&self, event: &PipelineEvent) -> bool {
        self.router.dispatch(event)
    }

    /// Current health view of the monitor.
    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            breakers: self.executor.all_statuses(),
            error_counts: self.executor.error_counts(),
            active_workflow_count: self.workflows.active_count(),
            active_workflow_ids: self.workflows.active_ids(),
            snapshot_age_secs: self.store.age().map(|age| age.as_secs()),
        }
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn workflows(&self) -> &Arc<WorkflowRegistry<SharedListener>> {
        &self.workflows
    }

    pub fn executor(&self) -> &Arc<ResilientExecutor> {
        &self.executor
    }

    pub fn snapshot_store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }
}

/// Periodic snapshot saver. Skips missed ticks instead of bursting after a
/// stall; a failed save is retried at the next tick.
fn spawn_saver(
    registry: Arc<MetricRegistry>,
    store: Arc<SnapshotStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = store.save(&registry.export()) {
                        warn!(error = %err, "periodic snapshot save failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("snapshot saver stopping");
                    return;
                }
            }
        }
    })
}

/// Periodic workflow reaper. The interval carries ±10% jitter so multiple
/// monitors sharing a host do not sweep in lockstep.
fn spawn_reaper(
    workflows: Arc<WorkflowRegistry<SharedListener>>,
    interval: Duration,
    max_inactive: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let jitter = rand::thread_rng().gen_range(-0.1..0.1);
            let delay =
                Duration::from_secs_f64((interval.as_secs_f64() * (1.0 + jitter)).max(0.0));
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let removed = workflows.sweep(max_inactive);
                    if !removed.is_empty() {
                        info!(count = removed.len(), ids = ?removed, "swept inactive workflows");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("workflow reaper stopping");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    //! Unit tests for service.
    use super::*;

    /// Validates `MonitorService::open` behavior for the invalid config
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures an invalid config is rejected before any task spawns.
    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let config = MonitorConfig { snapshot_interval_secs: 0, ..Default::default() };
        assert!(matches!(MonitorService::open(config), Err(MonitorError::Config(_))));
    }

    /// Validates `MonitorService::open` / `close` behavior for the cold
    /// start scenario.
    ///
    /// Assertions:
    /// - Confirms the service opens with no snapshot present.
    /// - Confirms close writes a final snapshot to the configured path.
    #[tokio::test]
    async fn test_cold_start_and_final_save() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = MonitorConfig {
            snapshot_path: dir.path().join("snapshot.json"),
            ..Default::default()
        };

        let service = MonitorService::open(config.clone()).unwrap();
        assert!(service.health_report().snapshot_age_secs.is_none());

        service.registry().increment_counter(
            breakwater_common::metrics::MetricKey::new("calls_total"),
            3.0,
        );
        service.close().await;

        let store = SnapshotStore::new(&config.snapshot_path);
        let snapshot = store.load().unwrap();
        assert_eq!(snapshot.samples.len(), 1);
        assert_eq!(snapshot.samples[0].value, 3.0);
    }
}
