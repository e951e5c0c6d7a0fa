//! Snapshot persistence for the metric registry.
//!
//! Snapshots are best-effort: a failed save is logged by the caller and
//! the next interval tries again; a missing or corrupt file at startup
//! means a cold start, never a crash.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::registry::{MetricKey, MetricRegistry, MetricSample};
use crate::time::{Clock, SystemClock};

/// One persisted sample. `kind` stays a plain string so a snapshot written
/// by a newer version with an unknown kind degrades to "skipped" on
/// restore instead of failing the whole parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSample {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub kind: String,
    pub value: f64,
}

/// On-disk snapshot document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unix seconds at save time
    pub timestamp: u64,
    pub samples: Vec<SnapshotSample>,
}

/// Failure writing a snapshot. Load failures never surface as errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io failure: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of restoring a snapshot into a registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Samples applied to the registry
    pub restored: usize,
    /// Samples dropped (unknown kind, non-finite value)
    pub skipped: usize,
}

/// Persists registry exports to a JSON file with atomic replacement.
#[derive(Debug)]
pub struct SnapshotStore<C: Clock = SystemClock> {
    path: PathBuf,
    clock: C,
}

impl SnapshotStore<SystemClock> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, SystemClock)
    }
}

impl<C: Clock> SnapshotStore<C> {
    pub fn with_clock(path: impl Into<PathBuf>, clock: C) -> Self {
        Self { path: path.into(), clock }
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize the samples and replace the snapshot file atomically
    /// (write to a sibling temp file, then rename). A crash mid-save leaves
    /// the previous snapshot intact.
    pub fn save(&self, samples: &[(MetricKey, MetricSample)]) -> Result<(), SnapshotError> {
        let snapshot = Snapshot {
            timestamp: self.clock.unix_seconds(),
            samples: samples.iter().map(|(key, sample)| to_snapshot_sample(key, sample)).collect(),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let payload = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), samples = snapshot.samples.len(), "snapshot saved");
        Ok(())
    }

    /// Read the snapshot file. Missing or unparseable files are reported as
    /// `None`; the caller starts cold.
    pub fn load(&self) -> Option<Snapshot> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot file, starting cold");
                return None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "snapshot unreadable, starting cold");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "snapshot corrupt, starting cold");
                None
            }
        }
    }

    /// Age of the persisted snapshot, `None` when absent or unparseable.
    pub fn age(&self) -> Option<Duration> {
        let snapshot = self.load()?;
        let now = self.clock.unix_seconds();
        Some(Duration::from_secs(now.saturating_sub(snapshot.timestamp)))
    }

    /// Whether a restore should run: a snapshot exists and is younger than
    /// `max_age`.
    pub fn should_restore(&self, max_age: Duration) -> bool {
        self.age().is_some_and(|age| age < max_age)
    }

    /// Apply the persisted snapshot to a registry:
    /// - counters advance monotonically (never decrease a live total),
    /// - gauges take the persisted value (last observed wins),
    /// - histogram sums become one synthetic observation (count +1),
    /// - unknown kinds and non-finite values are skipped and tallied.
    pub fn restore_into(&self, registry: &MetricRegistry) -> RestoreReport {
        let Some(snapshot) = self.load() else {
            return RestoreReport::default();
        };

        let mut report = RestoreReport::default();
        for sample in snapshot.samples {
            if !sample.value.is_finite() {
                warn!(metric = %sample.name, "skipping non-finite snapshot value");
                report.skipped += 1;
                continue;
            }
            let key = MetricKey { name: sample.name, labels: sample.labels };
            match sample.kind.as_str() {
                "counter" => {
                    // Advance may be a no-op if the live value is already
                    // ahead; either way the sample was applied.
                    registry.advance_counter_to(key, sample.value);
                    report.restored += 1;
                }
                "gauge" => {
                    registry.set_gauge(key, sample.value);
                    report.restored += 1;
                }
                "histogram_sum" => {
                    registry.observe_histogram(key, sample.value);
                    report.restored += 1;
                }
                other => {
                    warn!(metric = %key, kind = other, "skipping unknown snapshot sample kind");
                    report.skipped += 1;
                }
            }
        }
        report
    }
}

fn to_snapshot_sample(key: &MetricKey, sample: &MetricSample) -> SnapshotSample {
    let (kind, value) = match sample {
        MetricSample::Counter(value) => ("counter", *value),
        MetricSample::Gauge(value) => ("gauge", *value),
        // Only the sum survives persistence; the count is reconstructed as
        // a single synthetic observation on restore.
        MetricSample::Histogram { sum, .. } => ("histogram_sum", *sum),
    };
    SnapshotSample {
        name: key.name.clone(),
        labels: key.labels.clone(),
        kind: kind.to_string(),
        value,
    }
}
