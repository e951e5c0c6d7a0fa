//! Metric registry: keys, samples, and atomic per-key mutation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::warn;

/// Identity of a metric series: name plus the full label set.
///
/// Labels are kept in a `BTreeMap` so equal label sets hash and render
/// identically regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl MetricKey {
    /// Key with no labels.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), labels: BTreeMap::new() }
    }

    /// Add a label, builder style.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Render the label set as `k1="v1",k2="v2"` in key order.
    pub fn label_string(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}=\"{v}\""))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.labels.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{{{}}}", self.name, self.label_string())
        }
    }
}

/// Point-in-time value of one metric series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricSample {
    /// Monotonically increasing total
    Counter(f64),
    /// Last-observed value
    Gauge(f64),
    /// Sum and count of observations (no buckets)
    Histogram { sum: f64, count: u64 },
}

/// f64 stored as raw bits in an `AtomicU64`, mutated via CAS loops.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    /// Add `delta`, linearizable: concurrent adds never lose updates.
    fn fetch_add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Raise the value to `floor` if it is currently lower. Returns whether
    /// the stored value changed.
    fn fetch_max(&self, floor: f64) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if f64::from_bits(current) >= floor {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                floor.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

#[derive(Debug, Default)]
struct HistogramCell {
    sum: AtomicF64,
    count: AtomicU64,
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Concurrent metric store with one map per sample kind.
///
/// Unknown keys are created on first write; reads of absent keys return
/// zero/`None`. Writers of unrelated keys never contend.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    counters: DashMap<MetricKey, AtomicF64>,
    gauges: DashMap<MetricKey, AtomicF64>,
    histograms: DashMap<MetricKey, HistogramCell>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to a counter. Negative deltas are rejected (counters are
    /// monotonic) and logged rather than surfaced as errors.
    pub fn increment_counter(&self, key: MetricKey, delta: f64) {
        if delta < 0.0 || !delta.is_finite() {
            warn!(metric = %key, delta, "rejected non-monotonic counter increment");
            return;
        }
        self.counters.entry(key).or_default().fetch_add(delta);
    }

    /// Current counter total, `0.0` when the key has never been written.
    pub fn counter_value(&self, key: &MetricKey) -> f64 {
        self.counters.get(key).map(|cell| cell.load()).unwrap_or(0.0)
    }

    /// Raise a counter to at least `value`, creating it if absent. Used by
    /// snapshot restore; never decreases the live total. Returns whether the
    /// stored value moved.
    pub fn advance_counter_to(&self, key: MetricKey, value: f64) -> bool {
        if value < 0.0 || !value.is_finite() {
            warn!(metric = %key, value, "rejected counter advance to invalid value");
            return false;
        }
        self.counters.entry(key).or_default().fetch_max(value)
    }

    /// Overwrite a gauge with the latest observation.
    pub fn set_gauge(&self, key: MetricKey, value: f64) {
        if !value.is_finite() {
            warn!(metric = %key, value, "rejected non-finite gauge value");
            return;
        }
        self.gauges.entry(key).or_default().store(value);
    }

    /// Current gauge value, `None` when never set.
    pub fn gauge_value(&self, key: &MetricKey) -> Option<f64> {
        self.gauges.get(key).map(|cell| cell.load())
    }

    /// Record one histogram observation (sum += value, count += 1).
    pub fn observe_histogram(&self, key: MetricKey, value: f64) {
        if !value.is_finite() {
            warn!(metric = %key, value, "rejected non-finite histogram observation");
            return;
        }
        let cell = self.histograms.entry(key).or_default();
        cell.sum.fetch_add(value);
        cell.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Current histogram aggregate as `(sum, count)`, `None` when never
    /// observed.
    pub fn histogram_value(&self, key: &MetricKey) -> Option<(f64, u64)> {
        self.histograms
            .get(key)
            .map(|cell| (cell.sum.load(), cell.count.load(Ordering::Acquire)))
    }

    /// Snapshot of every series, sorted by name then rendered label string
    /// so consumers see a deterministic order.
    pub fn export(&self) -> Vec<(MetricKey, MetricSample)> {
        let mut samples: Vec<(MetricKey, MetricSample)> = Vec::with_capacity(
            self.counters.len() + self.gauges.len() + self.histograms.len(),
        );
        for entry in self.counters.iter() {
            samples.push((entry.key().clone(), MetricSample::Counter(entry.value().load())));
        }
        for entry in self.gauges.iter() {
            samples.push((entry.key().clone(), MetricSample::Gauge(entry.value().load())));
        }
        for entry in self.histograms.iter() {
            samples.push((
                entry.key().clone(),
                MetricSample::Histogram {
                    sum: entry.value().sum.load(),
                    count: entry.value().count.load(Ordering::Acquire),
                },
            ));
        }
        samples.sort_by(|(a, _), (b, _)| {
            a.name.cmp(&b.name).then_with(|| a.label_string().cmp(&b.label_string()))
        });
        samples
    }
}
