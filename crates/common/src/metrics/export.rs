//! Line-oriented text rendering of exported samples.

use std::fmt::Write as _;

use crate::metrics::registry::{MetricKey, MetricSample};

/// Render exported samples one per line as `name{labels} value`.
///
/// Histogram aggregates render as two lines, `<name>_sum` and
/// `<name>_count`. The input ordering is preserved, so feeding
/// `MetricRegistry::export()` output yields deterministic text.
pub fn render_text(samples: &[(MetricKey, MetricSample)]) -> String {
    let mut out = String::new();
    for (key, sample) in samples {
        match sample {
            MetricSample::Counter(value) | MetricSample::Gauge(value) => {
                let _ = writeln!(out, "{key} {value}");
            }
            MetricSample::Histogram { sum, count } => {
                let _ = writeln!(out, "{} {sum}", suffixed(key, "_sum"));
                let _ = writeln!(out, "{} {count}", suffixed(key, "_count"));
            }
        }
    }
    out
}

fn suffixed(key: &MetricKey, suffix: &str) -> MetricKey {
    MetricKey { name: format!("{}{suffix}", key.name), labels: key.labels.clone() }
}
