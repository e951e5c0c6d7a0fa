//! Tracked calls: execution count and duration per named stage.

use std::time::Instant;

use breakwater_common::metrics::{MetricKey, MetricRegistry};
use tracing::debug;

/// Run `operation` and record its outcome and duration against `stage`.
///
/// Records `pipeline_stage_executions_total{stage, status}` and
/// `pipeline_stage_duration_seconds{stage, status}`. The result passes
/// through unchanged; tracking adds no failure modes of its own.
pub async fn tracked<F, Fut, T, E>(
    registry: &MetricRegistry,
    stage: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let result = operation().await;
    let elapsed = started.elapsed();

    let status = if result.is_ok() { "success" } else { "failure" };
    registry.increment_counter(
        MetricKey::new("pipeline_stage_executions_total")
            .with_label("stage", stage)
            .with_label("status", status),
        1.0,
    );
    registry.observe_histogram(
        MetricKey::new("pipeline_stage_duration_seconds")
            .with_label("stage", stage)
            .with_label("status", status),
        elapsed.as_secs_f64(),
    );
    debug!(stage, status, elapsed_ms = elapsed.as_millis() as u64, "tracked call finished");
    result
}
