//! Monitor configuration.

use std::path::PathBuf;
use std::time::Duration;

use breakwater_common::resilience::{CircuitBreakerConfig, RetryConfig};
use serde::Deserialize;
use thiserror::Error;

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config field '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Tunables for the monitor service. Deserializes from any serde source;
/// every field has a production default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Snapshot file location
    pub snapshot_path: PathBuf,
    /// Seconds between periodic snapshot saves
    pub snapshot_interval_secs: u64,
    /// Snapshots older than this many hours are not restored
    pub snapshot_max_age_hours: u64,
    /// Seconds between workflow inactivity sweeps
    pub sweep_interval_secs: u64,
    /// Workflows idle longer than this many seconds are swept
    pub workflow_max_inactive_secs: u64,
    /// Consecutive failures that open a resource's circuit
    pub failure_threshold: u64,
    /// Seconds an open circuit waits before admitting a probe
    pub recovery_timeout_secs: u64,
    /// Retry attempts per execution, including the first
    pub retry_max_attempts: u32,
    /// Backoff before the second attempt, in milliseconds
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling, in milliseconds
    pub retry_max_delay_ms: u64,
    /// Exponential backoff when true, fixed otherwise
    pub retry_exponential: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("monitoring/metrics/metrics_snapshot.json"),
            snapshot_interval_secs: 30,
            snapshot_max_age_hours: 24,
            sweep_interval_secs: 60,
            workflow_max_inactive_secs: 3600,
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 60_000,
            retry_exponential: true,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snapshot_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "snapshot_interval_secs",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep_interval_secs",
                reason: "must be non-zero".to_string(),
            });
        }
        if let Err(reason) = self.breaker_config().validate() {
            return Err(ConfigError::Invalid { field: "failure_threshold", reason });
        }
        if let Err(reason) = self.retry_config().validate() {
            return Err(ConfigError::Invalid { field: "retry_max_attempts", reason });
        }
        Ok(())
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn snapshot_max_age(&self) -> Duration {
        Duration::from_secs(self.snapshot_max_age_hours * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn workflow_max_inactive(&self) -> Duration {
        Duration::from_secs(self.workflow_max_inactive_secs)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .failure_threshold(self.failure_threshold)
            .recovery_timeout(Duration::from_secs(self.recovery_timeout_secs))
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            exponential: self.retry_exponential,
        }
    }
}
