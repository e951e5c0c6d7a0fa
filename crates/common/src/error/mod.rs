//! Error classification shared across components
//!
//! Retry policies and the resilient executor only ever need three facts
//! about an error: whether it is worth retrying, how severe it is, and a
//! stable kind label for aggregation. `ErrorClassification` captures those
//! facts; concrete error enums implement it.

use thiserror::Error;

/// Severity level of a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, no action required
    Info,
    /// Degraded but recoverable
    Warning,
    /// Operation failed
    Error,
    /// Systemic failure requiring attention
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Classification surface consulted by retry policies and error stats.
pub trait ErrorClassification {
    /// Whether retrying the failed operation could plausibly succeed.
    fn is_retryable(&self) -> bool;

    /// Severity of the error.
    fn severity(&self) -> ErrorSeverity;

    /// Stable label used to aggregate error counts per kind.
    fn kind(&self) -> &'static str;

    /// Whether the error is severe enough to page on.
    fn is_critical(&self) -> bool {
        self.severity() >= ErrorSeverity::Critical
    }
}

/// Failure taxonomy for calls against an external resource.
///
/// Transient failures (timeouts, rate limits, connection resets) are
/// retryable; permanent failures (bad credentials, malformed requests)
/// are not and short-circuit the retry loop.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Failure expected to clear on its own
    #[error("transient failure against '{resource}': {message}")]
    Transient { resource: String, message: String },

    /// Failure that will not clear without intervention
    #[error("permanent failure against '{resource}': {message}")]
    Permanent { resource: String, message: String },
}

impl ResourceError {
    /// Construct a transient (retryable) failure.
    pub fn transient(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient { resource: resource.into(), message: message.into() }
    }

    /// Construct a permanent (non-retryable) failure.
    pub fn permanent(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent { resource: resource.into(), message: message.into() }
    }

    /// Resource the failed call targeted.
    pub fn resource(&self) -> &str {
        match self {
            Self::Transient { resource, .. } | Self::Permanent { resource, .. } => resource,
        }
    }
}

impl ErrorClassification for ResourceError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Transient { .. } => ErrorSeverity::Warning,
            Self::Permanent { .. } => ErrorSeverity::Error,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
        }
    }
}
