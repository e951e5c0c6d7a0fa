//! Circuit breaker with single-flight half-open probing.
//!
//! One breaker guards one named resource. All state lives under a single
//! `parking_lot::Mutex`; the lock is held only for state transitions, never
//! across the guarded call itself.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::time::{Clock, SystemClock};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally; consecutive failures are counted
    Closed,
    /// Calls fail fast until the recovery timeout elapses
    Open,
    /// One probe call is admitted to test recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit
    pub failure_threshold: u64,
    /// How long the circuit stays open before admitting a probe
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout: Duration::from_secs(60) }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Reject configurations that would never admit or never trip.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be at least 1".to_string());
        }
        if self.recovery_timeout.is_zero() {
            return Err("recovery_timeout must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Admission refused because the circuit is open.
#[derive(Debug, Clone, Error)]
#[error("circuit '{name}' is open{}", retry_after.map(|d| format!(", retry in {}s", d.as_secs())).unwrap_or_default())]
pub struct CircuitOpenError {
    /// Resource the breaker guards
    pub name: String,
    /// Time remaining until a probe becomes eligible, when known
    pub retry_after: Option<Duration>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u64,
    opened_at: Option<Instant>,
    last_failure_at: Option<SystemTime>,
    last_success_at: Option<SystemTime>,
    /// True while the single half-open probe is outstanding
    probe_in_flight: bool,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            last_failure_at: None,
            last_success_at: None,
            probe_in_flight: false,
        }
    }
}

/// Serializable breaker status for the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: String,
    pub failure_count: u64,
    pub failure_threshold: u64,
    pub recovery_timeout_secs: u64,
    pub last_failure_epoch_secs: Option<u64>,
    pub last_success_epoch_secs: Option<u64>,
}

/// Per-resource circuit breaker.
///
/// Callers acquire a [`CallPermit`] before each guarded call and report the
/// outcome through it. The half-open probe is single-flight: while one
/// permit is probing, every other caller fails fast.
#[derive(Debug)]
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: C,
}

impl CircuitBreaker<SystemClock> {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_clock(name: impl Into<String>, config: CircuitBreakerConfig, clock: C) -> Self {
        Self { name: name.into(), config, inner: Mutex::new(BreakerInner::new()), clock }
    }

    /// Resource this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request admission for one call.
    ///
    /// Closed circuits always admit. Open circuits admit a single probe once
    /// the recovery timeout has elapsed and refuse everyone else with the
    /// remaining wait. Half-open circuits refuse all callers while the probe
    /// is outstanding.
    pub fn try_acquire(&self) -> Result<CallPermit<'_, C>, CircuitOpenError> {
        let probe = self.admit()?;
        Ok(CallPermit { breaker: self, probe, reported: false })
    }

    /// Owned variant of [`try_acquire`] for callers holding the breaker
    /// behind an `Arc` that need the permit to move into a future.
    ///
    /// [`try_acquire`]: Self::try_acquire
    pub fn try_acquire_owned(self: &Arc<Self>) -> Result<OwnedCallPermit<C>, CircuitOpenError> {
        let probe = self.admit()?;
        Ok(OwnedCallPermit { breaker: Arc::clone(self), probe, reported: false })
    }

    /// Shared admission logic. Returns whether the granted permit is the
    /// half-open probe.
    fn admit(&self) -> Result<bool, CircuitOpenError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| self.clock.now().saturating_duration_since(at))
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    debug!(circuit = %self.name, "admitting half-open probe");
                    Ok(true)
                } else {
                    Err(CircuitOpenError {
                        name: self.name.clone(),
                        retry_after: Some(self.config.recovery_timeout - elapsed),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitOpenError { name: self.name.clone(), retry_after: None })
                } else {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    /// Current state (admission decisions go through [`try_acquire`]).
    ///
    /// [`try_acquire`]: Self::try_acquire
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot of the breaker for health reporting.
    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock();
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: inner.state.to_string(),
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs(),
            last_failure_epoch_secs: inner.last_failure_at.map(epoch_secs),
            last_success_epoch_secs: inner.last_success_at.map(epoch_secs),
        }
    }

    /// Force the breaker back to a fresh closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = BreakerInner::new();
        info!(circuit = %self.name, "circuit manually reset");
    }

    fn record_success(&self, probe: bool) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.last_success_at = Some(self.clock.system_time());
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            inner.probe_in_flight = false;
            info!(circuit = %self.name, "probe succeeded, circuit closed");
        } else if probe {
            inner.probe_in_flight = false;
        }
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_at = Some(self.clock.system_time());
        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(self.clock.now());
                    warn!(
                        circuit = %self.name,
                        failures = inner.failure_count,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(self.clock.now());
                inner.probe_in_flight = false;
                warn!(circuit = %self.name, "probe failed, circuit reopened");
            }
            CircuitState::Open => {
                if probe {
                    inner.probe_in_flight = false;
                }
            }
        }
    }

    fn abandon_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.probe_in_flight {
            inner.probe_in_flight = false;
            warn!(circuit = %self.name, "probe abandoned without reporting");
        }
    }
}

fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Admission token for one guarded call.
///
/// Must be consumed with [`success`] or [`failure`]. Dropping an unreported
/// probe permit releases the probe gate so a panicking caller cannot wedge
/// the breaker half-open forever.
///
/// [`success`]: Self::success
/// [`failure`]: Self::failure
#[derive(Debug)]
pub struct CallPermit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    probe: bool,
    reported: bool,
}

impl<C: Clock> CallPermit<'_, C> {
    /// Whether this permit is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Report that the guarded call succeeded.
    pub fn success(mut self) {
        self.reported = true;
        self.breaker.record_success(self.probe);
    }

    /// Report that the guarded call failed.
    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.record_failure(self.probe);
    }
}

impl<C: Clock> Drop for CallPermit<'_, C> {
    fn drop(&mut self) {
        if !self.reported && self.probe {
            self.breaker.abandon_probe();
        }
    }
}

/// Owned counterpart of [`CallPermit`], holding the breaker `Arc` so it can
/// move into a spawned or retried future. Same reporting contract.
#[derive(Debug)]
pub struct OwnedCallPermit<C: Clock> {
    breaker: Arc<CircuitBreaker<C>>,
    probe: bool,
    reported: bool,
}

impl<C: Clock> OwnedCallPermit<C> {
    /// Whether this permit is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Report that the guarded call succeeded.
    pub fn success(mut self) {
        self.reported = true;
        self.breaker.record_success(self.probe);
    }

    /// Report that the guarded call failed.
    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.record_failure(self.probe);
    }
}

impl<C: Clock> Drop for OwnedCallPermit<C> {
    fn drop(&mut self) {
        if !self.reported && self.probe {
            self.breaker.abandon_probe();
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for resilience::circuit_breaker.
    use super::*;
    use crate::time::MockClock;

    fn breaker(threshold: u64, recovery: Duration) -> (CircuitBreaker<MockClock>, MockClock) {
        let clock = MockClock::new();
        let config =
            CircuitBreakerConfig::new().failure_threshold(threshold).recovery_timeout(recovery);
        (CircuitBreaker::with_clock("test_resource", config, clock.clone()), clock)
    }

    fn fail_once(breaker: &CircuitBreaker<MockClock>) {
        breaker.try_acquire().unwrap().failure();
    }

    /// Validates `CircuitBreaker::try_acquire` behavior for the threshold
    /// trip scenario.
    ///
    /// Assertions:
    /// - Confirms the circuit stays CLOSED through threshold-1 failures.
    /// - Confirms the Nth consecutive failure opens the circuit.
    /// - Ensures subsequent acquisition fails fast with `retry_after` set.
    #[test]
    fn test_opens_at_failure_threshold() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(60));

        fail_once(&breaker);
        fail_once(&breaker);
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail_once(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = breaker.try_acquire().err().unwrap();
        assert_eq!(err.name, "test_resource");
        assert!(err.retry_after.is_some());
    }

    /// Validates `CircuitBreaker::record_success` behavior for the binary
    /// failure count reset scenario.
    ///
    /// Assertions:
    /// - Confirms a success in CLOSED zeroes the consecutive-failure count,
    ///   so threshold-1 failures, a success, then threshold-1 more failures
    ///   never open the circuit.
    #[test]
    fn test_success_resets_failure_count() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(60));

        fail_once(&breaker);
        fail_once(&breaker);
        breaker.try_acquire().unwrap().success();
        fail_once(&breaker);
        fail_once(&breaker);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Validates `CircuitBreaker::try_acquire` behavior for the recovery
    /// timeout scenario.
    ///
    /// Assertions:
    /// - Ensures acquisition fails fast before the timeout elapses.
    /// - Ensures the first acquisition after the timeout is a probe permit
    ///   and the circuit reads HALF_OPEN.
    #[test]
    fn test_half_open_after_recovery_timeout() {
        let (breaker, clock) = breaker(1, Duration::from_secs(60));
        fail_once(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(59));
        assert!(breaker.try_acquire().is_err());

        clock.advance(Duration::from_secs(1));
        let permit = breaker.try_acquire().unwrap();
        assert!(permit.is_probe());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        permit.success();
    }

    /// Validates the single-flight probe gate for the concurrent caller
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures a second caller is refused while the probe is outstanding.
    /// - Confirms the refusal carries no `retry_after` (probe in flight).
    #[test]
    fn test_probe_is_single_flight() {
        let (breaker, clock) = breaker(1, Duration::from_secs(10));
        fail_once(&breaker);
        clock.advance(Duration::from_secs(10));

        let probe = breaker.try_acquire().unwrap();
        let refused = breaker.try_acquire().err().unwrap();
        assert!(refused.retry_after.is_none());
        probe.success();
    }

    /// Validates `CallPermit::success` behavior for the HALF_OPEN → CLOSED
    /// transition scenario.
    ///
    /// Assertions:
    /// - Confirms a successful probe closes the circuit.
    /// - Confirms the failure count reads zero afterwards.
    #[test]
    fn test_probe_success_closes_circuit() {
        let (breaker, clock) = breaker(2, Duration::from_secs(10));
        fail_once(&breaker);
        fail_once(&breaker);
        clock.advance(Duration::from_secs(10));

        breaker.try_acquire().unwrap().success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.status().failure_count, 0);
    }

    /// Validates `CallPermit::failure` behavior for the HALF_OPEN → OPEN
    /// transition scenario.
    ///
    /// Assertions:
    /// - Confirms a failed probe reopens the circuit with a fresh window:
    ///   fail-fast resumes and another full recovery timeout must elapse
    ///   before the next probe.
    #[test]
    fn test_probe_failure_reopens_with_fresh_window() {
        let (breaker, clock) = breaker(1, Duration::from_secs(10));
        fail_once(&breaker);
        clock.advance(Duration::from_secs(10));

        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(9));
        assert!(breaker.try_acquire().is_err());
        clock.advance(Duration::from_secs(1));
        assert!(breaker.try_acquire().unwrap().is_probe());
    }

    /// Validates `CallPermit::drop` behavior for the abandoned probe
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures dropping an unreported probe permit releases the gate so a
    ///   later caller can probe again.
    #[test]
    fn test_dropped_probe_releases_gate() {
        let (breaker, clock) = breaker(1, Duration::from_secs(10));
        fail_once(&breaker);
        clock.advance(Duration::from_secs(10));

        let probe = breaker.try_acquire().unwrap();
        drop(probe);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().unwrap().is_probe());
    }

    /// Validates `CircuitBreaker::status` behavior for the health snapshot
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms state label, counts, thresholds, and timestamps are
    ///   populated after a failure.
    #[test]
    fn test_status_snapshot() {
        let (breaker, clock) = breaker(5, Duration::from_secs(30));
        clock.set_elapsed(Duration::from_secs(100));
        fail_once(&breaker);

        let status = breaker.status();
        assert_eq!(status.state, "CLOSED");
        assert_eq!(status.failure_count, 1);
        assert_eq!(status.failure_threshold, 5);
        assert_eq!(status.recovery_timeout_secs, 30);
        assert_eq!(status.last_failure_epoch_secs, Some(100));
        assert_eq!(status.last_success_epoch_secs, None);
    }

    /// Validates `CircuitBreakerConfig::validate` behavior for the invalid
    /// configuration scenario.
    ///
    /// Assertions:
    /// - Ensures a zero threshold and a zero timeout are rejected.
    /// - Ensures the default configuration validates.
    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::new().failure_threshold(0).validate().is_err());
        assert!(CircuitBreakerConfig::new()
            .recovery_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }

    /// Validates `CircuitBreaker::reset` behavior for the manual reset
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms an open circuit returns to CLOSED with zero failures.
    #[test]
    fn test_manual_reset() {
        let (breaker, _clock) = breaker(1, Duration::from_secs(60));
        fail_once(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.status().failure_count, 0);
    }
}
