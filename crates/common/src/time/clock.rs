//! Clock trait with system and mock implementations.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Source of time for components that measure elapsed durations.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic instant, used for elapsed-time arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for serialized timestamps.
    fn system_time(&self) -> SystemTime;

    /// Wall-clock time as whole seconds since the unix epoch.
    fn unix_seconds(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }
}

/// Clock backed by the real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Controllable clock for tests.
///
/// Time starts at an anchor instant and only moves when advanced
/// explicitly. `system_time` reports the same elapsed offset from the unix
/// epoch so instant-based and wall-clock-based logic stay consistent.
#[derive(Debug, Clone)]
pub struct MockClock {
    anchor: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a mock clock at elapsed zero.
    pub fn new() -> Self {
        Self { anchor: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the clock by the given number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the total elapsed time since the anchor.
    pub fn set_elapsed(&self, elapsed: Duration) {
        *self.elapsed.lock() = elapsed;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.anchor + *self.elapsed.lock()
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + *self.elapsed.lock()
    }
}
