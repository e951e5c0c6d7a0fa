//! Clock abstraction
//!
//! Breaker recovery timeouts, workflow inactivity sweeps, and snapshot age
//! checks all depend on elapsed time. Injecting a [`Clock`] keeps those
//! paths deterministic under test.

mod clock;

pub use clock::{Clock, MockClock, SystemClock};
