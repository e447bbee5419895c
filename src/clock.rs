//! Monotonic time sources for the circuit breaker.
//!
//! All time the breaker reads flows through the [`Clock`] trait, so tests can
//! inject a manually advanced clock and drive open-state timeouts without
//! sleeping.

use parking_lot::Mutex;
use std::time::Instant;

/// Supplies monotonic time in seconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Seconds elapsed since an arbitrary fixed origin.
    fn monotonic_time(&self) -> f64;
}

/// Production clock backed by [`Instant`].
///
/// Anchored at creation so readings are monotonic and immune to NTP clock
/// skew.
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn monotonic_time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Manually advanced clock for tests.
///
/// Starts at zero and only moves when told to, so wait-duration behavior can
/// be asserted deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    /// Create a clock frozen at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `seconds`.
    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }

    /// Jump the clock to an absolute reading.
    pub fn set(&self, seconds: f64) {
        *self.now.lock() = seconds;
    }
}

impl Clock for ManualClock {
    fn monotonic_time(&self) -> f64 {
        *self.now.lock()
    }
}
