//! Tripswitch - concurrent circuit breaker with sliding-window failure detection
//!
//! This crate provides a complete circuit breaker implementation with:
//! - Count-based (ring) and time-based (bucketed) sliding outcome windows
//! - Failure-rate and slow-call-rate thresholds with a minimum-calls floor
//! - State machine for the breaker lifecycle (Closed → Open → HalfOpen)
//! - An atomically bounded trial-call budget in the half-open state
//! - Monotonic, injectable time so tests never sleep
//!
//! # Example
//!
//! ```rust
//! use tripswitch::CircuitBreaker;
//!
//! let breaker = CircuitBreaker::builder("payment_api")
//!     .failure_rate_threshold(50.0)
//!     .count_window(10)
//!     .minimum_calls(4)
//!     .wait_duration_secs(30.0)
//!     .half_open_permits(2)
//!     .on_open(|name| println!("circuit {} opened", name))
//!     .build()
//!     .expect("valid config");
//!
//! // Execute with circuit protection
//! let result = breaker.call(|| {
//!     // Your downstream call here
//!     Ok::<_, String>("success")
//! });
//! assert!(result.is_ok());
//!
//! // Check circuit state
//! if breaker.is_open() {
//!     println!("circuit is open, skipping call");
//! }
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod errors;
pub mod permits;
pub mod registry;
pub mod window;

pub use builder::CircuitBuilder;
pub use circuit::{CallOptions, CircuitBreaker, CircuitState, Config, FallbackContext};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use errors::{CircuitError, ConfigError};
pub use registry::CircuitRegistry;
pub use window::{SlidingWindow, Snapshot, WindowType};

/// Classification of a completed call.
///
/// Slowness is not a variant: it is derived from the measured duration at
/// record time, because a slow call counts toward the slow-call rate
/// independently of whether it also failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call returned a result.
    Success,
    /// The call returned an error that counts toward the failure rate.
    Failure,
    /// The call must not influence any rate computation. Ignored outcomes
    /// are excluded from `total_calls` entirely.
    Ignored,
}
