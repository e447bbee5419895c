//! Error types for circuit breaker operations.

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Errors returned by [`CircuitBreaker::call`](crate::CircuitBreaker::call).
///
/// Operation errors are propagated verbatim inside `Execution`; the breaker
/// classifies them but never rewrites them.
#[derive(Debug)]
pub enum CircuitError<E = Box<dyn StdError + Send + Sync>> {
    /// Circuit is open, the call was rejected without executing.
    Open { circuit: String, opened_at: f64 },
    /// The half-open trial budget is exhausted; the call was rejected.
    HalfOpenExhausted { circuit: String },
    /// The wrapped operation failed.
    Execution(E),
}

impl<E> CircuitError<E> {
    /// True when the breaker rejected the call without running the operation.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CircuitError::Open { .. } | CircuitError::HalfOpenExhausted { .. }
        )
    }

    /// Recover the underlying operation error, if there is one.
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitError::Open { circuit, opened_at } => {
                write!(f, "circuit '{}' is open (opened at {})", circuit, opened_at)
            }
            CircuitError::HalfOpenExhausted { circuit } => {
                write!(f, "circuit '{}' half-open trial budget exhausted", circuit)
            }
            CircuitError::Execution(e) => write!(f, "circuit execution failed: {}", e),
        }
    }
}

impl<E: StdError + 'static> StdError for CircuitError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// Invalid configuration, surfaced at construction time.
///
/// A breaker is never built from a config that would silently misbehave.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failure_rate_threshold must be within (0, 100], got {0}")]
    FailureRateThreshold(f64),
    #[error("slow_call_rate_threshold must be within (0, 100], got {0}")]
    SlowCallRateThreshold(f64),
    #[error("slow_call_duration_secs must not be negative, got {0}")]
    SlowCallDuration(f64),
    #[error("window_size must be greater than zero")]
    WindowSize,
    #[error("minimum_calls must be greater than zero")]
    MinimumCalls,
    #[error("wait_duration_secs must not be negative, got {0}")]
    WaitDuration(f64),
    #[error("half_open_permits must be greater than zero")]
    HalfOpenPermits,
    #[error("jitter_factor must be within [0, 1], got {0}")]
    JitterFactor(f64),
}
