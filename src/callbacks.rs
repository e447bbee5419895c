//! Transition notifications for observers.
//!
//! The breaker publishes every state transition synchronously with respect to
//! the call that triggered it, after its internal locks are released.

use crate::circuit::CircuitState;
use std::sync::Arc;

type StateFn = Arc<dyn Fn(&str) + Send + Sync>;
type TransitionFn = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Subscribers to circuit state transitions.
///
/// The named hooks fire on entry to the matching state; `on_transition`
/// subscribers see every edge with its `(from, to)` pair.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<StateFn>,
    pub on_close: Option<StateFn>,
    pub on_half_open: Option<StateFn>,
    pub on_transition: Vec<TransitionFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify every subscriber of one transition.
    pub fn publish(&self, circuit: &str, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => {
                if let Some(ref callback) = self.on_open {
                    callback(circuit);
                }
            }
            CircuitState::Closed => {
                if let Some(ref callback) = self.on_close {
                    callback(circuit);
                }
            }
            CircuitState::HalfOpen => {
                if let Some(ref callback) = self.on_half_open {
                    callback(circuit);
                }
            }
        }

        for handler in &self.on_transition {
            handler(from, to);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .field("on_transition", &self.on_transition.len())
            .finish()
    }
}
