//! Outcome classification: which errors count as failures.
//!
//! The breaker never inspects error payloads itself. A caller-supplied
//! classifier decides, per error, whether the call is a `Failure` (recorded,
//! eligible to trip the circuit) or `Ignored` (excluded from every rate
//! computation, e.g. validation errors that say nothing about downstream
//! health). The error itself is always propagated to the caller unchanged.

use std::any::Any;

/// Context handed to classifiers for one failed call.
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name.
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to specific types).
    pub error: &'a dyn Any,
    /// Duration of the failed call in seconds.
    pub duration: f64,
}

/// Decides whether an error counts toward the failure rate.
///
/// Returning `false` marks the outcome `Ignored`: it is excluded from
/// `total_calls` and both rate tallies entirely.
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// `true` if this error should be recorded as a failure.
    fn is_failure(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Classifier that records every error as a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn is_failure(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Closure-backed classifier for common filtering patterns.
///
/// ```rust
/// use tripswitch::{FailureClassifier, PredicateClassifier, FailureContext};
///
/// // Ignore anything that failed in under a millisecond (e.g. local
/// // validation), record everything else.
/// let classifier = PredicateClassifier::new(|ctx: &FailureContext<'_>| ctx.duration >= 0.001);
/// ```
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    /// Create a classifier from a predicate.
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn is_failure(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}
