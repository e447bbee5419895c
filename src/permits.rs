//! Trial-call permit accounting for the half-open state.
//!
//! Acquisition is a single compare-exchange, so concurrent callers can never
//! admit more trials than the configured budget: the check and the decrement
//! are one atomic step, not a check followed by a separate decrement.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed budget of half-open trial permits.
///
/// Permits are consumed, not returned on completion: each admitted trial
/// spends one permit until the breaker re-enters the half-open state and the
/// budget is refilled. The one exception is an ignored trial outcome, which
/// hands its permit back so the trial cannot stall short of a decision.
#[derive(Debug)]
pub struct TrialPermits {
    available: AtomicUsize,
}

impl TrialPermits {
    /// Create a permit counter holding `budget` permits.
    pub fn new(budget: usize) -> Self {
        Self {
            available: AtomicUsize::new(budget),
        }
    }

    /// Try to consume one permit.
    ///
    /// Returns `false` when the budget is exhausted; losing callers are
    /// rejected, never queued.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.available.load(Ordering::Acquire);

        loop {
            if current == 0 {
                return false;
            }

            match self.available.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Hand a permit back without completing a trial.
    pub fn release(&self) {
        self.available.fetch_add(1, Ordering::Release);
    }

    /// Replenish the budget on entry to the half-open state.
    pub fn refill(&self, budget: usize) {
        self.available.store(budget, Ordering::Release);
    }

    /// Permits currently available.
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }
}
