//! Sliding outcome windows for rate-based trip decisions.
//!
//! Two bounding strategies are provided:
//! - count-based: a fixed-capacity ring of recorded outcomes
//! - time-based: one-second buckets rotated out once older than the span

use crate::CallOutcome;
use crate::clock::Clock;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// Which bounding strategy a sliding window uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    /// Fixed number of outcomes (ring buffer).
    Count,
    /// Fixed span in seconds, partitioned into rotating buckets.
    Time,
}

/// Point-in-time aggregate over the retained outcomes.
///
/// Rates are percentages in `[0, 100]`. Below the minimum-calls floor the
/// whole snapshot is zero and the window is not eligible to trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    /// Outcomes currently retained in the window.
    pub total_calls: usize,
    /// `failures / total_calls * 100`.
    pub failure_rate: f64,
    /// `slow / total_calls * 100`.
    pub slow_call_rate: f64,
}

/// One slot in the count-based ring.
#[derive(Debug, Clone, Copy)]
struct RingEntry {
    failure: bool,
    slow: bool,
}

/// A one-second slice of the time-based window.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    second: u64,
    total: usize,
    failures: usize,
    slow: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    total: usize,
    failures: usize,
    slow: usize,
}

#[derive(Debug)]
enum WindowInner {
    Count {
        slots: VecDeque<RingEntry>,
        capacity: usize,
        totals: Totals,
    },
    Time {
        buckets: VecDeque<Bucket>,
        span_secs: u64,
    },
}

/// Bounded history of call outcomes answering "what are the current failure
/// and slow-call rates, and how many calls have I seen?".
///
/// Thread-safe via an internal lock; recording and snapshotting only ever
/// block on in-memory counter updates.
#[derive(Debug)]
pub struct SlidingWindow {
    inner: RwLock<WindowInner>,
    clock: Arc<dyn Clock>,
    slow_call_threshold_secs: f64,
}

impl SlidingWindow {
    /// Ring buffer holding the last `capacity` outcomes.
    pub fn count_based(
        capacity: usize,
        slow_call_threshold_secs: f64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: RwLock::new(WindowInner::Count {
                slots: VecDeque::with_capacity(capacity),
                capacity,
                totals: Totals::default(),
            }),
            clock,
            slow_call_threshold_secs,
        }
    }

    /// Bucketed window retaining outcomes from the last `span_secs` seconds.
    pub fn time_based(span_secs: u64, slow_call_threshold_secs: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(WindowInner::Time {
                buckets: VecDeque::new(),
                span_secs,
            }),
            clock,
            slow_call_threshold_secs,
        }
    }

    /// Record one completed call.
    ///
    /// `Ignored` outcomes are dropped entirely. The slow flag is derived here
    /// from the measured duration; slow and failure tallies are independent,
    /// so a slow failure counts in both.
    pub fn record(&self, outcome: CallOutcome, duration_secs: f64) {
        if outcome == CallOutcome::Ignored {
            return;
        }
        let failure = outcome == CallOutcome::Failure;
        let slow = duration_secs > self.slow_call_threshold_secs;

        let mut inner = self.inner.write();
        match &mut *inner {
            WindowInner::Count {
                slots,
                capacity,
                totals,
            } => {
                // O(1): adjust running counters by the evicted slot, then add
                // the new one.
                if slots.len() == *capacity
                    && let Some(evicted) = slots.pop_front()
                {
                    totals.total -= 1;
                    totals.failures -= usize::from(evicted.failure);
                    totals.slow -= usize::from(evicted.slow);
                }
                slots.push_back(RingEntry { failure, slow });
                totals.total += 1;
                totals.failures += usize::from(failure);
                totals.slow += usize::from(slow);
            }
            WindowInner::Time { buckets, span_secs } => {
                let now_sec = self.clock.monotonic_time() as u64;

                // Rotate out every bucket that fell off the span; a quiet
                // period can leave several stale buckets behind.
                while let Some(front) = buckets.front() {
                    if front.second + *span_secs <= now_sec {
                        buckets.pop_front();
                    } else {
                        break;
                    }
                }

                match buckets.back_mut() {
                    Some(active) if active.second == now_sec => {
                        active.total += 1;
                        active.failures += usize::from(failure);
                        active.slow += usize::from(slow);
                    }
                    _ => {
                        buckets.push_back(Bucket {
                            second: now_sec,
                            total: 1,
                            failures: usize::from(failure),
                            slow: usize::from(slow),
                        });
                    }
                }
            }
        }
    }

    /// Aggregate the retained outcomes.
    ///
    /// Below the `minimum_calls` floor the snapshot is all zeros: too few
    /// outcomes to say anything about downstream health.
    pub fn snapshot(&self, minimum_calls: usize) -> Snapshot {
        let inner = self.inner.read();
        let totals = match &*inner {
            WindowInner::Count { totals, .. } => *totals,
            WindowInner::Time { buckets, span_secs } => {
                let now_sec = self.clock.monotonic_time() as u64;
                let mut totals = Totals::default();
                for bucket in buckets {
                    if bucket.second + *span_secs > now_sec {
                        totals.total += bucket.total;
                        totals.failures += bucket.failures;
                        totals.slow += bucket.slow;
                    }
                }
                totals
            }
        };

        if totals.total == 0 || totals.total < minimum_calls {
            return Snapshot {
                total_calls: 0,
                failure_rate: 0.0,
                slow_call_rate: 0.0,
            };
        }

        let total = totals.total as f64;
        Snapshot {
            total_calls: totals.total,
            failure_rate: totals.failures as f64 / total * 100.0,
            slow_call_rate: totals.slow as f64 / total * 100.0,
        }
    }

    /// Discard every retained outcome.
    ///
    /// Called when the breaker closes after a successful half-open trial, so
    /// stale open-period failures never leak into the fresh evaluation window.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        match &mut *inner {
            WindowInner::Count { slots, totals, .. } => {
                slots.clear();
                *totals = Totals::default();
            }
            WindowInner::Time { buckets, .. } => {
                buckets.clear();
            }
        }
    }
}
