//! Circuit breaker core: configuration, state machine and executor.
//!
//! The lifecycle (Closed → Open → HalfOpen) is a `state_machines` dynamic
//! machine whose guards consult the sliding window, the injected clock and
//! the half-open trial tally.

use crate::{
    CallOutcome,
    callbacks::Callbacks,
    classifier::{FailureClassifier, FailureContext},
    clock::{Clock, MonotonicClock},
    errors::{CircuitError, ConfigError},
    permits::TrialPermits,
    window::{SlidingWindow, Snapshot, WindowType},
};
use parking_lot::{Mutex, RwLock};
use state_machines::state_machine;
use std::sync::Arc;

/// Circuit breaker configuration.
///
/// Immutable once a breaker is constructed; invalid values are rejected at
/// construction time, never at call time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Percentage of failures in the window that trips Closed -> Open.
    pub failure_rate_threshold: f64,

    /// Percentage of slow calls in the window that trips Closed -> Open.
    pub slow_call_rate_threshold: f64,

    /// Duration in seconds above which a call counts as slow.
    pub slow_call_duration_secs: f64,

    /// Count-based or time-based windowing.
    pub window_type: WindowType,

    /// Ring capacity (count) or span in seconds (time).
    pub window_size: usize,

    /// Calls required in the window before rates are evaluated.
    pub minimum_calls: usize,

    /// Seconds the circuit stays open before half-open is considered.
    pub wait_duration_secs: f64,

    /// Trial call budget in the half-open state.
    pub half_open_permits: usize,

    /// Evaluate the open-state timeout on `state()` reads as well as on
    /// calls, so observers see the transition without traffic.
    pub automatic_half_open: bool,

    /// Jitter factor for the open-state wait (0.0 = none, 1.0 = full).
    /// Uses the chrono-machines formula: wait * (1 - jitter + rand * jitter).
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_secs: 60.0,
            window_type: WindowType::Count,
            window_size: 100,
            minimum_calls: 10,
            wait_duration_secs: 30.0,
            half_open_permits: 5,
            automatic_half_open: false,
            jitter_factor: 0.0,
        }
    }
}

impl Config {
    /// Reject configurations that would produce a misbehaving breaker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0) {
            return Err(ConfigError::FailureRateThreshold(self.failure_rate_threshold));
        }
        if !(self.slow_call_rate_threshold > 0.0 && self.slow_call_rate_threshold <= 100.0) {
            return Err(ConfigError::SlowCallRateThreshold(self.slow_call_rate_threshold));
        }
        if self.slow_call_duration_secs < 0.0 {
            return Err(ConfigError::SlowCallDuration(self.slow_call_duration_secs));
        }
        if self.window_size == 0 {
            return Err(ConfigError::WindowSize);
        }
        if self.minimum_calls == 0 {
            return Err(ConfigError::MinimumCalls);
        }
        if self.wait_duration_secs < 0.0 {
            return Err(ConfigError::WaitDuration(self.wait_duration_secs));
        }
        if self.half_open_permits == 0 {
            return Err(ConfigError::HalfOpenPermits);
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterFactor(self.jitter_factor));
        }
        Ok(())
    }
}

/// Public view of the breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Circuit tripped, calls are rejected without executing.
    Open,
    /// Probing recovery with a bounded trial budget.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

fn state_from_name(name: &str) -> CircuitState {
    match name {
        "Open" => CircuitState::Open,
        "HalfOpen" => CircuitState::HalfOpen,
        _ => CircuitState::Closed,
    }
}

/// Context provided to fallback closures when a call is rejected.
#[derive(Debug, Clone)]
pub struct FallbackContext {
    /// Circuit name.
    pub circuit_name: String,
    /// Timestamp when the circuit opened (monotonic seconds).
    pub opened_at: f64,
    /// State that caused the rejection.
    pub state: CircuitState,
}

/// Type alias for fallback function.
pub type FallbackFn<T, E> = Box<dyn FnOnce(&FallbackContext) -> Result<T, E> + Send>;

/// Options for circuit breaker calls.
pub struct CallOptions<T, E> {
    /// Optional fallback invoked when the call is rejected.
    pub fallback: Option<FallbackFn<T, E>>,
}

impl<T, E> Default for CallOptions<T, E> {
    fn default() -> Self {
        Self { fallback: None }
    }
}

impl<T, E> CallOptions<T, E> {
    /// Create new call options with no fallback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fallback function.
    pub fn with_fallback<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&FallbackContext) -> Result<T, E> + Send + 'static,
    {
        self.fallback = Some(Box::new(f));
        self
    }
}

/// Type alias for callable function.
pub type CallableFn<T, E> = Box<dyn FnOnce() -> Result<T, E>>;

/// Trait for converting into CallOptions - allows flexible call() API.
pub trait IntoCallOptions<T, E> {
    fn into_call_options(self) -> (CallableFn<T, E>, CallOptions<T, E>);
}

/// Implement for plain closures.
impl<T, E, F> IntoCallOptions<T, E> for F
where
    F: FnOnce() -> Result<T, E> + 'static,
{
    fn into_call_options(self) -> (CallableFn<T, E>, CallOptions<T, E>) {
        (Box::new(self), CallOptions::default())
    }
}

/// Implement for (closure, CallOptions) tuple.
impl<T, E, F> IntoCallOptions<T, E> for (F, CallOptions<T, E>)
where
    F: FnOnce() -> Result<T, E> + 'static,
{
    fn into_call_options(self) -> (CallableFn<T, E>, CallOptions<T, E>) {
        (Box::new(self.0), self.1)
    }
}

/// Circuit breaker context - shared data across all states.
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub window: Arc<SlidingWindow>,
    pub classifier: Option<Arc<dyn FailureClassifier>>,
    pub clock: Arc<dyn Clock>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        let config = Config::default();
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let window = Arc::new(SlidingWindow::count_based(
            config.window_size,
            config.slow_call_duration_secs,
            Arc::clone(&clock),
        ));
        Self {
            name: String::new(),
            config,
            window,
            classifier: None,
            clock,
        }
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("window", &self.window)
            .field(
                "classifier",
                &self.classifier.as_ref().map(|_| "<dyn FailureClassifier>"),
            )
            .field("clock", &self.clock)
            .finish()
    }
}

/// Data specific to the Open state.
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: f64,
}

/// Data specific to the HalfOpen state: the trial tally.
///
/// Trial outcomes are kept apart from the main sliding window so the
/// half-open decision is never mixed with pre-open history.
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub completed: usize,
    pub failures: usize,
    pub slow: usize,
}

impl HalfOpenData {
    fn record(&mut self, failure: bool, slow: bool) {
        self.completed += 1;
        self.failures += usize::from(failure);
        self.slow += usize::from(slow);
    }

    fn failure_rate(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.failures as f64 / self.completed as f64 * 100.0
        }
    }

    fn slow_rate(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.slow as f64 / self.completed as f64 * 100.0
        }
    }
}

// Define the circuit breaker state machine with dynamic mode
state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,  // Enable dynamic mode for runtime state transitions

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [timeout_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

// Guards for dynamic mode - implemented on typestate machines
impl Circuit<Closed> {
    /// Rate thresholds are only evaluated once the window holds the
    /// minimum number of calls.
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        let snap = ctx.window.snapshot(ctx.config.minimum_calls);
        snap.total_calls >= ctx.config.minimum_calls
            && (snap.failure_rate >= ctx.config.failure_rate_threshold
                || snap.slow_call_rate >= ctx.config.slow_call_rate_threshold)
    }
}

impl Circuit<HalfOpen> {
    /// The decision uses only the trial tally, never pre-open history, and
    /// is made once the whole trial budget has completed.
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        let data = self
            .state_data_half_open()
            .expect("HalfOpen state must have data");
        data.completed >= ctx.config.half_open_permits
            && (data.failure_rate() >= ctx.config.failure_rate_threshold
                || data.slow_rate() >= ctx.config.slow_call_rate_threshold)
    }

    fn should_close(&self, ctx: &CircuitContext) -> bool {
        let data = self
            .state_data_half_open()
            .expect("HalfOpen state must have data");
        data.completed >= ctx.config.half_open_permits
            && data.failure_rate() < ctx.config.failure_rate_threshold
            && data.slow_rate() < ctx.config.slow_call_rate_threshold
    }
}

impl Circuit<Open> {
    /// Check if the wait duration has elapsed for Open -> HalfOpen.
    fn timeout_elapsed(&self, ctx: &CircuitContext) -> bool {
        let data = self.state_data_open().expect("Open state must have data");
        let elapsed = ctx.clock.monotonic_time() - data.opened_at;

        // Apply jitter using chrono-machines if jitter_factor > 0
        let wait_secs = if ctx.config.jitter_factor > 0.0 {
            let policy = chrono_machines::Policy {
                max_attempts: 1,
                base_delay_ms: (ctx.config.wait_duration_secs * 1000.0) as u64,
                multiplier: 1.0,
                max_delay_ms: (ctx.config.wait_duration_secs * 1000.0) as u64,
            };
            let wait_ms = policy.calculate_delay(1, ctx.config.jitter_factor);
            (wait_ms as f64) / 1000.0
        } else {
            ctx.config.wait_duration_secs
        };

        elapsed >= wait_secs
    }
}

/// How a call was admitted (or not) by the state machine.
enum Admission {
    /// Closed-state call; outcome goes to the main window.
    Normal,
    /// Half-open trial call holding one permit; outcome goes to the tally.
    Trial,
    RejectedOpen { opened_at: f64 },
    RejectedHalfOpen,
}

/// Circuit breaker public API.
///
/// Safe to share across threads behind an `Arc`; every method takes `&self`.
/// Bookkeeping only ever blocks on in-memory locks, never on I/O, and no
/// lock is held while the wrapped operation runs.
pub struct CircuitBreaker {
    machine: Mutex<DynamicCircuit>,
    context: CircuitContext,
    permits: TrialPermits,
    callbacks: RwLock<Callbacks>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("state", &state_from_name(self.machine.lock().current_state()))
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker with the production clock.
    ///
    /// Fails fast on invalid configuration.
    pub fn new(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        Self::with_clock(name, config, Arc::new(MonotonicClock::new()))
    }

    /// Create a breaker with an injected time source.
    pub fn with_clock(
        name: impl Into<String>,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        Self::assemble(name.into(), config, clock, None, Callbacks::new())
    }

    /// Create a new circuit breaker builder.
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    pub(crate) fn assemble(
        name: String,
        config: Config,
        clock: Arc<dyn Clock>,
        classifier: Option<Arc<dyn FailureClassifier>>,
        callbacks: Callbacks,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let window = Arc::new(match config.window_type {
            WindowType::Count => SlidingWindow::count_based(
                config.window_size,
                config.slow_call_duration_secs,
                Arc::clone(&clock),
            ),
            WindowType::Time => SlidingWindow::time_based(
                config.window_size as u64,
                config.slow_call_duration_secs,
                Arc::clone(&clock),
            ),
        });

        let context = CircuitContext {
            name,
            config,
            window,
            classifier,
            clock,
        };
        let machine = DynamicCircuit::new(context.clone());
        let permits = TrialPermits::new(context.config.half_open_permits);

        Ok(Self {
            machine: Mutex::new(machine),
            context,
            permits,
            callbacks: RwLock::new(callbacks),
        })
    }

    /// Execute a fallible operation with circuit breaker protection.
    ///
    /// Accepts either:
    /// - A plain closure: `breaker.call(|| api_request())`
    /// - A closure with options:
    ///   `breaker.call((|| api_request(), CallOptions::new().with_fallback(..)))`
    ///
    /// The operation's own result or error is returned unchanged; rejected
    /// calls run the fallback when one is provided.
    pub fn call<I, T, E: 'static>(&self, input: I) -> Result<T, CircuitError<E>>
    where
        I: IntoCallOptions<T, E>,
    {
        let (operation, options) = input.into_call_options();

        let mut notification = None;
        let admission = {
            let mut machine = self.machine.lock();

            // Lazy Open -> HalfOpen evaluation; no background timer drives
            // this edge, the next call does.
            if machine.current_state() == "Open"
                && machine.handle(CircuitEvent::AttemptReset).is_ok()
            {
                self.permits.refill(self.context.config.half_open_permits);
                notification = Some((CircuitState::Open, CircuitState::HalfOpen));
            }

            match machine.current_state() {
                "Open" => Admission::RejectedOpen {
                    opened_at: machine.open_data().map(|d| d.opened_at).unwrap_or(0.0),
                },
                "HalfOpen" => {
                    // Atomic check-and-decrement: concurrent callers can never
                    // admit more trials than the budget.
                    if self.permits.try_acquire() {
                        Admission::Trial
                    } else {
                        Admission::RejectedHalfOpen
                    }
                }
                _ => Admission::Normal,
            }
        };

        if let Some((from, to)) = notification {
            tracing::info!(circuit = %self.context.name, "circuit half-open, probing recovery");
            self.notify(from, to);
        }

        match admission {
            Admission::RejectedOpen { opened_at } => {
                self.reject(options, CircuitState::Open, opened_at)
            }
            Admission::RejectedHalfOpen => self.reject(options, CircuitState::HalfOpen, 0.0),
            Admission::Normal => self.execute(operation, false),
            Admission::Trial => self.execute(operation, true),
        }
    }

    /// Current state of the breaker.
    ///
    /// With `automatic_half_open` set, an elapsed open-state wait is applied
    /// here too, so observers see half-open without waiting for traffic.
    pub fn state(&self) -> CircuitState {
        let mut machine = self.machine.lock();

        if self.context.config.automatic_half_open
            && machine.current_state() == "Open"
            && machine.handle(CircuitEvent::AttemptReset).is_ok()
        {
            self.permits.refill(self.context.config.half_open_permits);
            let state = state_from_name(machine.current_state());
            drop(machine);
            tracing::info!(circuit = %self.context.name, "circuit half-open, probing recovery");
            self.notify(CircuitState::Open, CircuitState::HalfOpen);
            return state;
        }

        state_from_name(machine.current_state())
    }

    /// Check if circuit is open.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Check if circuit is closed.
    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Circuit name.
    pub fn name(&self) -> &str {
        &self.context.name
    }

    /// Aggregate view of the main sliding window.
    pub fn snapshot(&self) -> Snapshot {
        self.context
            .window
            .snapshot(self.context.config.minimum_calls)
    }

    /// Register a subscriber notified of every state transition.
    pub fn on_state_transition<F>(&self, handler: F)
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.callbacks.write().on_transition.push(Arc::new(handler));
    }

    /// Clear all recorded outcomes and return to Closed.
    pub fn reset(&self) {
        self.context.window.reset();
        let mut machine = self.machine.lock();
        *machine = DynamicCircuit::new(self.context.clone());
    }

    fn reject<T, E>(
        &self,
        options: CallOptions<T, E>,
        state: CircuitState,
        opened_at: f64,
    ) -> Result<T, CircuitError<E>> {
        if let Some(fallback) = options.fallback {
            let ctx = FallbackContext {
                circuit_name: self.context.name.clone(),
                opened_at,
                state,
            };
            return fallback(&ctx).map_err(CircuitError::Execution);
        }

        match state {
            CircuitState::HalfOpen => Err(CircuitError::HalfOpenExhausted {
                circuit: self.context.name.clone(),
            }),
            _ => Err(CircuitError::Open {
                circuit: self.context.name.clone(),
                opened_at,
            }),
        }
    }

    fn execute<T, E: 'static>(
        &self,
        operation: CallableFn<T, E>,
        trial: bool,
    ) -> Result<T, CircuitError<E>> {
        let start = self.context.clock.monotonic_time();
        let result = operation();
        let duration = self.context.clock.monotonic_time() - start;

        match result {
            Ok(value) => {
                self.record_outcome(CallOutcome::Success, duration, trial);
                Ok(value)
            }
            Err(error) => {
                let outcome = if self.is_failure_error(&error, duration) {
                    CallOutcome::Failure
                } else {
                    CallOutcome::Ignored
                };
                self.record_outcome(outcome, duration, trial);
                Err(CircuitError::Execution(error))
            }
        }
    }

    /// Feed one completed call into the appropriate recorder and re-evaluate
    /// transitions synchronously.
    fn record_outcome(&self, outcome: CallOutcome, duration: f64, trial: bool) {
        let mut notification = None;
        {
            let mut machine = self.machine.lock();

            if trial && machine.current_state() == "HalfOpen" {
                if outcome == CallOutcome::Ignored {
                    // An ignored trial must not burn budget, or a run of
                    // ignorable errors would stall the trial short of a
                    // decision.
                    self.permits.release();
                } else {
                    let failure = outcome == CallOutcome::Failure;
                    let slow = duration > self.context.config.slow_call_duration_secs;
                    if let Some(data) = machine.half_open_data_mut() {
                        data.record(failure, slow);
                    }

                    if machine.handle(CircuitEvent::Close).is_ok() {
                        self.context.window.reset();
                        notification = Some((CircuitState::HalfOpen, CircuitState::Closed));
                    } else if machine.handle(CircuitEvent::Trip).is_ok() {
                        if let Some(data) = machine.open_data_mut() {
                            data.opened_at = self.context.clock.monotonic_time();
                        }
                        notification = Some((CircuitState::HalfOpen, CircuitState::Open));
                    }
                }
            } else if outcome != CallOutcome::Ignored {
                // A call admitted while Closed may complete after the state
                // changed; it still belongs to the main window.
                self.context.window.record(outcome, duration);

                if machine.current_state() == "Closed"
                    && machine.handle(CircuitEvent::Trip).is_ok()
                {
                    if let Some(data) = machine.open_data_mut() {
                        data.opened_at = self.context.clock.monotonic_time();
                    }
                    notification = Some((CircuitState::Closed, CircuitState::Open));
                }
            }
        }

        if let Some((from, to)) = notification {
            match to {
                CircuitState::Open => {
                    tracing::warn!(circuit = %self.context.name, %from, "circuit opened");
                }
                _ => {
                    tracing::info!(circuit = %self.context.name, %from, %to, "circuit transitioned");
                }
            }
            self.notify(from, to);
        }
    }

    fn is_failure_error<E: 'static>(&self, error: &E, duration: f64) -> bool {
        match &self.context.classifier {
            Some(classifier) => classifier.is_failure(&FailureContext {
                circuit_name: &self.context.name,
                error: error as &dyn std::any::Any,
                duration,
            }),
            // No classifier: every error counts as a failure.
            None => true,
        }
    }

    /// Publish outside the machine lock so subscribers may call back into
    /// the breaker.
    fn notify(&self, from: CircuitState, to: CircuitState) {
        let callbacks = self.callbacks.read().clone();
        callbacks.publish(&self.context.name, from, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::PredicateClassifier;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn tripping_breaker(clock: Arc<ManualClock>, permits: usize) -> CircuitBreaker {
        CircuitBreaker::builder("test")
            .failure_rate_threshold(50.0)
            .count_window(4)
            .minimum_calls(4)
            .wait_duration_secs(10.0)
            .half_open_permits(permits)
            .clock(clock)
            .build()
            .expect("valid config")
    }

    fn trip(breaker: &CircuitBreaker) {
        for _ in 0..4 {
            let _ = breaker.call(|| Err::<(), _>("boom"));
        }
    }

    #[test]
    fn test_breaker_starts_closed() {
        let breaker = CircuitBreaker::new("test", Config::default()).unwrap();

        assert!(breaker.is_closed());
        assert!(!breaker.is_open());
        assert_eq!(breaker.name(), "test");
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let config = Config {
            failure_rate_threshold: 120.0,
            ..Default::default()
        };

        assert_eq!(
            CircuitBreaker::new("test", config).err(),
            Some(ConfigError::FailureRateThreshold(120.0))
        );
    }

    #[test]
    fn test_trips_at_failure_rate_threshold() {
        let clock = Arc::new(ManualClock::new());
        let breaker = tripping_breaker(clock, 1);

        // [Fail, Fail, Success, Success]: 4 calls, 50% failures.
        let _ = breaker.call(|| Err::<(), _>("f1"));
        let _ = breaker.call(|| Err::<(), _>("f2"));
        assert_eq!(breaker.state(), CircuitState::Closed);
        let _ = breaker.call(|| Ok::<_, &str>(()));
        assert_eq!(breaker.state(), CircuitState::Closed);
        let _ = breaker.call(|| Ok::<_, &str>(()));

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_no_premature_trip_below_minimum_calls() {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::builder("test")
            .failure_rate_threshold(50.0)
            .count_window(10)
            .minimum_calls(10)
            .clock(clock)
            .build()
            .unwrap();

        // 100% failures, but below the floor.
        for _ in 0..9 {
            let _ = breaker.call(|| Err::<(), _>("boom"));
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
    }

    #[test]
    fn test_open_rejects_without_executing() {
        let clock = Arc::new(ManualClock::new());
        let breaker = tripping_breaker(Arc::clone(&clock), 1);
        trip(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);

        let executed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&executed);
        let result = breaker.call(move || {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, &str>(())
        });

        assert!(matches!(result, Err(CircuitError::Open { .. })));
        assert!(!executed.load(Ordering::SeqCst), "operation must not run");
        // The rejection leaves the window untouched.
        assert_eq!(breaker.snapshot().total_calls, 4);
    }

    #[test]
    fn test_fallback_when_open() {
        let clock = Arc::new(ManualClock::new());
        let breaker = tripping_breaker(clock, 1);
        trip(&breaker);

        let result = breaker.call((
            || Err::<String, _>("should not execute"),
            CallOptions::new().with_fallback(|ctx: &FallbackContext| {
                assert_eq!(ctx.circuit_name, "test");
                assert_eq!(ctx.state, CircuitState::Open);
                Ok("fallback response".to_string())
            }),
        ));

        assert_eq!(result.unwrap(), "fallback response");
    }

    #[test]
    fn test_fallback_error_propagation() {
        let clock = Arc::new(ManualClock::new());
        let breaker = tripping_breaker(clock, 1);
        trip(&breaker);

        let result = breaker.call((
            || Ok::<String, _>("should not execute".to_string()),
            CallOptions::new().with_fallback(|_ctx| Err::<String, _>("fallback error")),
        ));

        match result {
            Err(CircuitError::Execution(e)) => assert_eq!(e, "fallback error"),
            other => panic!("expected Execution error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_open_to_half_open_after_wait() {
        let clock = Arc::new(ManualClock::new());
        let breaker = tripping_breaker(Arc::clone(&clock), 2);
        trip(&breaker);

        // Not elapsed yet: still rejected.
        clock.advance(9.0);
        assert!(matches!(
            breaker.call(|| Ok::<_, &str>(())),
            Err(CircuitError::Open { .. })
        ));

        // Elapsed: the next call transitions and executes as a trial.
        clock.advance(1.0);
        assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_jittered_wait_stays_within_bounds() {
        // With jitter 0.5 the effective wait lands in [wait/2, wait].
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::builder("test")
            .failure_rate_threshold(50.0)
            .count_window(4)
            .minimum_calls(4)
            .wait_duration_secs(10.0)
            .half_open_permits(2)
            .jitter_factor(0.5)
            .clock(clock.clone())
            .build()
            .unwrap();
        trip(&breaker);

        // Below the lower bound no jittered wait can have elapsed.
        clock.advance(4.9);
        assert!(matches!(
            breaker.call(|| Ok::<_, &str>(())),
            Err(CircuitError::Open { .. })
        ));
        assert_eq!(breaker.state(), CircuitState::Open);

        // Past the full base wait every jittered wait has elapsed.
        clock.advance(6.0);
        assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_recovery_closes_and_resets_window() {
        let clock = Arc::new(ManualClock::new());
        let breaker = tripping_breaker(Arc::clone(&clock), 2);
        trip(&breaker);
        clock.advance(10.0);

        assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());

        // Both trials succeeded: closed, with a fresh window.
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().total_calls, 0);
    }

    #[test]
    fn test_failed_trials_reopen() {
        let clock = Arc::new(ManualClock::new());
        let breaker = tripping_breaker(Arc::clone(&clock), 2);
        trip(&breaker);
        clock.advance(10.0);

        let _ = breaker.call(|| Err::<(), _>("still down"));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let _ = breaker.call(|| Err::<(), _>("still down"));

        assert_eq!(breaker.state(), CircuitState::Open);

        // Freshly re-opened: rejected again until the wait elapses anew.
        assert!(matches!(
            breaker.call(|| Ok::<_, &str>(())),
            Err(CircuitError::Open { .. })
        ));
    }

    #[test]
    fn test_half_open_trial_decision_ignores_pre_open_history() {
        let clock = Arc::new(ManualClock::new());
        let breaker = tripping_breaker(Arc::clone(&clock), 2);
        trip(&breaker);
        clock.advance(10.0);

        // The main window still holds 4 failures, yet two clean trials are
        // enough to close: the decision uses only the trial tally.
        assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());
        assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_permit_bound_under_contention() {
        let clock = Arc::new(ManualClock::new());
        let breaker = Arc::new(tripping_breaker(Arc::clone(&clock), 3));
        trip(&breaker);
        clock.advance(10.0);

        let executed = Arc::new(AtomicUsize::new(0));
        let rejected = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..8 {
            let breaker = Arc::clone(&breaker);
            let executed = Arc::clone(&executed);
            let rejected = Arc::clone(&rejected);

            handles.push(std::thread::spawn(move || {
                let executed_op = Arc::clone(&executed);
                let rejected_op = Arc::clone(&rejected);
                let result = breaker.call(move || {
                    executed_op.fetch_add(1, Ordering::SeqCst);
                    // Hold every admitted trial until all 8 threads have been
                    // admitted or rejected, so no trial concludes early.
                    while executed_op.load(Ordering::SeqCst) + rejected_op.load(Ordering::SeqCst)
                        < 8
                    {
                        std::thread::yield_now();
                    }
                    Ok::<_, &str>(())
                });
                if let Err(e) = result {
                    assert!(e.is_rejection());
                    rejected.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(executed.load(Ordering::SeqCst), 3, "exactly the trial budget runs");
        assert_eq!(rejected.load(Ordering::SeqCst), 5, "excess callers are rejected");
        // All three trials succeeded, so the breaker recovered.
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().total_calls, 0);
    }

    #[test]
    fn test_slow_call_rate_trips() {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::builder("test")
            .failure_rate_threshold(100.0)
            .slow_call_rate_threshold(50.0)
            .slow_call_duration_secs(1.0)
            .count_window(4)
            .minimum_calls(2)
            .clock(clock.clone())
            .build()
            .unwrap();

        // Two successful but slow calls: 100% slow rate over 2 calls.
        for _ in 0..2 {
            let c = Arc::clone(&clock);
            let _ = breaker.call(move || {
                c.advance(2.0);
                Ok::<_, &str>(())
            });
        }

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_ignored_errors_never_trip() {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::builder("test")
            .failure_rate_threshold(50.0)
            .count_window(4)
            .minimum_calls(2)
            .classifier(Arc::new(PredicateClassifier::new(
                |_ctx: &FailureContext<'_>| false,
            )))
            .clock(clock)
            .build()
            .unwrap();

        for _ in 0..10 {
            let result = breaker.call(|| Err::<(), _>("validation error"));
            // The error still reaches the caller unchanged.
            assert!(matches!(result, Err(CircuitError::Execution(_))));
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().total_calls, 0);
    }

    #[test]
    fn test_classifier_filters_by_error_payload() {
        let clock = Arc::new(ManualClock::new());
        let classifier = Arc::new(PredicateClassifier::new(|ctx: &FailureContext<'_>| {
            ctx.error
                .downcast_ref::<&str>()
                .map(|e| e.contains("server"))
                .unwrap_or(true)
        }));
        let breaker = CircuitBreaker::builder("test")
            .failure_rate_threshold(50.0)
            .count_window(4)
            .minimum_calls(2)
            .classifier(classifier)
            .clock(clock)
            .build()
            .unwrap();

        for _ in 0..5 {
            let _ = breaker.call(|| Err::<(), _>("client_error"));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        let _ = breaker.call(|| Err::<(), _>("server_error_1"));
        let _ = breaker.call(|| Err::<(), _>("server_error_2"));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_transition_subscribers_see_full_cycle() {
        let clock = Arc::new(ManualClock::new());
        let breaker = tripping_breaker(Arc::clone(&clock), 1);

        let edges = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let edges_clone = Arc::clone(&edges);
        breaker.on_state_transition(move |from, to| {
            edges_clone.lock().push((from, to));
        });

        trip(&breaker);
        clock.advance(10.0);
        assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());

        assert_eq!(
            *edges.lock(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn test_automatic_half_open_observed_without_traffic() {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::builder("test")
            .failure_rate_threshold(50.0)
            .count_window(4)
            .minimum_calls(4)
            .wait_duration_secs(10.0)
            .automatic_half_open(true)
            .clock(clock.clone())
            .build()
            .unwrap();
        trip(&breaker);

        assert_eq!(breaker.state(), CircuitState::Open);
        clock.advance(10.0);
        // No call needed: the state read applies the elapsed wait.
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_lazy_half_open_waits_for_a_call() {
        let clock = Arc::new(ManualClock::new());
        let breaker = tripping_breaker(Arc::clone(&clock), 2);
        trip(&breaker);
        clock.advance(10.0);

        // Without automatic_half_open a state read does not transition.
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_reset_returns_to_closed() {
        let clock = Arc::new(ManualClock::new());
        let breaker = tripping_breaker(clock, 1);
        trip(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().total_calls, 0);
    }

    #[test]
    fn test_operation_result_passes_through_unchanged() {
        let breaker = CircuitBreaker::new("test", Config::default()).unwrap();

        let ok = breaker.call(|| Ok::<_, String>(42));
        assert_eq!(ok.unwrap(), 42);

        let err = breaker.call(|| Err::<i32, _>("downstream timeout"));
        match err {
            Err(CircuitError::Execution(e)) => assert_eq!(e, "downstream timeout"),
            other => panic!("expected Execution error, got {:?}", other),
        }
    }

    #[test]
    fn test_time_window_breaker_trips() {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::builder("test")
            .failure_rate_threshold(50.0)
            .time_window(60)
            .minimum_calls(4)
            .clock(clock)
            .build()
            .unwrap();

        for _ in 0..4 {
            let _ = breaker.call(|| Err::<(), _>("boom"));
        }

        assert_eq!(breaker.state(), CircuitState::Open);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn breaker(minimum: usize) -> CircuitBreaker {
        CircuitBreaker::builder("prop")
            .failure_rate_threshold(50.0)
            .count_window(32)
            .minimum_calls(minimum)
            .clock(Arc::new(ManualClock::new()))
            .build()
            .expect("valid config")
    }

    proptest! {
        /// All-failure traffic trips exactly when the minimum-calls floor
        /// is reached, never before.
        #[test]
        fn trips_exactly_at_minimum_calls(minimum in 1usize..20) {
            let breaker = breaker(minimum);

            for seen in 1..=minimum {
                let _ = breaker.call(|| Err::<(), _>("boom"));
                if seen < minimum {
                    prop_assert_eq!(breaker.state(), CircuitState::Closed);
                }
            }

            prop_assert_eq!(breaker.state(), CircuitState::Open);
        }

        /// Below the floor the state is Closed for any failure mix.
        #[test]
        fn never_trips_below_minimum_calls(
            minimum in 2usize..20,
            mix in proptest::collection::vec(any::<bool>(), 0..19),
        ) {
            let breaker = breaker(minimum);

            for failure in mix.iter().take(minimum - 1) {
                let _ = if *failure {
                    breaker.call(|| Err::<(), _>("boom"))
                } else {
                    breaker.call(|| Ok::<_, &str>(()))
                };
                prop_assert_eq!(breaker.state(), CircuitState::Closed);
            }
        }

        /// Below-threshold failure rates leave the breaker closed even with
        /// plenty of traffic.
        #[test]
        fn below_threshold_rate_stays_closed(successes in 11usize..30) {
            let breaker = breaker(4);

            // A lone failure among many successes stays under 50%.
            let _ = breaker.call(|| Err::<(), _>("boom"));
            for _ in 0..successes {
                let _ = breaker.call(|| Ok::<_, &str>(()));
            }

            prop_assert_eq!(breaker.state(), CircuitState::Closed);
        }
    }
}
