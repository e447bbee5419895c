//! Fluent construction of circuit breakers.
//!
//! The builder collects configuration, an optional clock and classifier, and
//! lifecycle hooks, then validates everything once in [`CircuitBuilder::build`].

use crate::callbacks::Callbacks;
use crate::circuit::{CircuitBreaker, CircuitState, Config};
use crate::classifier::FailureClassifier;
use crate::clock::{Clock, MonotonicClock};
use crate::errors::ConfigError;
use std::sync::Arc;

/// Builder for [`CircuitBreaker`].
///
/// ```rust
/// use tripswitch::CircuitBreaker;
///
/// let breaker = CircuitBreaker::builder("payment_api")
///     .failure_rate_threshold(50.0)
///     .count_window(20)
///     .minimum_calls(5)
///     .wait_duration_secs(30.0)
///     .build()
///     .expect("valid config");
///
/// assert!(breaker.is_closed());
/// ```
#[derive(Debug)]
pub struct CircuitBuilder {
    name: String,
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Start a builder with the default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            clock: None,
            classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Start from an existing configuration instead of the defaults.
    pub fn with_config(name: impl Into<String>, config: Config) -> Self {
        Self {
            name: name.into(),
            config,
            clock: None,
            classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Failure percentage in the window that trips the circuit.
    pub fn failure_rate_threshold(mut self, percent: f64) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    /// Slow-call percentage in the window that trips the circuit.
    pub fn slow_call_rate_threshold(mut self, percent: f64) -> Self {
        self.config.slow_call_rate_threshold = percent;
        self
    }

    /// Duration in seconds above which a call counts as slow.
    pub fn slow_call_duration_secs(mut self, secs: f64) -> Self {
        self.config.slow_call_duration_secs = secs;
        self
    }

    /// Use a count-based window over the last `size` calls.
    pub fn count_window(mut self, size: usize) -> Self {
        self.config.window_type = crate::window::WindowType::Count;
        self.config.window_size = size;
        self
    }

    /// Use a time-based window over the last `secs` seconds.
    pub fn time_window(mut self, secs: usize) -> Self {
        self.config.window_type = crate::window::WindowType::Time;
        self.config.window_size = secs;
        self
    }

    /// Calls required in the window before rates are evaluated.
    pub fn minimum_calls(mut self, count: usize) -> Self {
        self.config.minimum_calls = count;
        self
    }

    /// Seconds the circuit stays open before half-open is considered.
    pub fn wait_duration_secs(mut self, secs: f64) -> Self {
        self.config.wait_duration_secs = secs;
        self
    }

    /// Trial call budget in the half-open state.
    pub fn half_open_permits(mut self, count: usize) -> Self {
        self.config.half_open_permits = count;
        self
    }

    /// Evaluate the open-state timeout on `state()` reads as well as calls.
    pub fn automatic_half_open(mut self, enabled: bool) -> Self {
        self.config.automatic_half_open = enabled;
        self
    }

    /// Randomize the open-state wait (0.0 = none, 1.0 = full jitter).
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Inject a time source. Tests use this with a manual clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Decide which errors count toward the failure rate.
    pub fn classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Hook fired when the circuit opens.
    pub fn on_open<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(hook));
        self
    }

    /// Hook fired when the circuit closes.
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(hook));
        self
    }

    /// Hook fired when the circuit enters half-open.
    pub fn on_half_open<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(hook));
        self
    }

    /// Subscriber notified of every state transition with its edge.
    pub fn on_transition<F>(mut self, handler: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.callbacks.on_transition.push(Arc::new(handler));
        self
    }

    /// Validate the configuration and build the breaker.
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        CircuitBreaker::assemble(self.name, self.config, clock, self.classifier, self.callbacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_builder_defaults() {
        let breaker = CircuitBuilder::new("test").build().unwrap();
        assert_eq!(breaker.name(), "test");
        assert!(breaker.is_closed());
    }

    #[test]
    fn test_builder_rejects_invalid_threshold() {
        let result = CircuitBuilder::new("test")
            .failure_rate_threshold(0.0)
            .build();
        assert_eq!(result.err(), Some(ConfigError::FailureRateThreshold(0.0)));
    }

    #[test]
    fn test_builder_rejects_zero_window() {
        let result = CircuitBuilder::new("test").count_window(0).build();
        assert_eq!(result.err(), Some(ConfigError::WindowSize));
    }

    #[test]
    fn test_builder_rejects_zero_permits() {
        let result = CircuitBuilder::new("test").half_open_permits(0).build();
        assert_eq!(result.err(), Some(ConfigError::HalfOpenPermits));
    }

    #[test]
    fn test_builder_rejects_out_of_range_jitter() {
        let result = CircuitBuilder::new("test").jitter_factor(1.5).build();
        assert_eq!(result.err(), Some(ConfigError::JitterFactor(1.5)));
    }

    #[test]
    fn test_builder_rejects_negative_wait() {
        let result = CircuitBuilder::new("test").wait_duration_secs(-1.0).build();
        assert_eq!(result.err(), Some(ConfigError::WaitDuration(-1.0)));
    }

    #[test]
    fn test_with_config_starting_point() {
        let config = Config {
            minimum_calls: 2,
            ..Default::default()
        };
        let breaker = CircuitBuilder::with_config("test", config)
            .count_window(4)
            .build()
            .unwrap();

        let _ = breaker.call(|| Err::<(), _>("boom"));
        let _ = breaker.call(|| Err::<(), _>("boom"));
        assert!(breaker.is_open());
    }

    #[test]
    fn test_lifecycle_hooks_fire() {
        let clock = Arc::new(ManualClock::new());
        let opened = Arc::new(Mutex::new(Vec::new()));
        let half_opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let opened_hook = Arc::clone(&opened);
        let half_opened_hook = Arc::clone(&half_opened);
        let closed_hook = Arc::clone(&closed);

        let breaker = CircuitBuilder::new("hooks")
            .failure_rate_threshold(50.0)
            .count_window(2)
            .minimum_calls(2)
            .wait_duration_secs(5.0)
            .half_open_permits(1)
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .on_open(move |name| opened_hook.lock().unwrap().push(name.to_string()))
            .on_half_open(move |_| {
                half_opened_hook.fetch_add(1, Ordering::SeqCst);
            })
            .on_close(move |_| {
                closed_hook.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        let _ = breaker.call(|| Err::<(), _>("boom"));
        let _ = breaker.call(|| Err::<(), _>("boom"));
        assert_eq!(*opened.lock().unwrap(), vec!["hooks".to_string()]);

        clock.advance(5.0);
        assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());

        assert_eq!(half_opened.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
