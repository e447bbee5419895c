//! Named registry of shared circuit breakers.
//!
//! Callers protecting the same downstream from many places fetch one shared
//! breaker by name instead of threading an `Arc` through every call site.

use crate::circuit::{CircuitBreaker, Config};
use crate::errors::ConfigError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry mapping circuit names to shared breakers.
///
/// Lookups take a read lock; creation upgrades to a write lock and re-checks,
/// so two racing creators for the same name still end up sharing one breaker.
#[derive(Debug)]
pub struct CircuitRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: Config,
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitRegistry {
    /// Registry whose breakers use [`Config::default`].
    pub fn new() -> Self {
        Self::with_default_config(Config::default())
    }

    /// Registry whose breakers use `config` unless overridden per name.
    pub fn with_default_config(config: Config) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config: config,
        }
    }

    /// Fetch the breaker registered under `name`, creating it with the
    /// registry's default config on first use.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<CircuitBreaker>, ConfigError> {
        self.get_or_create_with(name, self.default_config.clone())
    }

    /// Fetch the breaker registered under `name`, creating it with `config`
    /// on first use. An existing breaker keeps its original config.
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: Config,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Ok(Arc::clone(breaker));
        }

        let mut breakers = self.breakers.write();
        // Re-check: another thread may have created it between locks.
        if let Some(breaker) = breakers.get(name) {
            return Ok(Arc::clone(breaker));
        }

        let breaker = Arc::new(CircuitBreaker::new(name, config)?);
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        Ok(breaker)
    }

    /// Fetch an already-registered breaker.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).map(Arc::clone)
    }

    /// Names of every registered breaker.
    pub fn names(&self) -> Vec<String> {
        self.breakers.read().keys().cloned().collect()
    }

    /// Drop the breaker registered under `name`.
    ///
    /// Call sites still holding the `Arc` keep using the old breaker; new
    /// lookups create a fresh one.
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.write().remove(name)
    }
}
