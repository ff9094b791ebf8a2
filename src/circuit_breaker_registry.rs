//! Registry for managing named circuit breakers.
//!
//! Per-downstream breakers (e.g. `"execution-service"`, `"allocation-service"`) are created
//! lazily and looked up by name, giving the Resilience Facade and the `/stats` endpoint a
//! single place to inspect or manually reset a breaker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitBreakerSnapshot};

/// Registry keyed by downstream name.
#[derive(Clone, Default)]
pub struct CircuitBreakerRegistry {
    inner: Arc<Mutex<HashMap<String, CircuitBreakerPolicy>>>,
    config: CircuitBreakerConfigTemplate,
}

/// Per-downstream overrides are rare; most breakers share one config, cloned per entry.
#[derive(Clone)]
struct CircuitBreakerConfigTemplate(CircuitBreakerConfig);

impl Default for CircuitBreakerConfigTemplate {
    fn default() -> Self {
        Self(CircuitBreakerConfig::standard())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: usize, recovery_timeout: Duration, success_threshold: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            config: CircuitBreakerConfigTemplate(CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout,
                half_open_max_calls: 1,
                success_threshold,
                reset_timeout: Some(Duration::from_secs(60)),
            }),
        }
    }

    /// Fetch the breaker for `name`, creating one from the registry's template config on
    /// first use.
    pub fn get_or_create(&self, name: &str) -> CircuitBreakerPolicy {
        let mut map = self.inner.lock().unwrap();
        map.entry(name.to_string()).or_insert_with(|| CircuitBreakerPolicy::with_config(self.config.0.clone())).clone()
    }

    /// Reset a registered breaker by name. No-op (not an error) if it was never created,
    /// since a breaker that has never tripped has nothing to reset.
    pub fn reset(&self, name: &str) {
        if let Some(breaker) = self.inner.lock().unwrap().get(name) {
            breaker.reset();
        }
    }

    /// Snapshot of every breaker currently tracked, for the `/stats` endpoint.
    pub fn snapshot(&self) -> Vec<(String, CircuitBreakerSnapshot)> {
        let map = self.inner.lock().unwrap();
        let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), v.snapshot())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
