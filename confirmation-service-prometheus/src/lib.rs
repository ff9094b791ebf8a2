//! Prometheus gauge exporter for the core crate's [`CircuitBreakerRegistry`]. The core crate
//! owns the counters for message outcomes (`confirmation_service::telemetry::metrics`); this
//! sidecar adds breaker state as gauges into the same registry so `/metrics` reports both.

use confirmation_service::{CircuitBreakerRegistry, CircuitState};
use prometheus::{GaugeVec, IntGaugeVec, Registry};

#[derive(Clone)]
pub struct BreakerGaugeSink {
    registry: Registry,
    state: IntGaugeVec,
    failure_count: GaugeVec,
}

/// Numeric encoding of [`CircuitState`] for the `confirmation_service_breaker_state` gauge:
/// `0` closed, `1` half-open, `2` open.
fn state_value(state: CircuitState) -> i64 {
    match state {
        CircuitState::Closed => 0,
        CircuitState::HalfOpen => 1,
        CircuitState::Open => 2,
    }
}

impl BreakerGaugeSink {
    /// Registers the breaker gauges into `registry`.
    ///
    /// # Errors
    /// Returns an error if a gauge of the same name is already registered.
    pub fn new(registry: Registry) -> Result<Self, prometheus::Error> {
        let state = IntGaugeVec::new(
            prometheus::Opts::new("confirmation_service_breaker_state", "Circuit breaker state (0=closed,1=half-open,2=open)"),
            &["downstream"],
        )?;
        let failure_count = GaugeVec::new(
            prometheus::Opts::new("confirmation_service_breaker_failure_count", "Consecutive failures observed by the breaker"),
            &["downstream"],
        )?;
        registry.register(Box::new(state.clone()))?;
        registry.register(Box::new(failure_count.clone()))?;
        Ok(Self { registry, state, failure_count })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Samples every breaker in `breakers` and updates the gauges. Call this on a timer or
    /// immediately before a scrape.
    pub fn sample(&self, breakers: &CircuitBreakerRegistry) {
        for (name, snapshot) in breakers.snapshot() {
            self.state.with_label_values(&[&name]).set(state_value(snapshot.state));
            self.failure_count.with_label_values(&[&name]).set(snapshot.failure_count as f64);
        }
    }
}
