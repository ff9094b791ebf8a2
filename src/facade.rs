//! Resilience Facade: the only path through which side effects reach external services,
//! per spec §4.5. Wraps an operation with a per-kind timeout, circuit-breaker admission, and
//! retry execution; on terminal failure records a dead-letter entry.

use crate::backoff::Backoff;
use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::dlq::{DeadLetterStore, SourceMetadata};
use crate::error::{flatten_resilience_error, AppError};
use crate::retry::RetryPolicyBuilder;
use crate::timeout::TimeoutPolicy;
use crate::ResilienceError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drives the per-kind timeout defaults in spec §4.5: Execution Service 10s, broker fetch
/// 30s, other 5s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    ExecutionService,
    BrokerFetch,
    Other,
}

impl OperationKind {
    fn default_timeout(self) -> Duration {
        match self {
            OperationKind::ExecutionService => Duration::from_secs(10),
            OperationKind::BrokerFetch => Duration::from_secs(30),
            OperationKind::Other => Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResilienceFacadeConfig {
    pub execution_service_timeout: Duration,
    pub broker_fetch_timeout: Duration,
    pub other_timeout: Duration,
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub breaker_failure_threshold: usize,
    pub breaker_recovery_timeout: Duration,
    pub breaker_success_threshold: usize,
    pub dlq_max_size: usize,
    pub dlq_retention_period: Duration,
}

impl Default for ResilienceFacadeConfig {
    fn default() -> Self {
        Self {
            execution_service_timeout: OperationKind::ExecutionService.default_timeout(),
            broker_fetch_timeout: OperationKind::BrokerFetch.default_timeout(),
            other_timeout: OperationKind::Other.default_timeout(),
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            breaker_failure_threshold: 5,
            breaker_recovery_timeout: Duration::from_secs(30),
            breaker_success_threshold: 3,
            dlq_max_size: 1000,
            dlq_retention_period: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Composes Retry + per-downstream Circuit Breaker + per-kind Timeout + Dead-Letter Store.
/// This is the single entry point through which downstream clients invoke HTTP calls.
pub struct ResilienceFacade {
    config: ResilienceFacadeConfig,
    breakers: CircuitBreakerRegistry,
    dlq: Arc<DeadLetterStore>,
    cancellation: CancellationToken,
}

impl ResilienceFacade {
    pub fn new(config: ResilienceFacadeConfig) -> Self {
        Self::with_cancellation(config, CancellationToken::new())
    }

    pub fn with_cancellation(config: ResilienceFacadeConfig, cancellation: CancellationToken) -> Self {
        let breakers = CircuitBreakerRegistry::new(
            config.breaker_failure_threshold,
            config.breaker_recovery_timeout,
            config.breaker_success_threshold,
        );
        let dlq = Arc::new(DeadLetterStore::new(config.dlq_max_size, config.dlq_retention_period));
        Self { config, breakers, dlq, cancellation }
    }

    pub fn dead_letter_store(&self) -> Arc<DeadLetterStore> {
        Arc::clone(&self.dlq)
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    fn timeout_for(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::ExecutionService => self.config.execution_service_timeout,
            OperationKind::BrokerFetch => self.config.broker_fetch_timeout,
            OperationKind::Other => self.config.other_timeout,
        }
    }

    /// Runs `operation` under timeout + circuit-breaker admission + retry, scoped to
    /// `downstream` (the breaker key, e.g. `"execution-service"`). On terminal failure the
    /// facade records a dead-letter entry carrying the original event `payload` and the
    /// broker `source` it was read from (spec §4.4's DLQ record shape), not the operation
    /// label.
    pub async fn call<T, Op, Fut>(
        &self,
        downstream: &str,
        kind: OperationKind,
        label: &str,
        payload: &str,
        source: SourceMetadata,
        operation: Op,
    ) -> Result<T, AppError>
    where
        T: Send,
        Op: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, AppError>> + Send,
    {
        let timeout = TimeoutPolicy::new(self.timeout_for(kind)).expect("configured timeout is within bounds");
        let breaker = self.breakers.get_or_create(downstream);
        let backoff = Backoff::exponential(self.config.initial_delay).with_max(self.config.max_delay);
        let retry = RetryPolicyBuilder::<AppError>::new()
            .max_attempts(self.config.max_attempts)
            .expect("facade max_attempts is configured > 0")
            .backoff(backoff)
            .should_retry(|e: &AppError| e.retryable())
            .with_cancellation(self.cancellation.clone())
            .build();

        let result = retry
            .execute(move || {
                let breaker = breaker.clone();
                let operation = &operation;
                async move {
                    breaker
                        .execute(move || async move {
                            timeout.execute(move || async move { operation().await.map_err(ResilienceError::Inner) }).await
                        })
                        .await
                }
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(envelope) => {
                let flat = flatten_resilience_error(envelope);
                tracing::warn!(downstream, label, error = %flat, "facade call terminally failed");
                self.dlq.insert(payload.to_string(), flat.to_string(), source);
                Err(flat)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source() -> SourceMetadata {
        SourceMetadata { topic: "fill-events".to_string(), partition: 0, offset: 42 }
    }

    #[tokio::test]
    async fn successful_call_does_not_touch_dlq() {
        let facade = ResilienceFacade::new(ResilienceFacadeConfig::default());
        let result = facade
            .call("execution-service", OperationKind::ExecutionService, "get-execution", "{}", source(), || async {
                Ok::<_, AppError>(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(facade.dead_letter_store().stats().current_size, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_land_in_dead_letter_store() {
        let mut config = ResilienceFacadeConfig::default();
        config.max_attempts = 2;
        config.initial_delay = Duration::from_millis(1);
        config.max_delay = Duration::from_millis(2);
        let facade = ResilienceFacade::new(config);

        let calls = AtomicUsize::new(0);
        let result = facade
            .call("execution-service", OperationKind::ExecutionService, "get-execution", "{\"id\":1}", source(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AppError::external("boom")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(facade.dead_letter_store().stats().current_size, 1);
        assert!(calls.load(Ordering::SeqCst) >= 1);
        let record = facade.dead_letter_store().list(1).into_iter().next().unwrap();
        assert_eq!(record.payload, "{\"id\":1}");
        assert_eq!(record.source.topic, "fill-events");
    }

    #[tokio::test]
    async fn non_retryable_failure_returns_immediately_and_reaches_dlq() {
        let facade = ResilienceFacade::new(ResilienceFacadeConfig::default());
        let calls = AtomicUsize::new(0);
        let result = facade
            .call("execution-service", OperationKind::ExecutionService, "get-execution", "{\"id\":1}", source(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AppError::validation("bad payload")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "validation errors are not retried");
        assert_eq!(facade.dead_letter_store().stats().current_size, 1);
    }
}
