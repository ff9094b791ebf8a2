//! Startup wiring and graceful shutdown (spec §4.11). Constructs the Resilience Facade,
//! downstream clients, Idempotency Index, Processor, and Consumer Loop; starts the health
//! server and the background sweepers; on SIGTERM/Ctrl-C cancels the root token and lets the
//! in-flight message finish within a shutdown deadline before every subordinate is torn down.

use crate::clients::{AllocationClient, ExecutionClient};
use crate::config::AppConfig;
use crate::consumer::{ConsumerLoop, ConsumerLoopConfig, MessageSource};
use crate::dlq::DeadLetterStore;
use crate::facade::{ResilienceFacade, ResilienceFacadeConfig};
use crate::http::{self, HealthState};
use crate::idempotency::IdempotencyIndex;
use crate::processor::{Processor, ProcessorConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Bootstrap {
    pub application: Application,
    pub processor: Arc<Processor>,
    pub facade: Arc<ResilienceFacade>,
    pub health: HealthState,
}

const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct Application {
    pub config: AppConfig,
    pub cancellation: CancellationToken,
    pub dlq: Arc<DeadLetterStore>,
    pub idempotency: Arc<IdempotencyIndex>,
}

impl Application {
    /// Wires every long-lived singleton together and returns the pieces [`run`] needs.
    /// The Idempotency Index, DLQ, and breaker registry (owned by the facade) are process-wide
    /// singletons created here once and torn down in reverse order on shutdown.
    pub fn bootstrap(config: AppConfig) -> Bootstrap {
        let cancellation = CancellationToken::new();

        let facade_config = ResilienceFacadeConfig {
            execution_service_timeout: config.execution_service.timeout,
            broker_fetch_timeout: config.bus.fetch_timeout,
            other_timeout: config.allocation_service.timeout,
            max_attempts: config.execution_service.max_retries.max(1),
            initial_delay: config.execution_service.retry_backoff,
            max_delay: config.execution_service.retry_backoff * 10,
            breaker_failure_threshold: config.execution_service.circuit_breaker.failure_threshold,
            breaker_recovery_timeout: config.execution_service.circuit_breaker.timeout,
            breaker_success_threshold: 3,
            dlq_max_size: 10_000,
            dlq_retention_period: Duration::from_secs(24 * 60 * 60),
        };
        let facade = Arc::new(ResilienceFacade::with_cancellation(facade_config, cancellation.clone()));

        let http_client = reqwest::Client::builder()
            .build()
            .expect("reqwest client configuration is valid");
        let execution_client = ExecutionClient::new(http_client.clone(), config.execution_service.base_url.clone());
        let allocation_client = AllocationClient::new(http_client, config.allocation_service.base_url.clone());

        let execution: Arc<dyn crate::clients::ExecutionCollaborator> =
            Arc::new(FacadeBoundExecution { facade: Arc::clone(&facade), inner: execution_client });
        let allocation = Arc::new(FacadeBoundAllocation { facade: Arc::clone(&facade), inner: allocation_client });

        let idempotency = Arc::new(IdempotencyIndex::new(
            config.processor.idempotency_max_entries,
            config.processor.idempotency_retention_period,
        ));

        let processor_config = ProcessorConfig {
            block_commit_on_allocation_failure: config.processor.block_commit_on_allocation_failure,
        };
        let dlq = facade.dead_letter_store();
        let health = HealthState::new(Arc::clone(&execution), Arc::clone(&dlq));
        let processor = Arc::new(Processor::new(
            processor_config,
            execution,
            allocation,
            Arc::clone(&idempotency),
            Arc::clone(&dlq),
        ));

        let app = Self { config, cancellation, dlq, idempotency };
        Bootstrap { application: app, processor, facade, health }
    }

    /// Runs the Consumer Loop against `source`, the health server, and the periodic
    /// sweepers until a shutdown signal arrives, then waits up to the configured deadline
    /// for the in-flight message and background tasks to wind down.
    pub async fn run<S: MessageSource>(
        &self,
        source: S,
        processor: Arc<Processor>,
        health: HealthState,
    ) -> anyhow::Result<()> {
        let consumer = ConsumerLoop::new(
            source,
            processor,
            Arc::clone(&self.idempotency),
            ConsumerLoopConfig { fetch_timeout: self.config.bus.fetch_timeout },
        );

        let dlq_sweeper = self.dlq.spawn_sweeper(SWEEP_INTERVAL);
        let idempotency = Arc::clone(&self.idempotency);
        let idempotency_sweep_cancellation = self.cancellation.clone();
        let idempotency_sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => { idempotency.sweep(); }
                    _ = idempotency_sweep_cancellation.cancelled() => break,
                }
            }
        });

        let http_cancellation = self.cancellation.clone();
        let http_addr = format!("{}:{}", self.config.http.host, self.config.http.port);
        let http_health = health.clone();
        let http_server = tokio::spawn(async move {
            if let Err(error) = http::serve(&http_addr, http_health, http_cancellation).await {
                tracing::error!(error = %error, "health server exited with an error");
            }
        });

        tokio::select! {
            _ = consumer.run(&self.cancellation) => {
                tracing::info!("consumer loop returned on its own");
            }
            _ = shutdown_signal() => {
                tracing::info!("shutdown signal received, cancelling root token");
                self.cancellation.cancel();
            }
        }
        health.set_consumer_ready(false);

        let deadline = DEFAULT_SHUTDOWN_DEADLINE;
        if tokio::time::timeout(deadline, consumer.run(&self.cancellation)).await.is_err() {
            tracing::warn!(?deadline, "consumer loop did not stop within the shutdown deadline");
        }

        self.dlq.request_shutdown();
        let _ = tokio::time::timeout(deadline, dlq_sweeper).await;
        idempotency_sweeper.abort();
        http_server.abort();

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Binds an [`crate::clients::ExecutionCollaborator`] through the facade so the Processor
/// never has to know the facade exists.
struct FacadeBoundExecution {
    facade: Arc<ResilienceFacade>,
    inner: ExecutionClient,
}

#[async_trait::async_trait]
impl crate::clients::ExecutionCollaborator for FacadeBoundExecution {
    async fn get_execution(
        &self,
        execution_service_id: i64,
        payload: &str,
        source: crate::dlq::SourceMetadata,
    ) -> Result<crate::domain::ExecutionRecord, crate::AppError> {
        self.facade
            .call(
                "execution-service",
                crate::facade::OperationKind::ExecutionService,
                "get-execution",
                payload,
                source.clone(),
                || self.inner.get_execution(execution_service_id, payload, source.clone()),
            )
            .await
    }

    async fn update_execution(
        &self,
        execution_service_id: i64,
        update: crate::domain::ExecutionUpdateRequest,
        payload: &str,
        source: crate::dlq::SourceMetadata,
    ) -> Result<crate::domain::ExecutionRecord, crate::AppError> {
        self.facade
            .call(
                "execution-service",
                crate::facade::OperationKind::ExecutionService,
                "update-execution",
                payload,
                source.clone(),
                || self.inner.update_execution(execution_service_id, update.clone(), payload, source.clone()),
            )
            .await
    }

    async fn is_healthy(&self) -> bool {
        self.inner.is_healthy().await
    }
}

struct FacadeBoundAllocation {
    facade: Arc<ResilienceFacade>,
    inner: AllocationClient,
}

#[async_trait::async_trait]
impl crate::clients::AllocationCollaborator for FacadeBoundAllocation {
    async fn post_execution(
        &self,
        allocation: &crate::domain::AllocationRequest,
        payload: &str,
        source: crate::dlq::SourceMetadata,
    ) -> Result<(), crate::AppError> {
        self.facade
            .call(
                "allocation-service",
                crate::facade::OperationKind::Other,
                "post-execution",
                payload,
                source.clone(),
                || self.inner.post_execution(allocation, payload, source.clone()),
            )
            .await
    }
}
