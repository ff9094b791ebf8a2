//! Consumer Loop (spec §4.10): single worker per consumer-group membership. Pulls one
//! message at a time, decodes it, hands it to the [`Processor`], and commits only on a
//! successful outcome. Generic over [`MessageSource`] so the core crate stays broker-agnostic
//! — bindings live in sidecar crates (`confirmation-service-kafka` and friends).

use crate::dlq::SourceMetadata;
use crate::domain::FillEvent;
use crate::idempotency::IdempotencyIndex;
use crate::processor::{Processor, ProcessOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A decoded-or-not message pulled from the bus, carrying enough to commit or to describe
/// where it came from for DLQ/idempotency bookkeeping.
pub struct RawMessage {
    pub payload: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Fetch/commit contract the Consumer Loop drives. Implemented per-broker in a sidecar crate
/// (Kafka's `StreamConsumer` + manual `CommitMode::Sync`, for instance).
#[async_trait::async_trait]
pub trait MessageSource: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Waits up to `timeout` for the next message. `Ok(None)` on a fetch timeout — not an
    /// error, the loop just goes around again.
    async fn fetch(&self, timeout: Duration) -> Result<Option<RawMessage>, Self::Error>;

    /// Commits the offset for `message`. Called only after a successful Processor outcome.
    async fn commit(&self, message: &RawMessage) -> Result<(), Self::Error>;
}

pub struct ConsumerLoopConfig {
    pub fetch_timeout: Duration,
}

impl Default for ConsumerLoopConfig {
    fn default() -> Self {
        Self { fetch_timeout: Duration::from_secs(30) }
    }
}

pub struct ConsumerLoop<S: MessageSource> {
    source: S,
    processor: Arc<Processor>,
    idempotency: Arc<IdempotencyIndex>,
    config: ConsumerLoopConfig,
}

impl<S: MessageSource> ConsumerLoop<S> {
    pub fn new(
        source: S,
        processor: Arc<Processor>,
        idempotency: Arc<IdempotencyIndex>,
        config: ConsumerLoopConfig,
    ) -> Self {
        Self { source, processor, idempotency, config }
    }

    /// Runs until `cancellation` fires. The in-flight message, if any, is allowed to finish
    /// (bounded by the Resilience Facade's own timeouts) before the loop returns.
    pub async fn run(&self, cancellation: &CancellationToken) {
        loop {
            if cancellation.is_cancelled() {
                tracing::info!("consumer loop stopping: cancellation requested");
                return;
            }

            let message = tokio::select! {
                _ = cancellation.cancelled() => {
                    tracing::info!("consumer loop stopping: cancellation requested");
                    return;
                }
                fetched = self.source.fetch(self.config.fetch_timeout) => fetched,
            };

            let message = match message {
                Ok(Some(message)) => message,
                Ok(None) => continue, // fetch timeout, not an error
                Err(error) => {
                    tracing::error!(error = %error, "fetch failed");
                    continue;
                }
            };

            self.handle_message(message, cancellation).await;
        }
    }

    async fn handle_message(&self, message: RawMessage, cancellation: &CancellationToken) {
        let source = SourceMetadata {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
        };

        let event: FillEvent = match serde_json::from_str(&message.payload) {
            Ok(event) => event,
            Err(error) => {
                // Poison message: do not commit, let the broker redeliver. There's no
                // FillEvent to key the Idempotency Index on, so this is registered directly
                // in the Dead-Letter Store rather than the Idempotency Index (spec §4.10).
                tracing::error!(
                    error = %error,
                    topic = message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "failed to decode fill event, offset will not be committed"
                );
                self.processor.record_poison_message(message.payload.clone(), error.to_string(), source);
                crate::telemetry::metrics::record_failed("decode");
                return;
            }
        };

        let outcome = self.processor.process(event, source, cancellation).await;
        match &outcome {
            ProcessOutcome::ValidationFailed { errors } => {
                tracing::warn!(errors = errors.join("; "), "validation failed, offset not committed");
                crate::telemetry::metrics::record_failed("validation");
            }
            ProcessOutcome::DownstreamFailed { error } => {
                tracing::warn!(error = %error, "downstream call failed terminally, offset not committed");
                crate::telemetry::metrics::record_failed("downstream");
            }
            ProcessOutcome::SkippedDuplicate => {
                tracing::debug!("duplicate message skipped");
                crate::telemetry::metrics::record_processed("duplicate");
            }
            ProcessOutcome::Processed { correction, forwarded } => {
                tracing::info!(correction, forwarded, "message processed");
                crate::telemetry::metrics::record_processed(if *correction { "correction" } else { "processed" });
            }
        }

        if outcome.should_commit() {
            if let Err(error) = self.source.commit(&message).await {
                tracing::error!(error = %error, "offset commit failed");
            }
        }
    }

    pub fn idempotency_index(&self) -> Arc<IdempotencyIndex> {
        Arc::clone(&self.idempotency)
    }
}
