//! End-to-end scenarios from spec §8, driven through the public API: the Resilience Facade
//! for the breaker/DLQ behaviour and the full `Application` lifecycle for graceful shutdown.

use async_trait::async_trait;
use confirmation_service::clients::{AllocationCollaborator, ExecutionCollaborator};
use confirmation_service::consumer::{ConsumerLoop, ConsumerLoopConfig, MessageSource, RawMessage};
use confirmation_service::dlq::{DeadLetterStore, SourceMetadata};
use confirmation_service::domain::{AllocationRequest, ExecutionRecord, ExecutionUpdateRequest, TradeType};
use confirmation_service::error::AppError;
use confirmation_service::facade::{OperationKind, ResilienceFacade, ResilienceFacadeConfig};
use confirmation_service::idempotency::IdempotencyIndex;
use confirmation_service::processor::{Processor, ProcessorConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

fn test_source() -> SourceMetadata {
    SourceMetadata { topic: "fill-events".to_string(), partition: 0, offset: 1 }
}

fn valid_payload() -> String {
    r#"{
        "id": 11, "executionServiceId": 27, "isOpen": false, "executionStatus": "FULL",
        "tradeType": "BUY", "destination": "ML", "securityId": "SEC1", "ticker": "IBM",
        "quantity": 1000, "quantityFilled": 1000, "averagePrice": 190.4096,
        "receivedTimestamp": 1748354367.509362, "sentTimestamp": 1748354367.512467,
        "lastFilledTimestamp": 1748354504.1602714, "version": 1
    }"#
    .to_string()
}

// Scenario 5: five consecutive Get 500s trip a breaker with failureThreshold=1; the sixth
// call short-circuits with CircuitOpen and never reaches the operation.
#[tokio::test]
async fn breaker_opens_after_threshold_and_rejects_without_a_call() {
    let mut config = ResilienceFacadeConfig::default();
    config.breaker_failure_threshold = 1;
    config.max_attempts = 1; // isolate breaker behaviour from the retry policy
    let facade = ResilienceFacade::new(config);

    let calls = AtomicUsize::new(0);
    let first = facade
        .call("execution-service", OperationKind::ExecutionService, "get-execution", "{}", test_source(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(AppError::external("downstream down")) }
        })
        .await;
    assert!(first.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let second = facade
        .call("execution-service", OperationKind::ExecutionService, "get-execution", "{}", test_source(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), AppError>(()) }
        })
        .await;
    assert!(second.is_err(), "breaker should reject admission while open");
    assert_eq!(calls.load(Ordering::SeqCst), 1, "the rejected call never reaches the operation");
}

struct QueueSource {
    messages: AsyncMutex<Vec<RawMessage>>,
}

#[derive(Debug, thiserror::Error)]
#[error("queue source error")]
struct QueueError;

#[async_trait]
impl MessageSource for QueueSource {
    type Error = QueueError;

    async fn fetch(&self, _timeout: Duration) -> Result<Option<RawMessage>, Self::Error> {
        Ok(self.messages.lock().await.pop())
    }

    async fn commit(&self, _message: &RawMessage) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct SlowExecution {
    update_delay: Duration,
}

#[async_trait]
impl ExecutionCollaborator for SlowExecution {
    async fn get_execution(&self, id: i64, _payload: &str, _source: SourceMetadata) -> Result<ExecutionRecord, AppError> {
        Ok(ExecutionRecord {
            id,
            quantity_filled: 0,
            quantity: 1000,
            average_price: 190.0,
            version: 1,
            trade_type: TradeType::Buy,
            destination: "ML".to_string(),
            security_id: "SEC1".to_string(),
        })
    }

    async fn update_execution(
        &self,
        id: i64,
        update: ExecutionUpdateRequest,
        _payload: &str,
        _source: SourceMetadata,
    ) -> Result<ExecutionRecord, AppError> {
        tokio::time::sleep(self.update_delay).await;
        Ok(ExecutionRecord {
            id,
            quantity_filled: update.quantity_filled,
            quantity: 1000,
            average_price: update.average_price,
            version: update.version + 1,
            trade_type: TradeType::Buy,
            destination: "ML".to_string(),
            security_id: "SEC1".to_string(),
        })
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

struct StubAllocation;

#[async_trait]
impl AllocationCollaborator for StubAllocation {
    async fn post_execution(
        &self,
        _allocation: &AllocationRequest,
        _payload: &str,
        _source: SourceMetadata,
    ) -> Result<(), AppError> {
        Ok(())
    }
}

// Scenario 6: a cancellation arriving mid-Update still lets that Update finish; the consumer
// loop does not start pulling another message after cancellation.
#[tokio::test]
async fn in_flight_update_completes_after_cancellation_is_requested() {
    let idempotency = Arc::new(IdempotencyIndex::new(1000, Duration::from_secs(3600)));
    let dlq = Arc::new(DeadLetterStore::new(100, Duration::from_secs(3600)));
    let processor = Arc::new(Processor::new(
        ProcessorConfig::default(),
        Arc::new(SlowExecution { update_delay: Duration::from_millis(50) }),
        Arc::new(StubAllocation),
        Arc::clone(&idempotency),
        dlq,
    ));
    let source = QueueSource {
        messages: AsyncMutex::new(vec![RawMessage {
            payload: valid_payload(),
            topic: "fill-events".to_string(),
            partition: 0,
            offset: 1,
        }]),
    };
    let consumer = ConsumerLoop::new(source, processor, idempotency, ConsumerLoopConfig::default());

    let cancellation = CancellationToken::new();
    let inner_cancellation = cancellation.clone();
    let run = tokio::spawn(async move { consumer.run(&inner_cancellation).await });

    // Let the in-flight message reach the Update call, then request shutdown.
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancellation.cancel();

    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("consumer loop should stop promptly after its in-flight message completes")
        .expect("task should not panic");
}
