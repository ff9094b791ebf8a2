//! Message state machine: `Received → Validated → DedupChecked → Fetched → BusinessValidated →
//! Updated → Forwarded(optional) → Committed`, with abort transitions into `Failed` from any
//! state on fatal error. Spec §4.9.

use crate::clients::{AllocationCollaborator, ExecutionCollaborator};
use crate::dlq::{DeadLetterStore, SourceMetadata};
use crate::domain::{AllocationRequest, ExecutionUpdateRequest, FillEvent};
use crate::error::AppError;
use crate::idempotency::{DedupDecision, IdempotencyIndex};
use crate::validator::{validate, validate_against_execution_record};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Whether the broker offset should be committed for this message, and why — metrics and
/// logs key off this rather than a bare `Result`, since a `Skip` is a success outcome too.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Exact duplicate — no downstream calls made.
    SkippedDuplicate,
    /// Processed to completion (Execution updated, Allocation forwarded if applicable).
    Processed { correction: bool, forwarded: bool },
    /// Validation failed; offset must NOT be committed (spec §4.9 step 1, §4.10).
    ValidationFailed { errors: Vec<String> },
    /// A downstream call terminally failed after exhausting the Resilience Facade's budget.
    DownstreamFailed { error: AppError },
}

impl ProcessOutcome {
    /// Whether the Consumer Loop should commit the broker offset for this outcome.
    pub fn should_commit(&self) -> bool {
        match self {
            ProcessOutcome::SkippedDuplicate | ProcessOutcome::Processed { .. } => true,
            ProcessOutcome::ValidationFailed { .. } | ProcessOutcome::DownstreamFailed { .. } => false,
        }
    }
}

/// Whether an Allocation-side forwarding failure blocks the broker commit. Spec §9 open
/// question: the observed source behaviour commits regardless and records the failure to DLQ;
/// this is kept as the default but made configurable.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    pub block_commit_on_allocation_failure: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { block_commit_on_allocation_failure: false }
    }
}

pub struct Processor {
    config: ProcessorConfig,
    execution: Arc<dyn ExecutionCollaborator>,
    allocation: Arc<dyn AllocationCollaborator>,
    idempotency: Arc<IdempotencyIndex>,
    dlq: Arc<DeadLetterStore>,
}

impl Processor {
    pub fn new(
        config: ProcessorConfig,
        execution: Arc<dyn ExecutionCollaborator>,
        allocation: Arc<dyn AllocationCollaborator>,
        idempotency: Arc<IdempotencyIndex>,
        dlq: Arc<DeadLetterStore>,
    ) -> Self {
        Self { config, execution, allocation, idempotency, dlq }
    }

    /// Registers a message that never decoded into a Fill Event (spec §4.10's poison-message
    /// handling) directly in the Dead-Letter Store. There is no `FillEvent` to key the
    /// Idempotency Index on, so this is the only bookkeeping a malformed payload gets — the
    /// broker will keep redelivering it until an operator intervenes.
    pub fn record_poison_message(&self, payload: String, failure_reason: String, source: SourceMetadata) {
        self.dlq.insert(payload, failure_reason, source);
    }

    /// Runs the full 7-step pipeline for a single decoded Fill Event. `source` is the broker
    /// origin the event was read from, carried through to every Dead-Letter Store record this
    /// run produces so a DLQ entry can always be correlated back to its offset. `cancellation`
    /// is threaded down to every downstream call via the Resilience Facade the collaborators
    /// were constructed with.
    pub async fn process(
        &self,
        event: FillEvent,
        source: SourceMetadata,
        cancellation: &CancellationToken,
    ) -> ProcessOutcome {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let payload = serde_json::to_string(&event).unwrap_or_default();

        // Step 1: structural + business self-validation.
        let outcome = validate(&event);
        if !outcome.valid {
            let reason = outcome.errors.join("; ");
            self.idempotency.record_outcome(&event, correlation_id, false, Some(reason.clone()));
            self.dlq.insert(payload, reason, source);
            return ProcessOutcome::ValidationFailed { errors: outcome.errors };
        }
        for warning in &outcome.warnings {
            tracing::warn!(fill_id = event.id, warning, "validation warning, processing continues");
        }

        // Step 2: dedup.
        let decision = self.idempotency.decide(&event);
        if !decision.should_process() {
            self.idempotency.record_outcome(&event, correlation_id, true, None);
            return ProcessOutcome::SkippedDuplicate;
        }
        let correction = matches!(decision, DedupDecision::ProcessCorrection);

        if cancellation.is_cancelled() {
            return ProcessOutcome::DownstreamFailed { error: AppError::internal("cancelled before fetch") };
        }

        // Step 3: fetch current Execution Record.
        let record = match self
            .execution
            .get_execution(event.execution_service_id, &payload, source.clone())
            .await
        {
            Ok(record) => record,
            Err(error) => {
                self.idempotency.record_outcome(&event, correlation_id, false, Some(error.to_string()));
                return ProcessOutcome::DownstreamFailed { error };
            }
        };

        // Step 4: business-validate against the fetched record. A decreasing quantityFilled
        // is permitted but logged as a correction, never rejected.
        let business_outcome = validate_against_execution_record(&event, &record);
        if !business_outcome.valid {
            let reason = business_outcome.errors.join("; ");
            self.idempotency.record_outcome(&event, correlation_id, false, Some(reason.clone()));
            self.dlq.insert(payload, reason, source);
            return ProcessOutcome::ValidationFailed { errors: business_outcome.errors };
        }
        if event.quantity_filled < record.quantity_filled {
            tracing::info!(
                fill_id = event.id,
                previous = record.quantity_filled,
                new = event.quantity_filled,
                "quantityFilled decreased relative to fetched record; treated as a correction"
            );
        }

        // Step 5: update via optimistic concurrency, carrying the fetched version.
        let update = ExecutionUpdateRequest {
            quantity_filled: event.quantity_filled,
            average_price: event.average_price,
            version: record.version,
        };
        if let Err(error) = self
            .execution
            .update_execution(event.execution_service_id, update, &payload, source.clone())
            .await
        {
            self.idempotency.record_outcome(&event, correlation_id, false, Some(error.to_string()));
            return ProcessOutcome::DownstreamFailed { error };
        }

        // Step 6: forward closed trades to Allocation. Non-fatal for this outcome by default;
        // the facade already records the failure to DLQ for later replay.
        let mut forwarded = false;
        if !event.is_open {
            let allocation = AllocationRequest::from_fill_event(&event);
            match self.allocation.post_execution(&allocation, &payload, source.clone()).await {
                Ok(()) => forwarded = true,
                Err(error) => {
                    tracing::warn!(fill_id = event.id, error = %error, "allocation forwarding failed, recorded to dead-letter");
                    if self.config.block_commit_on_allocation_failure {
                        self.idempotency.record_outcome(
                            &event,
                            correlation_id,
                            false,
                            Some(error.to_string()),
                        );
                        return ProcessOutcome::DownstreamFailed { error };
                    }
                }
            }
        }

        // Step 7: record outcome.
        self.idempotency.record_outcome(&event, correlation_id, true, None);
        ProcessOutcome::Processed { correction, forwarded }
    }
}
