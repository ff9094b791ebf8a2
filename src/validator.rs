//! Two-layer fill validation: structural (shape, ranges, enums) then business (consistency
//! against a fetched Execution Record), per spec §4.8. Format checks on ticker/destination/
//! security id are warnings, never errors — they don't block processing.

use crate::domain::{ExecutionRecord, ExecutionStatus, FillEvent};

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self { valid: true, errors: Vec::new(), warnings: Vec::new() }
    }

    fn merge(mut self, other: Self) -> Self {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.valid = self.valid && other.errors.is_empty();
        self
    }
}

fn is_uppercase_alpha(s: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&s.len()) && s.chars().all(|c| c.is_ascii_uppercase())
}

/// Required fields present, types within range, enumerations from §3.
pub fn validate_structural(event: &FillEvent) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::ok();

    if event.quantity <= 0 {
        outcome.errors.push("quantity must be positive".to_string());
    }
    if event.quantity_filled < 0 {
        outcome.errors.push("quantityFilled must be non-negative".to_string());
    }
    if event.quantity_filled > event.quantity {
        outcome.errors.push("quantityFilled exceeds quantity".to_string());
    }
    if !(event.average_price > 0.0 && event.average_price <= 10_000.0) {
        outcome.errors.push("averagePrice must be in (0, 10000]".to_string());
    }
    if event.sent_timestamp < event.received_timestamp {
        outcome.errors.push("sentTimestamp precedes receivedTimestamp".to_string());
    }
    if event.last_filled_timestamp < event.sent_timestamp {
        outcome.errors.push("lastFilledTimestamp precedes sentTimestamp".to_string());
    }

    if !is_uppercase_alpha(&event.destination, 2, 4) {
        outcome.warnings.push(format!("destination '{}' is not 2-4 uppercase letters", event.destination));
    }
    if !is_uppercase_alpha(&event.ticker, 1, 5) {
        outcome.warnings.push(format!("ticker '{}' is not 1-5 uppercase letters", event.ticker));
    }
    if event.security_id.trim().is_empty() {
        outcome.warnings.push("securityId is empty".to_string());
    }

    if let Some(number_of_fills) = event.number_of_fills {
        if number_of_fills == 0 && event.quantity_filled > 0 {
            // Spec §9 open question: the source treats this as a warning, not an error.
            outcome.warnings.push("numberOfFills is 0 but quantityFilled > 0".to_string());
        }
    }

    outcome.valid = outcome.errors.is_empty();
    outcome
}

/// `quantityFilled ≤ quantity`; status/quantity consistency; timestamp monotonicity already
/// covered structurally. This layer checks consistency against the event's own declared state.
pub fn validate_business(event: &FillEvent) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::ok();

    match event.execution_status {
        ExecutionStatus::Full if event.quantity_filled != event.quantity => {
            outcome.errors.push("status FULL requires quantityFilled == quantity".to_string());
        }
        ExecutionStatus::Part if event.quantity_filled >= event.quantity => {
            outcome.warnings.push("status PART with quantityFilled == quantity".to_string());
        }
        _ => {}
    }

    outcome.valid = outcome.errors.is_empty();
    outcome
}

/// Business-validate the event against the fetched Execution Record: matching ids, trade
/// types, destinations, security ids; a decreasing `quantityFilled` is permitted but should be
/// logged by the caller as a correction rather than rejected (spec §4.9 step 4).
pub fn validate_against_execution_record(event: &FillEvent, record: &ExecutionRecord) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::ok();

    if event.execution_service_id != record.id {
        outcome.errors.push("executionServiceId does not match fetched record id".to_string());
    }
    if event.trade_type != record.trade_type {
        outcome.errors.push("tradeType does not match fetched record".to_string());
    }
    if event.destination != record.destination {
        outcome.errors.push("destination does not match fetched record".to_string());
    }
    if event.security_id != record.security_id {
        outcome.errors.push("securityId does not match fetched record".to_string());
    }
    if event.quantity_filled > record.quantity {
        outcome.errors.push("quantityFilled exceeds fetched record quantity".to_string());
    }
    if event.average_price <= 0.0 {
        outcome.errors.push("averagePrice must be positive".to_string());
    }

    outcome.valid = outcome.errors.is_empty();
    outcome
}

/// Runs both structural and business layers and merges the results, as the Validator
/// component presents a single combined outcome upstream.
pub fn validate(event: &FillEvent) -> ValidationOutcome {
    validate_structural(event).merge(validate_business(event))
}
