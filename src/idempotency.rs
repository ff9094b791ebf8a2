//! Idempotency Index: fingerprint `(fillId, executionServiceId)` → last processing outcome,
//! spec §4.7. Guards against re-processing an exact duplicate delivery while still allowing
//! retries-after-failure and corrections through.

use crate::domain::{FillEvent, IdempotencyRecord};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

pub type IdempotencyKey = (i64, i64);

fn key_for(event: &FillEvent) -> IdempotencyKey {
    (event.id, event.execution_service_id)
}

/// Why a candidate event should or should not be (re)processed, per spec §4.7's dedup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    ProcessNew,
    ProcessRetryAfterFailure,
    ProcessCorrection,
    Skip,
}

impl DedupDecision {
    pub fn should_process(self) -> bool {
        !matches!(self, DedupDecision::Skip)
    }
}

const SIGNIFICANT_AVERAGE_PRICE_DELTA_FRACTION: f64 = 0.001;

/// Pure decision function: §4.7 steps 1-4, independent of any lock.
pub fn dedup_decision(previous: Option<&IdempotencyRecord>, event: &FillEvent) -> DedupDecision {
    let Some(previous) = previous else {
        return DedupDecision::ProcessNew;
    };
    if !previous.success {
        return DedupDecision::ProcessRetryAfterFailure;
    }
    if is_significant_change(previous, event) {
        return DedupDecision::ProcessCorrection;
    }
    DedupDecision::Skip
}

/// `quantityFilled` differs, OR `|Δ averagePrice| / P.averagePrice > 0.001`, OR `version`
/// differs.
pub fn is_significant_change(previous: &IdempotencyRecord, event: &FillEvent) -> bool {
    if previous.quantity_filled != event.quantity_filled {
        return true;
    }
    if previous.version != event.version {
        return true;
    }
    if previous.average_price != 0.0 {
        let relative_delta = (event.average_price - previous.average_price).abs() / previous.average_price;
        if relative_delta > SIGNIFICANT_AVERAGE_PRICE_DELTA_FRACTION {
            return true;
        }
    }
    false
}

struct Entry {
    record: IdempotencyRecord,
}

/// Process-wide, reader/writer-locked idempotency index (spec §3 ownership note).
pub struct IdempotencyIndex {
    entries: RwLock<HashMap<IdempotencyKey, Entry>>,
    max_entries: usize,
    retention_period: chrono::Duration,
}

impl IdempotencyIndex {
    pub fn new(max_entries: usize, retention_period: std::time::Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
            retention_period: chrono::Duration::from_std(retention_period)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    pub fn lookup(&self, event: &FillEvent) -> Option<IdempotencyRecord> {
        let entries = self.entries.read().expect("IdempotencyIndex poisoned");
        entries.get(&key_for(event)).map(|e| e.record.clone())
    }

    pub fn decide(&self, event: &FillEvent) -> DedupDecision {
        let previous = self.lookup(event);
        dedup_decision(previous.as_ref(), event)
    }

    /// Record the outcome of processing `event`, regardless of success (spec §4.7: "the key
    /// and timestamp are always updated"). Evicts ~10% of the oldest-by-`processedAt` entries
    /// when at capacity, to avoid repeated single-entry eviction thrashing.
    pub fn record_outcome(
        &self,
        event: &FillEvent,
        correlation_id: String,
        success: bool,
        last_error: Option<String>,
    ) {
        let record = IdempotencyRecord {
            fill_id: event.id,
            execution_service_id: event.execution_service_id,
            processed_at: Utc::now(),
            correlation_id,
            success,
            last_error,
            version: event.version,
            quantity_filled: event.quantity_filled,
            average_price: event.average_price,
        };

        let mut entries = self.entries.write().expect("IdempotencyIndex poisoned");
        let key = key_for(event);
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            Self::evict_oldest_fraction(&mut entries, 0.1);
        }
        entries.insert(key, Entry { record });
    }

    fn evict_oldest_fraction(entries: &mut HashMap<IdempotencyKey, Entry>, fraction: f64) {
        let evict_count = ((entries.len() as f64) * fraction).ceil() as usize;
        if evict_count == 0 {
            return;
        }
        let mut keys: Vec<IdempotencyKey> = entries.keys().copied().collect();
        keys.sort_by_key(|k| entries[k].record.processed_at);
        for key in keys.into_iter().take(evict_count) {
            entries.remove(&key);
        }
    }

    /// Prune entries older than `retentionPeriod`. Intended to run on a periodic sweeper
    /// (default hourly per spec §4.7).
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let retention = self.retention_period;
        let mut entries = self.entries.write().expect("IdempotencyIndex poisoned");
        let before = entries.len();
        entries.retain(|_, e| now.signed_duration_since(e.record.processed_at) < retention);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("IdempotencyIndex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with(id: i64, execution_service_id: i64, quantity_filled: i64, version: i64, average_price: f64) -> FillEvent {
        serde_json::from_str(&format!(
            r#"{{
                "id": {id}, "executionServiceId": {execution_service_id}, "isOpen": false,
                "executionStatus": "FULL", "tradeType": "BUY", "destination": "ML",
                "securityId": "SEC1", "ticker": "IBM", "quantity": 1000,
                "quantityFilled": {quantity_filled}, "averagePrice": {average_price},
                "receivedTimestamp": 1748354367.5, "sentTimestamp": 1748354367.6,
                "lastFilledTimestamp": 1748354504.1, "version": {version}
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn no_previous_record_means_process_new() {
        let index = IdempotencyIndex::new(10_000, std::time::Duration::from_secs(86400));
        let event = event_with(1, 2, 1000, 1, 100.0);
        assert_eq!(index.decide(&event), DedupDecision::ProcessNew);
    }

    #[test]
    fn exact_duplicate_is_skipped() {
        let index = IdempotencyIndex::new(10_000, std::time::Duration::from_secs(86400));
        let event = event_with(1, 2, 1000, 1, 100.0);
        index.record_outcome(&event, "corr-1".to_string(), true, None);
        assert_eq!(index.decide(&event), DedupDecision::Skip);
    }

    #[test]
    fn failed_previous_record_allows_retry() {
        let index = IdempotencyIndex::new(10_000, std::time::Duration::from_secs(86400));
        let event = event_with(1, 2, 1000, 1, 100.0);
        index.record_outcome(&event, "corr-1".to_string(), false, Some("boom".to_string()));
        assert_eq!(index.decide(&event), DedupDecision::ProcessRetryAfterFailure);
    }

    #[test]
    fn quantity_filled_change_is_a_correction() {
        let index = IdempotencyIndex::new(10_000, std::time::Duration::from_secs(86400));
        let first = event_with(1, 2, 900, 1, 100.0);
        index.record_outcome(&first, "corr-1".to_string(), true, None);
        let corrected = event_with(1, 2, 950, 1, 100.0);
        assert_eq!(index.decide(&corrected), DedupDecision::ProcessCorrection);
    }

    #[test]
    fn small_average_price_drift_is_not_significant() {
        let index = IdempotencyIndex::new(10_000, std::time::Duration::from_secs(86400));
        let first = event_with(1, 2, 1000, 1, 100.0);
        index.record_outcome(&first, "corr-1".to_string(), true, None);
        let nudged = event_with(1, 2, 1000, 1, 100.0005);
        assert_eq!(index.decide(&nudged), DedupDecision::Skip);
    }

    #[test]
    fn average_price_drift_beyond_threshold_is_a_correction() {
        let index = IdempotencyIndex::new(10_000, std::time::Duration::from_secs(86400));
        let first = event_with(1, 2, 1000, 1, 100.0);
        index.record_outcome(&first, "corr-1".to_string(), true, None);
        let drifted = event_with(1, 2, 1000, 1, 100.2);
        assert_eq!(index.decide(&drifted), DedupDecision::ProcessCorrection);
    }

    #[test]
    fn eviction_caps_size_near_capacity() {
        let index = IdempotencyIndex::new(10, std::time::Duration::from_secs(86400));
        for i in 0..20 {
            let event = event_with(i, i, 1000, 1, 100.0);
            index.record_outcome(&event, format!("corr-{i}"), true, None);
        }
        assert!(index.len() <= 10);
    }

    #[test]
    fn sweep_prunes_entries_older_than_retention() {
        let index = IdempotencyIndex::new(10_000, std::time::Duration::from_millis(0));
        let event = event_with(1, 2, 1000, 1, 100.0);
        index.record_outcome(&event, "corr-1".to_string(), true, None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let evicted = index.sweep();
        assert_eq!(evicted, 1);
        assert!(index.is_empty());
    }
}
