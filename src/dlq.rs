//! In-memory dead-letter store for fills that exhausted retries or otherwise could not be
//! reconciled, grounded in the retry-queue record shape from
//! `other_examples/.../retry_queue.rs` but kept purely in-memory per spec §4.4 — the
//! upstream broker's own retention is the authoritative recovery mechanism, not this store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use uuid::Uuid;

/// Bound on the number of error messages retained per record.
const MAX_ERROR_HISTORY: usize = 10;

/// Where the original message came from, so an operator can correlate a DLQ entry back to
/// the broker offset it was read from.
#[derive(Debug, Clone, Serialize)]
pub struct SourceMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DlqRecord {
    pub id: Uuid,
    /// Serialised original payload, kept opaque so the store doesn't need to understand it.
    pub payload: String,
    pub failure_reason: String,
    pub error_history: Vec<String>,
    pub attempts: u32,
    pub first_failure: DateTime<Utc>,
    pub last_failure: DateTime<Utc>,
    pub source: SourceMetadata,
}

impl DlqRecord {
    fn push_error(&mut self, error: String, now: DateTime<Utc>) {
        self.error_history.push(error);
        if self.error_history.len() > MAX_ERROR_HISTORY {
            let excess = self.error_history.len() - MAX_ERROR_HISTORY;
            self.error_history.drain(0..excess);
        }
        self.attempts += 1;
        self.last_failure = now;
    }
}

/// Aggregate counters for the `/stats` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DlqStats {
    pub total_ever_inserted: u64,
    pub current_size: usize,
    pub evicted_for_capacity: u64,
    pub evicted_for_retention: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub last_sweep_at: Option<DateTime<Utc>>,
}

struct Inner {
    records: VecDeque<DlqRecord>,
    max_size: usize,
    retention_period: chrono::Duration,
    total_ever_inserted: u64,
    evicted_for_capacity: u64,
    evicted_for_retention: u64,
    last_sweep_at: Option<DateTime<Utc>>,
}

/// Bounded FIFO dead-letter store, spec §4.4: `maxSize` default 1000, `retentionPeriod`
/// default 24h, insertion-at-capacity evicts the oldest record.
pub struct DeadLetterStore {
    inner: RwLock<Inner>,
    shutdown: Arc<Notify>,
}

impl DeadLetterStore {
    pub fn new(max_size: usize, retention_period: std::time::Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: VecDeque::with_capacity(max_size.min(4096)),
                max_size,
                retention_period: chrono::Duration::from_std(retention_period)
                    .unwrap_or_else(|_| chrono::Duration::hours(24)),
                total_ever_inserted: 0,
                evicted_for_capacity: 0,
                evicted_for_retention: 0,
                last_sweep_at: None,
            }),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Insert a new failure. If the record is already at `max_size`, the oldest is evicted.
    pub fn insert(
        &self,
        payload: String,
        failure_reason: String,
        source: SourceMetadata,
    ) -> Uuid {
        let now = Utc::now();
        let record = DlqRecord {
            id: Uuid::new_v4(),
            payload,
            failure_reason: failure_reason.clone(),
            error_history: vec![failure_reason],
            attempts: 1,
            first_failure: now,
            last_failure: now,
            source,
        };
        let id = record.id;

        let mut inner = self.inner.write().expect("DeadLetterStore poisoned");
        if inner.records.len() >= inner.max_size {
            inner.records.pop_front();
            inner.evicted_for_capacity += 1;
        }
        inner.total_ever_inserted += 1;
        inner.records.push_back(record);
        tracing::warn!(dlq_id = %id, "fill routed to dead-letter store");
        id
    }

    /// Append another failure onto an existing record rather than creating a duplicate.
    pub fn record_additional_failure(&self, id: Uuid, error: String) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.write().expect("DeadLetterStore poisoned");
        if let Some(record) = inner.records.iter_mut().find(|r| r.id == id) {
            record.push_error(error, now);
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: Uuid) -> Option<DlqRecord> {
        self.inner.read().expect("DeadLetterStore poisoned").records.iter().find(|r| r.id == id).cloned()
    }

    pub fn list(&self, limit: usize) -> Vec<DlqRecord> {
        self.inner.read().expect("DeadLetterStore poisoned").records.iter().rev().take(limit).cloned().collect()
    }

    pub fn remove(&self, id: Uuid) -> bool {
        let mut inner = self.inner.write().expect("DeadLetterStore poisoned");
        let before = inner.records.len();
        inner.records.retain(|r| r.id != id);
        inner.records.len() != before
    }

    pub fn clear(&self) {
        self.inner.write().expect("DeadLetterStore poisoned").records.clear();
    }

    pub fn stats(&self) -> DlqStats {
        let inner = self.inner.read().expect("DeadLetterStore poisoned");
        DlqStats {
            total_ever_inserted: inner.total_ever_inserted,
            current_size: inner.records.len(),
            evicted_for_capacity: inner.evicted_for_capacity,
            evicted_for_retention: inner.evicted_for_retention,
            oldest: inner.records.front().map(|r| r.first_failure),
            newest: inner.records.back().map(|r| r.first_failure),
            last_sweep_at: inner.last_sweep_at,
        }
    }

    /// Discard records whose `first_failure` is older than `retention_period`. Runs on a
    /// caller-provided interval, per spec §4.4's `flushInterval`-driven sweep.
    pub fn sweep(&self) {
        let now = Utc::now();
        let mut inner = self.inner.write().expect("DeadLetterStore poisoned");
        let retention = inner.retention_period;
        let before = inner.records.len();
        inner.records.retain(|r| now.signed_duration_since(r.first_failure) < retention);
        let evicted = before - inner.records.len();
        inner.evicted_for_retention += evicted as u64;
        inner.last_sweep_at = Some(now);
        if evicted > 0 {
            tracing::info!(evicted, "dead-letter sweep evicted expired records");
        }
    }

    /// Spawn a background sweeper task on `period`, stopping when `shutdown` is requested via
    /// [`DeadLetterStore::request_shutdown`]. Mirrors the teacher's background-timer idiom
    /// used for breaker recovery timing.
    pub fn spawn_sweeper(self: &Arc<Self>, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => store.sweep(),
                    _ = shutdown.notified() => break,
                }
            }
        })
    }

    pub fn request_shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}
