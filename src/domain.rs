//! Wire and domain types: the Fill Event consumed from the bus, the Execution Record returned
//! by the Execution Service, the Allocation DTO posted for closed trades, and the Idempotency
//! Record persisted per `(fillId, executionServiceId)` — spec §3.
//!
//! Numeric fields on the bus tolerate scientific-notation strings and null-as-zero decodings,
//! so most fields use a lenient deserializer rather than the serde default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    New,
    Sent,
    Work,
    Part,
    Full,
    Hold,
    Cncl,
    Cncld,
    Cpart,
    Del,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeType {
    Buy,
    Sell,
}

/// Accepts an integer, a stringified integer/scientific-notation float, or null (as zero).
/// Grounded in spec §3's numeric-decoding tolerance and §6's bus payload decoder.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_i64(deserializer)?.unwrap_or(0))
}

fn lenient_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Numeric {
        Int(i64),
        Float(f64),
        Str(String),
        Null,
    }

    match Numeric::deserialize(deserializer)? {
        Numeric::Int(i) => Ok(Some(i)),
        Numeric::Float(f) => Ok(Some(f.round() as i64)),
        Numeric::Str(s) => {
            if s.is_empty() {
                return Ok(Some(0));
            }
            s.parse::<f64>()
                .map(|f| Some(f.round() as i64))
                .map_err(serde::de::Error::custom)
        }
        Numeric::Null => Ok(None),
    }
}

/// Accepts an integer, float, stringified float (including scientific notation), or null.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Numeric {
        Float(f64),
        Str(String),
        Null,
    }

    match Numeric::deserialize(deserializer)? {
        Numeric::Float(f) => Ok(f),
        Numeric::Str(s) if s.is_empty() => Ok(0.0),
        Numeric::Str(s) => s.parse::<f64>().map_err(serde::de::Error::custom),
        Numeric::Null => Ok(0.0),
    }
}

fn lenient_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Numeric {
        Float(f64),
        Str(String),
        Null,
    }

    match Numeric::deserialize(deserializer)? {
        Numeric::Float(f) => Ok(Some(f)),
        Numeric::Str(s) if s.is_empty() => Ok(Some(0.0)),
        Numeric::Str(s) => s.parse::<f64>().map(Some).map_err(serde::de::Error::custom),
        Numeric::Null => Ok(None),
    }
}

/// An immutable trade-fill event consumed from the bus. Seconds-since-epoch timestamps keep
/// sub-second precision as `f64`, matching the literal scenario payloads in spec §8
/// (e.g. `receivedTimestamp:1748354367.509362`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: i64,
    #[serde(rename = "executionServiceId", deserialize_with = "lenient_i64")]
    pub execution_service_id: i64,
    #[serde(rename = "isOpen")]
    pub is_open: bool,
    #[serde(rename = "executionStatus")]
    pub execution_status: ExecutionStatus,
    #[serde(rename = "tradeType")]
    pub trade_type: TradeType,
    pub destination: String,
    #[serde(rename = "securityId")]
    pub security_id: String,
    pub ticker: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub quantity: i64,
    #[serde(rename = "quantityFilled", deserialize_with = "lenient_i64")]
    pub quantity_filled: i64,
    #[serde(rename = "averagePrice", deserialize_with = "lenient_f64")]
    pub average_price: f64,
    #[serde(rename = "receivedTimestamp", deserialize_with = "lenient_f64")]
    pub received_timestamp: f64,
    #[serde(rename = "sentTimestamp", deserialize_with = "lenient_f64")]
    pub sent_timestamp: f64,
    #[serde(rename = "lastFilledTimestamp", deserialize_with = "lenient_f64")]
    pub last_filled_timestamp: f64,
    #[serde(rename = "numberOfFills", default, deserialize_with = "lenient_opt_i64")]
    pub number_of_fills: Option<i64>,
    #[serde(rename = "totalAmount", default, deserialize_with = "lenient_opt_f64")]
    pub total_amount: Option<f64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub version: i64,
}

impl FillEvent {
    /// Structural invariants from spec §3, independent of any fetched Execution Record.
    pub fn check_structural_invariants(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.quantity_filled > self.quantity {
            errors.push("quantityFilled exceeds quantity".to_string());
        }
        if self.execution_status == ExecutionStatus::Full && self.quantity_filled != self.quantity {
            errors.push("status FULL requires quantityFilled == quantity".to_string());
        }
        if self.sent_timestamp < self.received_timestamp {
            errors.push("sentTimestamp precedes receivedTimestamp".to_string());
        }
        if self.last_filled_timestamp < self.sent_timestamp {
            errors.push("lastFilledTimestamp precedes sentTimestamp".to_string());
        }
        errors
    }

    /// Seconds-since-epoch RFC-3339 conversion with nanosecond precision, used when
    /// synthesising the Allocation body (spec §4.9 step 6).
    pub fn last_filled_timestamp_rfc3339(&self) -> String {
        seconds_to_rfc3339(self.last_filled_timestamp)
    }

    pub fn received_timestamp_rfc3339(&self) -> String {
        seconds_to_rfc3339(self.received_timestamp)
    }

    pub fn sent_timestamp_rfc3339(&self) -> String {
        seconds_to_rfc3339(self.sent_timestamp)
    }
}

fn seconds_to_rfc3339(seconds: f64) -> String {
    let secs = seconds.trunc() as i64;
    let nanos = ((seconds.fract()) * 1_000_000_000.0).round() as u32;
    DateTime::from_timestamp(secs, nanos)
        .unwrap_or_else(|| DateTime::from_timestamp(0, 0).expect("epoch is valid"))
        .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

/// Downstream view returned by the Execution Service on read; carries the `version` used for
/// optimistic concurrency on update (spec §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: i64,
    #[serde(rename = "quantityFilled", deserialize_with = "lenient_i64")]
    pub quantity_filled: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub quantity: i64,
    #[serde(rename = "averagePrice", deserialize_with = "lenient_f64")]
    pub average_price: f64,
    #[serde(deserialize_with = "lenient_i64")]
    pub version: i64,
    #[serde(rename = "tradeType")]
    pub trade_type: TradeType,
    pub destination: String,
    #[serde(rename = "securityId")]
    pub security_id: String,
}

/// Body sent on `PUT /api/v1/execution/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionUpdateRequest {
    #[serde(rename = "quantityFilled")]
    pub quantity_filled: i64,
    #[serde(rename = "averagePrice")]
    pub average_price: f64,
    pub version: i64,
}

/// Completed-trade DTO posted to the Allocation Service (spec §4.9 step 6): timestamps are
/// serialised as RFC-3339 with nanosecond precision, `is_open` is always `false`, `limit_price`
/// is always `null` for this path.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationRequest {
    pub id: i64,
    #[serde(rename = "executionServiceId")]
    pub execution_service_id: i64,
    #[serde(rename = "isOpen")]
    pub is_open: bool,
    #[serde(rename = "executionStatus")]
    pub execution_status: ExecutionStatus,
    #[serde(rename = "tradeType")]
    pub trade_type: TradeType,
    pub destination: String,
    #[serde(rename = "securityId")]
    pub security_id: String,
    pub ticker: String,
    pub quantity: i64,
    #[serde(rename = "quantityFilled")]
    pub quantity_filled: i64,
    #[serde(rename = "averagePrice")]
    pub average_price: f64,
    #[serde(rename = "receivedTimestamp")]
    pub received_timestamp: String,
    #[serde(rename = "sentTimestamp")]
    pub sent_timestamp: String,
    #[serde(rename = "lastFilledTimestamp")]
    pub last_filled_timestamp: String,
    #[serde(rename = "limitPrice")]
    pub limit_price: Option<f64>,
}

impl AllocationRequest {
    pub fn from_fill_event(event: &FillEvent) -> Self {
        Self {
            id: event.id,
            execution_service_id: event.execution_service_id,
            is_open: false,
            execution_status: event.execution_status,
            trade_type: event.trade_type,
            destination: event.destination.clone(),
            security_id: event.security_id.clone(),
            ticker: event.ticker.clone(),
            quantity: event.quantity,
            quantity_filled: event.quantity_filled,
            average_price: event.average_price,
            received_timestamp: event.received_timestamp_rfc3339(),
            sent_timestamp: event.sent_timestamp_rfc3339(),
            last_filled_timestamp: event.last_filled_timestamp_rfc3339(),
            limit_price: None,
        }
    }
}

/// Fingerprint `(fillId, executionServiceId)` → processing outcome, spec §3/§4.7.
#[derive(Debug, Clone, Serialize)]
pub struct IdempotencyRecord {
    pub fill_id: i64,
    pub execution_service_id: i64,
    pub processed_at: DateTime<Utc>,
    pub correlation_id: String,
    pub success: bool,
    pub last_error: Option<String>,
    pub version: i64,
    pub quantity_filled: i64,
    pub average_price: f64,
}
