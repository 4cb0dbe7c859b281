//! Persisted record definitions
//!
//! Records are plain data. Timestamps are always UTC and durations are
//! stored as fractional seconds so rows stay serializable as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alarm::ShutupWindow;
use crate::message::Priority;
use crate::monitor::ProbeOutcome;

/// Latest known status of one probed service instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatusRow {
    pub binary: String,
    pub hostname: String,
    pub state: ProbeOutcome,

    /// Wall-clock duration of the last health check, in seconds
    pub response_time: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// How many probe results were recorded for this instance
    pub updates: u64,
}

/// One completed outage: the instance was not OK from `start_at` to `end_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHistoryRow {
    pub binary: String,
    pub hostname: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,

    /// Outage length in seconds
    pub duration: f64,
}

/// One occurrence of a reported exception, before aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionReport {
    /// Fingerprint the occurrences are aggregated by
    pub uuid: String,
    pub exc_class: String,
    pub exc_value: String,
    pub file_path: String,
    pub func_name: String,
    pub lineno: i64,
    pub binary: String,
    pub hostname: String,
    pub payload: Value,
    pub seen_at: DateTime<Utc>,
}

/// Aggregated exception, keyed by fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub uuid: String,
    pub exc_class: String,
    pub exc_value: String,
    pub file_path: String,
    pub func_name: String,
    pub lineno: i64,
    pub binary: String,
    pub hostname: String,

    /// Number of reports aggregated into this record
    pub count: u64,

    /// An operator is already working on it
    pub on_process: bool,

    /// Operator-defined suppression window
    pub shutup: Option<ShutupWindow>,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,

    /// Payload of the latest report
    pub last_payload: Value,
}

/// Any bus notification, as stored by the event store handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    /// Source service the message was routed for
    pub service: String,
    pub event_type: String,
    pub message_id: Option<String>,
    pub request_id: Option<String>,
    pub tenant_id: Option<String>,
    pub object_id: Option<String>,
    pub priority: Priority,
    pub binary: String,
    pub hostname: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub raw: Value,
}
