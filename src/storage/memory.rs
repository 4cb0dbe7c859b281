//! In-memory storage backend (no persistence)
//!
//! Used by default and in tests. Events are kept in a ring buffer, every
//! other record type in maps keyed the way the engine looks them up.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited event capacity**: oldest events are evicted first

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::StorageBackend;
use super::error::{StorageError, StorageResult};
use super::schema::{
    EventRow, ExceptionRecord, ExceptionReport, ServiceHistoryRow, ServiceStatusRow,
};
use crate::alarm::ShutupWindow;
use crate::monitor::ProbeOutcome;

/// Maximum events to keep in memory
const MAX_EVENTS: usize = 10_000;

type ServiceKey = (String, String);

#[derive(Default)]
struct Tables {
    status: HashMap<ServiceKey, ServiceStatusRow>,
    history: Vec<ServiceHistoryRow>,
    exceptions: HashMap<String, ExceptionRecord>,
    events: VecDeque<EventRow>,
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(binary: &str, hostname: &str) -> ServiceKey {
    (binary.to_string(), hostname.to_string())
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn upsert_service_status(
        &self,
        binary: &str,
        hostname: &str,
        state: ProbeOutcome,
        response_time: Duration,
        at: DateTime<Utc>,
    ) -> StorageResult<ServiceStatusRow> {
        let mut tables = self.tables.write().await;

        let row = tables
            .status
            .entry(key(binary, hostname))
            .and_modify(|row| {
                row.state = state;
                row.response_time = response_time.as_secs_f64();
                row.updated_at = at;
                row.updates += 1;
            })
            .or_insert_with(|| ServiceStatusRow {
                binary: binary.to_string(),
                hostname: hostname.to_string(),
                state,
                response_time: response_time.as_secs_f64(),
                created_at: at,
                updated_at: at,
                updates: 1,
            });

        Ok(row.clone())
    }

    async fn get_service_status(
        &self,
        binary: &str,
        hostname: &str,
    ) -> StorageResult<Option<ServiceStatusRow>> {
        let tables = self.tables.read().await;
        Ok(tables.status.get(&key(binary, hostname)).cloned())
    }

    async fn list_service_status(&self) -> StorageResult<Vec<ServiceStatusRow>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<_> = tables.status.values().cloned().collect();
        rows.sort_by(|a, b| (&a.binary, &a.hostname).cmp(&(&b.binary, &b.hostname)));
        Ok(rows)
    }

    async fn cleanup_stale_status(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut tables = self.tables.write().await;
        let count = tables.status.len();
        tables.status.retain(|_, row| row.updated_at >= before);
        let removed = count - tables.status.len();
        debug!("removed {removed} stale service status rows");
        Ok(removed)
    }

    async fn insert_service_history(&self, row: ServiceHistoryRow) -> StorageResult<()> {
        self.tables.write().await.history.push(row);
        Ok(())
    }

    async fn list_service_history(
        &self,
        binary: &str,
        hostname: &str,
    ) -> StorageResult<Vec<ServiceHistoryRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .history
            .iter()
            .filter(|row| row.binary == binary && row.hostname == hostname)
            .cloned()
            .collect())
    }

    async fn cleanup_stale_history(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut tables = self.tables.write().await;
        let count = tables.history.len();
        tables.history.retain(|row| row.end_at >= before);
        let removed = count - tables.history.len();
        debug!("removed {removed} stale service history rows");
        Ok(removed)
    }

    async fn upsert_exception(&self, report: ExceptionReport) -> StorageResult<ExceptionRecord> {
        let mut tables = self.tables.write().await;

        let record = tables
            .exceptions
            .entry(report.uuid.clone())
            .and_modify(|record| {
                record.count += 1;
                record.exc_value = report.exc_value.clone();
                record.hostname = report.hostname.clone();
                record.last_seen = report.seen_at;
                record.last_payload = report.payload.clone();
            })
            .or_insert_with(|| ExceptionRecord {
                uuid: report.uuid.clone(),
                exc_class: report.exc_class.clone(),
                exc_value: report.exc_value.clone(),
                file_path: report.file_path.clone(),
                func_name: report.func_name.clone(),
                lineno: report.lineno,
                binary: report.binary.clone(),
                hostname: report.hostname.clone(),
                count: 1,
                on_process: false,
                shutup: None,
                first_seen: report.seen_at,
                last_seen: report.seen_at,
                last_payload: report.payload.clone(),
            });

        Ok(record.clone())
    }

    async fn get_exception(&self, uuid: &str) -> StorageResult<Option<ExceptionRecord>> {
        Ok(self.tables.read().await.exceptions.get(uuid).cloned())
    }

    async fn update_exception_flags(
        &self,
        uuid: &str,
        on_process: bool,
        shutup: Option<ShutupWindow>,
    ) -> StorageResult<ExceptionRecord> {
        let mut tables = self.tables.write().await;
        let record = tables
            .exceptions
            .get_mut(uuid)
            .ok_or_else(|| StorageError::NotFound(format!("exception {uuid}")))?;

        record.on_process = on_process;
        record.shutup = shutup;
        Ok(record.clone())
    }

    async fn insert_event(&self, event: EventRow) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if tables.events.len() >= MAX_EVENTS {
            tables.events.pop_front();
        }
        tables.events.push_back(event);
        Ok(())
    }

    async fn list_events(&self, limit: usize) -> StorageResult<Vec<EventRow>> {
        let tables = self.tables.read().await;
        Ok(tables.events.iter().rev().take(limit).cloned().collect())
    }
}
