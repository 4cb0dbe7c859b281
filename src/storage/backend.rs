//! Storage backend trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{
    EventRow, ExceptionRecord, ExceptionReport, ServiceHistoryRow, ServiceStatusRow,
};
use crate::alarm::ShutupWindow;
use crate::monitor::ProbeOutcome;

/// Persistence capability the engine writes through
///
/// Implementations must be `Send + Sync` as they are shared by the pipeline
/// workers, every prober and the discovery loop.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create or update the status row of `(binary, hostname)`
    async fn upsert_service_status(
        &self,
        binary: &str,
        hostname: &str,
        state: ProbeOutcome,
        response_time: Duration,
        at: DateTime<Utc>,
    ) -> StorageResult<ServiceStatusRow>;

    async fn get_service_status(
        &self,
        binary: &str,
        hostname: &str,
    ) -> StorageResult<Option<ServiceStatusRow>>;

    async fn list_service_status(&self) -> StorageResult<Vec<ServiceStatusRow>>;

    /// Remove status rows not updated since `before`
    ///
    /// Returns the number of rows removed.
    async fn cleanup_stale_status(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Append a completed outage
    async fn insert_service_history(&self, row: ServiceHistoryRow) -> StorageResult<()>;

    async fn list_service_history(
        &self,
        binary: &str,
        hostname: &str,
    ) -> StorageResult<Vec<ServiceHistoryRow>>;

    /// Remove history rows whose outage ended before `before`
    async fn cleanup_stale_history(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Aggregate one exception report into its record
    async fn upsert_exception(&self, report: ExceptionReport) -> StorageResult<ExceptionRecord>;

    async fn get_exception(&self, uuid: &str) -> StorageResult<Option<ExceptionRecord>>;

    /// Set the operator flags of an existing exception record
    async fn update_exception_flags(
        &self,
        uuid: &str,
        on_process: bool,
        shutup: Option<ShutupWindow>,
    ) -> StorageResult<ExceptionRecord>;

    async fn insert_event(&self, event: EventRow) -> StorageResult<()>;

    /// Most recent events first
    async fn list_events(&self, limit: usize) -> StorageResult<Vec<EventRow>>;
}
