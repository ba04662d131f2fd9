//! `ProcessStore` trait: single async interface over the three collections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::process::{Process, ProcessFilter, ProcessKind, ProcessResult, ProcessStatus};

/// Backend-agnostic persistent store for processes, results and settings.
#[async_trait]
pub trait ProcessStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), StoreError>;

    // ── Processes ───────────────────────────────────────────────────

    /// Insert or replace a process. Always stamps `last_updated_at` with the
    /// current time and writes the given status verbatim, so an update does
    /// not preserve a previously stored status.
    async fn save_process(&self, process: &Process) -> Result<(), StoreError>;

    /// Get a process by ID.
    async fn get_process(&self, id: &str) -> Result<Option<Process>, StoreError>;

    /// List processes matching the filter, oldest first.
    async fn list_processes(&self, filter: ProcessFilter) -> Result<Vec<Process>, StoreError>;

    /// Update status (and error message) only. Returns `false` if the id is unknown.
    ///
    /// The error message is cleared unless `status` is `Error`.
    async fn update_status(
        &self,
        id: &str,
        status: ProcessStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Delete a process and all of its results in one transaction.
    /// Returns `false` if the process did not exist.
    async fn delete_process(&self, id: &str) -> Result<bool, StoreError>;

    // ── Results ─────────────────────────────────────────────────────

    /// Append a tick result. Returns the store-assigned id.
    async fn append_result(
        &self,
        process_id: &str,
        kind: ProcessKind,
        data: &serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Results for a process, newest first, optionally bounded.
    async fn list_results(
        &self,
        process_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ProcessResult>, StoreError>;

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Last write wins.
    async fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError>;

    async fn delete_setting(&self, key: &str) -> Result<bool, StoreError>;

    // ── Maintenance ─────────────────────────────────────────────────

    /// Wipe processes, results and settings in one transaction.
    async fn clear_all(&self) -> Result<(), StoreError>;
}
