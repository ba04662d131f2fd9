//! libSQL backend: async `ProcessStore` implementation.
//!
//! Supports local file and in-memory databases. Multi-statement writes run in
//! a libsql transaction. Every statement on the shared connection, reads
//! included, is serialized behind `conn_lock`, so no other task can run inside
//! an open transaction or observe its uncommitted state.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::StoreError;
use crate::process::{Process, ProcessFilter, ProcessKind, ProcessResult, ProcessStatus};
use crate::store::migrations;
use crate::store::traits::ProcessStore;

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    conn_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Unavailable(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Unavailable(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            conn_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `statements` in one transaction, rolling back on the first failure.
    async fn run_in_transaction(
        &self,
        op: &str,
        statements: &[(&str, Vec<libsql::Value>)],
    ) -> Result<Vec<u64>, StoreError> {
        let _guard = self.conn_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{op}: begin failed: {e}")))?;

        let mut affected = Vec::with_capacity(statements.len());
        for (sql, values) in statements {
            match tx
                .execute(sql, libsql::params::Params::Positional(values.clone()))
                .await
            {
                Ok(n) => affected.push(n),
                Err(e) => {
                    if let Err(rb) = tx.rollback().await {
                        tracing::error!("{op}: rollback failed: {rb}");
                    }
                    return Err(StoreError::Unavailable(format!("{op}: {e}")));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{op}: commit failed: {e}")))?;
        Ok(affected)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_json_text(value: &serde_json::Value) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

const PROCESS_COLUMNS: &str =
    "id, kind, status, payload, error_message, started_at, last_updated_at";

const RESULT_COLUMNS: &str = "id, process_id, kind, data, timestamp";

/// Map a libsql Row (PROCESS_COLUMNS order) to a Process.
fn row_to_process(row: &libsql::Row) -> Result<Process, StoreError> {
    let get_text = |idx: i32| -> Result<String, StoreError> {
        row.get::<String>(idx)
            .map_err(|e| StoreError::Serialization(format!("process column {idx}: {e}")))
    };

    let kind: ProcessKind = get_text(1)?.parse().map_err(StoreError::Serialization)?;
    let status: ProcessStatus = get_text(2)?.parse().map_err(StoreError::Serialization)?;
    let payload: serde_json::Value = serde_json::from_str(&get_text(3)?)
        .map_err(|e| StoreError::Serialization(format!("process payload: {e}")))?;

    Ok(Process {
        id: get_text(0)?,
        kind,
        status,
        payload,
        error_message: row.get::<String>(4).ok(),
        started_at: parse_datetime(&get_text(5)?),
        last_updated_at: parse_datetime(&get_text(6)?),
    })
}

/// Map a libsql Row (RESULT_COLUMNS order) to a ProcessResult.
fn row_to_result(row: &libsql::Row) -> Result<ProcessResult, StoreError> {
    let id: i64 = row
        .get(0)
        .map_err(|e| StoreError::Serialization(format!("result id: {e}")))?;
    let process_id: String = row
        .get(1)
        .map_err(|e| StoreError::Serialization(format!("result process_id: {e}")))?;
    let kind_str: String = row
        .get(2)
        .map_err(|e| StoreError::Serialization(format!("result kind: {e}")))?;
    let data_str: String = row
        .get(3)
        .map_err(|e| StoreError::Serialization(format!("result data: {e}")))?;
    let ts_str: String = row
        .get(4)
        .map_err(|e| StoreError::Serialization(format!("result timestamp: {e}")))?;

    Ok(ProcessResult {
        id,
        process_id,
        kind: kind_str.parse().map_err(StoreError::Serialization)?,
        data: serde_json::from_str(&data_str)
            .map_err(|e| StoreError::Serialization(format!("result data: {e}")))?,
        timestamp: parse_datetime(&ts_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl ProcessStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Processes ───────────────────────────────────────────────────

    async fn save_process(&self, process: &Process) -> Result<(), StoreError> {
        let payload = to_json_text(&process.payload)?;
        let now = format_datetime(Utc::now());
        let error_message = match process.status {
            ProcessStatus::Error => opt_text(process.error_message.as_deref()),
            _ => libsql::Value::Null,
        };

        let _guard = self.conn_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO processes (id, kind, status, payload, error_message, started_at, last_updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (id) DO UPDATE SET
                    kind = excluded.kind,
                    status = excluded.status,
                    payload = excluded.payload,
                    error_message = excluded.error_message,
                    started_at = excluded.started_at,
                    last_updated_at = excluded.last_updated_at",
                params![
                    process.id.clone(),
                    process.kind.as_str(),
                    process.status.as_str(),
                    payload,
                    error_message,
                    format_datetime(process.started_at),
                    now,
                ],
            )
            .await
            .map_err(|e| StoreError::Unavailable(format!("save_process: {e}")))?;

        Ok(())
    }

    async fn get_process(&self, id: &str) -> Result<Option<Process>, StoreError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROCESS_COLUMNS} FROM processes WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| StoreError::Unavailable(format!("get_process: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_process(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Unavailable(format!("get_process: {e}"))),
        }
    }

    async fn list_processes(&self, filter: ProcessFilter) -> Result<Vec<Process>, StoreError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(status) = filter.status {
            values.push(libsql::Value::Text(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(kind) = filter.kind {
            values.push(libsql::Value::Text(kind.as_str().to_string()));
            clauses.push(format!("kind = ?{}", values.len()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PROCESS_COLUMNS} FROM processes{where_sql} ORDER BY started_at, id"
                ),
                libsql::params::Params::Positional(values),
            )
            .await
            .map_err(|e| StoreError::Unavailable(format!("list_processes: {e}")))?;

        let mut processes = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_process(&row) {
                    Ok(p) => processes.push(p),
                    Err(e) => tracing::warn!("Skipping process row: {e}"),
                },
                Ok(None) => break,
                Err(e) => return Err(StoreError::Unavailable(format!("list_processes: {e}"))),
            }
        }
        Ok(processes)
    }

    async fn update_status(
        &self,
        id: &str,
        status: ProcessStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let error_message = match status {
            ProcessStatus::Error => opt_text(error_message),
            _ => libsql::Value::Null,
        };

        let _guard = self.conn_lock.lock().await;
        let count = self
            .conn()
            .execute(
                "UPDATE processes SET status = ?1, error_message = ?2, last_updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), error_message, format_datetime(Utc::now()), id],
            )
            .await
            .map_err(|e| StoreError::Unavailable(format!("update_status: {e}")))?;
        Ok(count > 0)
    }

    async fn delete_process(&self, id: &str) -> Result<bool, StoreError> {
        let key = libsql::Value::Text(id.to_string());
        let affected = self
            .run_in_transaction(
                "delete_process",
                &[
                    ("DELETE FROM results WHERE process_id = ?1", vec![key.clone()]),
                    ("DELETE FROM processes WHERE id = ?1", vec![key]),
                ],
            )
            .await?;
        Ok(affected.get(1).copied().unwrap_or(0) > 0)
    }

    // ── Results ─────────────────────────────────────────────────────

    async fn append_result(
        &self,
        process_id: &str,
        kind: ProcessKind,
        data: &serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let data = to_json_text(data)?;

        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO results (process_id, kind, data, timestamp) VALUES (?1, ?2, ?3, ?4) RETURNING id",
                params![process_id, kind.as_str(), data, format_datetime(timestamp)],
            )
            .await
            .map_err(|e| StoreError::Unavailable(format!("append_result: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| StoreError::Serialization(format!("append_result id: {e}"))),
            Ok(None) => Err(StoreError::Unavailable(
                "append_result: insert returned no id".to_string(),
            )),
            Err(e) => Err(StoreError::Unavailable(format!("append_result: {e}"))),
        }
    }

    async fn list_results(
        &self,
        process_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ProcessResult>, StoreError> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM results WHERE process_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2"
                ),
                params![process_id, limit],
            )
            .await
            .map_err(|e| StoreError::Unavailable(format!("list_results: {e}")))?;

        let mut results = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_result(&row) {
                    Ok(r) => results.push(r),
                    Err(e) => tracing::warn!("Skipping result row: {e}"),
                },
                Ok(None) => break,
                Err(e) => return Err(StoreError::Unavailable(format!("list_results: {e}"))),
            }
        }
        Ok(results)
    }

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn()
            .query("SELECT value FROM settings WHERE key = ?1", params![key])
            .await
            .map_err(|e| StoreError::Unavailable(format!("get_setting: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value_str: String = row.get(0).unwrap_or_else(|_| "null".to_string());
                let value = serde_json::from_str(&value_str)
                    .map_err(|e| StoreError::Serialization(format!("setting {key}: {e}")))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Unavailable(format!("get_setting: {e}"))),
        }
    }

    async fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let value_str = to_json_text(value)?;
        let now = format_datetime(Utc::now());

        let _guard = self.conn_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = ?2, updated_at = ?3",
                params![key, value_str, now],
            )
            .await
            .map_err(|e| StoreError::Unavailable(format!("set_setting: {e}")))?;

        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<bool, StoreError> {
        let _guard = self.conn_lock.lock().await;
        let count = self
            .conn()
            .execute("DELETE FROM settings WHERE key = ?1", params![key])
            .await
            .map_err(|e| StoreError::Unavailable(format!("delete_setting: {e}")))?;
        Ok(count > 0)
    }

    // ── Maintenance ─────────────────────────────────────────────────

    async fn clear_all(&self) -> Result<(), StoreError> {
        self.run_in_transaction(
            "clear_all",
            &[
                ("DELETE FROM results", Vec::new()),
                ("DELETE FROM processes", Vec::new()),
                ("DELETE FROM settings", Vec::new()),
            ],
        )
        .await?;
        info!("Store cleared");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_process(id: &str, kind: ProcessKind) -> Process {
        Process::new(id, kind, json!({"interval_ms": 1000}))
    }

    // ── Process tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn save_and_get() {
        let db = test_db().await;
        let process = make_process("poll-1", ProcessKind::ApiPolling);
        db.save_process(&process).await.unwrap();

        let fetched = db.get_process("poll-1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "poll-1");
        assert_eq!(fetched.kind, ProcessKind::ApiPolling);
        assert_eq!(fetched.status, ProcessStatus::Pending);
        assert_eq!(fetched.payload["interval_ms"], 1000);
        assert!(fetched.last_updated_at >= process.last_updated_at);
    }

    #[tokio::test]
    async fn get_not_found() {
        let db = test_db().await;
        assert!(db.get_process("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_overwrites_status() {
        let db = test_db().await;
        let mut process = make_process("p", ProcessKind::DataProcessing);
        db.save_process(&process).await.unwrap();
        db.update_status("p", ProcessStatus::Running, None).await.unwrap();

        process.payload = json!({"interval_ms": 5});
        db.save_process(&process).await.unwrap();

        let fetched = db.get_process("p").await.unwrap().unwrap();
        assert_eq!(fetched.status, ProcessStatus::Pending);
        assert_eq!(fetched.payload["interval_ms"], 5);
    }

    #[tokio::test]
    async fn update_status_sets_and_clears_error() {
        let db = test_db().await;
        db.save_process(&make_process("p", ProcessKind::ApiPolling))
            .await
            .unwrap();

        assert!(db
            .update_status("p", ProcessStatus::Error, Some("HTTP 500"))
            .await
            .unwrap());
        let errored = db.get_process("p").await.unwrap().unwrap();
        assert_eq!(errored.status, ProcessStatus::Error);
        assert_eq!(errored.error_message.as_deref(), Some("HTTP 500"));

        db.update_status("p", ProcessStatus::Running, Some("ignored"))
            .await
            .unwrap();
        let recovered = db.get_process("p").await.unwrap().unwrap();
        assert_eq!(recovered.status, ProcessStatus::Running);
        assert!(recovered.error_message.is_none());
    }

    #[tokio::test]
    async fn update_status_unknown_id() {
        let db = test_db().await;
        assert!(!db
            .update_status("ghost", ProcessStatus::Stopped, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn list_with_filters() {
        let db = test_db().await;
        db.save_process(&make_process("a", ProcessKind::ApiPolling)).await.unwrap();
        db.save_process(&make_process("b", ProcessKind::DataProcessing)).await.unwrap();
        db.save_process(&make_process("c", ProcessKind::ApiPolling)).await.unwrap();
        db.update_status("c", ProcessStatus::Running, None).await.unwrap();

        assert_eq!(db.list_processes(ProcessFilter::default()).await.unwrap().len(), 3);

        let polling = db
            .list_processes(ProcessFilter::default().with_kind(ProcessKind::ApiPolling))
            .await
            .unwrap();
        assert_eq!(polling.len(), 2);

        let running_polling = db
            .list_processes(
                ProcessFilter::default()
                    .with_kind(ProcessKind::ApiPolling)
                    .with_status(ProcessStatus::Running),
            )
            .await
            .unwrap();
        assert_eq!(running_polling.len(), 1);
        assert_eq!(running_polling[0].id, "c");
    }

    // ── Result tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn results_newest_first_and_bounded() {
        let db = test_db().await;
        db.save_process(&make_process("p", ProcessKind::ContentGeneration))
            .await
            .unwrap();

        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let ts = base + chrono::Duration::milliseconds(i * 10);
            ids.push(
                db.append_result("p", ProcessKind::ContentGeneration, &json!({"n": i}), ts)
                    .await
                    .unwrap(),
            );
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids must increase");

        let all = db.list_results("p", None).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].data["n"], 4);
        assert_eq!(all[4].data["n"], 0);

        let latest = db.list_results("p", Some(2)).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].data["n"], 4);
        assert_eq!(latest[1].data["n"], 3);
    }

    #[tokio::test]
    async fn delete_cascades_to_results() {
        let db = test_db().await;
        db.save_process(&make_process("gone", ProcessKind::ApiPolling)).await.unwrap();
        db.save_process(&make_process("kept", ProcessKind::ApiPolling)).await.unwrap();
        for id in ["gone", "gone", "kept"] {
            db.append_result(id, ProcessKind::ApiPolling, &json!({}), Utc::now())
                .await
                .unwrap();
        }

        assert!(db.delete_process("gone").await.unwrap());
        assert!(db.get_process("gone").await.unwrap().is_none());
        assert!(db.list_results("gone", None).await.unwrap().is_empty());
        assert_eq!(db.list_results("kept", None).await.unwrap().len(), 1);

        assert!(!db.delete_process("gone").await.unwrap());
    }

    #[tokio::test]
    async fn oversized_limit_returns_everything() {
        let db = test_db().await;
        db.save_process(&make_process("p", ProcessKind::ApiPolling)).await.unwrap();
        for _ in 0..3 {
            db.append_result("p", ProcessKind::ApiPolling, &json!({}), Utc::now())
                .await
                .unwrap();
        }

        for limit in [usize::MAX, usize::MAX / 2 + 1] {
            assert_eq!(db.list_results("p", Some(limit)).await.unwrap().len(), 3);
        }
        assert!(db.list_results("p", Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn readers_never_see_partial_cascade() {
        let db = Arc::new(test_db().await);
        for round in 0..20 {
            let id = format!("p{round}");
            db.save_process(&make_process(&id, ProcessKind::ApiPolling)).await.unwrap();
            for _ in 0..5 {
                db.append_result(&id, ProcessKind::ApiPolling, &json!({}), Utc::now())
                    .await
                    .unwrap();
            }

            let reader = {
                let db = Arc::clone(&db);
                let id = id.clone();
                tokio::spawn(async move {
                    loop {
                        let results = db.list_results(&id, None).await.unwrap();
                        let process = db.get_process(&id).await.unwrap();
                        if results.is_empty() {
                            assert!(process.is_none(), "results of {id} gone before the process");
                            return;
                        }
                    }
                })
            };

            assert!(db.delete_process(&id).await.unwrap());
            reader.await.unwrap();
        }
    }

    // ── Settings tests ──────────────────────────────────────────────

    #[tokio::test]
    async fn settings_crud() {
        let db = test_db().await;
        db.set_setting("theme", &json!({"mode": "dark"})).await.unwrap();
        assert_eq!(db.get_setting("theme").await.unwrap().unwrap()["mode"], "dark");

        db.set_setting("theme", &json!({"mode": "light"})).await.unwrap();
        assert_eq!(db.get_setting("theme").await.unwrap().unwrap()["mode"], "light");

        assert!(db.delete_setting("theme").await.unwrap());
        assert!(db.get_setting("theme").await.unwrap().is_none());
        assert!(!db.delete_setting("theme").await.unwrap());
    }

    #[tokio::test]
    async fn clear_all_wipes_everything() {
        let db = test_db().await;
        db.save_process(&make_process("p", ProcessKind::ApiPolling)).await.unwrap();
        db.append_result("p", ProcessKind::ApiPolling, &json!(1), Utc::now())
            .await
            .unwrap();
        db.set_setting("k", &json!(true)).await.unwrap();

        db.clear_all().await.unwrap();

        assert!(db.list_processes(ProcessFilter::default()).await.unwrap().is_empty());
        assert!(db.list_results("p", None).await.unwrap().is_empty());
        assert!(db.get_setting("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn new_local_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("dir").join("orchestrator.db");
        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        db.save_process(&make_process("p", ProcessKind::ApiPolling)).await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("orchestrator.db");
        {
            let db = LibSqlBackend::new_local(&db_path).await.unwrap();
            db.save_process(&make_process("durable", ProcessKind::ApiPolling))
                .await
                .unwrap();
            db.update_status("durable", ProcessStatus::Running, None).await.unwrap();
        }

        let reopened = LibSqlBackend::new_local(&db_path).await.unwrap();
        let p = reopened.get_process("durable").await.unwrap().unwrap();
        assert_eq!(p.status, ProcessStatus::Running);
    }

    #[test]
    fn datetime_format_is_fixed_width() {
        let a = format_datetime(Utc::now());
        let b = format_datetime(Utc::now() + chrono::Duration::milliseconds(1));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(format_datetime(parse_datetime(&a)), a);
    }

    #[test]
    fn parse_datetime_accepts_sqlite_format() {
        let dt = parse_datetime("2024-03-01 12:30:00");
        assert_eq!(dt.to_rfc3339(), "2024-03-01T12:30:00+00:00");
        assert_eq!(parse_datetime("garbage"), DateTime::<Utc>::MIN_UTC);
    }
}
