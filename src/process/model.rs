//! Core process and result types.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ProcessStatus;

/// Which executor runs a process on each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    ApiPolling,
    DataProcessing,
    ContentGeneration,
}

impl ProcessKind {
    pub const ALL: [ProcessKind; 3] = [
        ProcessKind::ApiPolling,
        ProcessKind::DataProcessing,
        ProcessKind::ContentGeneration,
    ];

    /// Stable string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiPolling => "api_polling",
            Self::DataProcessing => "data_processing",
            Self::ContentGeneration => "content_generation",
        }
    }
}

impl std::fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_polling" => Ok(Self::ApiPolling),
            "data_processing" => Ok(Self::DataProcessing),
            "content_generation" => Ok(Self::ContentGeneration),
            other => Err(format!("unknown process kind: {other}")),
        }
    }
}

/// A unit of recurring scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: String,
    pub kind: ProcessKind,
    pub status: ProcessStatus,
    /// Kind-specific configuration, always a JSON object.
    pub payload: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Set only while `status` is `Error`.
    pub error_message: Option<String>,
}

impl Process {
    /// Create a new `Pending` process.
    pub fn new(id: impl Into<String>, kind: ProcessKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            status: ProcessStatus::Pending,
            payload,
            started_at: now,
            last_updated_at: now,
            error_message: None,
        }
    }

    /// The slice of a process the worker needs to run a tick.
    pub fn data(&self) -> ProcessData {
        ProcessData {
            kind: self.kind,
            payload: self.payload.clone(),
        }
    }
}

/// Current kind and payload of a process, as served to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessData {
    pub kind: ProcessKind,
    pub payload: serde_json::Value,
}

/// One immutable output record produced by a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Store-assigned, monotonically increasing.
    pub id: i64,
    pub process_id: String,
    pub kind: ProcessKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Optional constraints for listing processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessFilter {
    pub status: Option<ProcessStatus>,
    pub kind: Option<ProcessKind>,
}

impl ProcessFilter {
    pub fn with_status(mut self, status: ProcessStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: ProcessKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Check a process against the filter.
    pub fn matches(&self, process: &Process) -> bool {
        self.status.is_none_or(|s| s == process.status)
            && self.kind.is_none_or(|k| k == process.kind)
    }
}

/// Tick interval declared by a payload's `interval_ms`, or `default`.
///
/// A zero interval means the process runs once and then idles.
pub fn payload_interval(payload: &serde_json::Value, default: Duration) -> Duration {
    payload
        .get("interval_ms")
        .and_then(|v| v.as_u64())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
