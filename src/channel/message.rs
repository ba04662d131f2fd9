//! Message types exchanged over the channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::process::{Process, ProcessData, ProcessKind, ProcessStatus};

/// Client -> worker commands.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    /// Arm (or re-arm) the timer for a process.
    Init {
        process_id: String,
        kind: ProcessKind,
        payload: serde_json::Value,
    },
    /// Cancel the timer for a process. Always answered with `ProcessStopped`.
    Stop { process_id: String },
    /// Re-arm every process the store reports as running.
    Sync,
}

impl WorkerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Stop { .. } => "stop",
            Self::Sync => "sync",
        }
    }
}

/// Worker -> client notifications. Applied to the store, then fanned out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessEvent {
    ProcessStopped {
        process_id: String,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        process_id: String,
        status: ProcessStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ExecutionResult {
        process_id: String,
        kind: ProcessKind,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
}

impl ProcessEvent {
    pub fn stopped(process_id: impl Into<String>) -> Self {
        Self::ProcessStopped {
            process_id: process_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn status(process_id: impl Into<String>, status: ProcessStatus) -> Self {
        Self::StatusChanged {
            process_id: process_id.into(),
            status,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(process_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StatusChanged {
            process_id: process_id.into(),
            status: ProcessStatus::Error,
            error_message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn result(process_id: impl Into<String>, kind: ProcessKind, data: serde_json::Value) -> Self {
        Self::ExecutionResult {
            process_id: process_id.into(),
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Listener key for this event.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ProcessStopped { .. } => MessageType::ProcessStopped,
            Self::StatusChanged { .. } => MessageType::StatusChanged,
            Self::ExecutionResult { .. } => MessageType::ExecutionResult,
        }
    }

    pub fn process_id(&self) -> &str {
        match self {
            Self::ProcessStopped { process_id, .. }
            | Self::StatusChanged { process_id, .. }
            | Self::ExecutionResult { process_id, .. } => process_id,
        }
    }
}

/// Discriminant of `ProcessEvent`, used to key listener registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ProcessStopped,
    StatusChanged,
    ExecutionResult,
}

impl MessageType {
    pub const ALL: [MessageType; 3] = [
        MessageType::ProcessStopped,
        MessageType::StatusChanged,
        MessageType::ExecutionResult,
    ];
}

/// Worker -> client round trips. The client answers on `reply`.
#[derive(Debug)]
pub enum WorkerRequest {
    ProcessData {
        process_id: String,
        reply: oneshot::Sender<Option<ProcessData>>,
    },
    AllProcesses {
        reply: oneshot::Sender<Vec<Process>>,
    },
}

impl WorkerRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProcessData { .. } => "request_process_data",
            Self::AllProcesses { .. } => "request_all_processes",
        }
    }
}

/// Everything the worker sends to the client.
#[derive(Debug)]
pub enum WorkerEvent {
    Notify(ProcessEvent),
    Request(WorkerRequest),
}
