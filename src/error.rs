//! Error types for the process orchestrator.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read seed file {path}: {reason}")]
    SeedFile { path: String, reason: String },
}

/// Persistent store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The engine is not open or an operation/transaction failed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Message channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("No active worker to receive {message}")]
    WorkerNotActive { message: &'static str },

    #[error("Request {request} got no reply within {timeout:?}")]
    RequestTimedOut {
        request: &'static str,
        timeout: Duration,
    },

    #[error("Reply channel for {request} was dropped")]
    ReplyDropped { request: &'static str },

    #[error("Client link closed")]
    Closed,
}

/// Process lookup and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process {id} not found")]
    NotFound { id: String },

    #[error("Invalid payload for process {id}: {reason}")]
    InvalidPayload { id: String, reason: String },
}

/// Failure of a single execution tick.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP {status} from {endpoint}: {body}")]
    HttpStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("No executor registered for {kind}")]
    NoExecutor { kind: String },

    #[error("Gave up after {failures} consecutive failures: {last}")]
    GaveUp { failures: u32, last: String },
}

/// Failure of one data-processing step. Logged and skipped, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("Step {index} is malformed: {reason}")]
    Parse { index: usize, reason: String },

    #[error("Step {index} ({step}) failed: {reason}")]
    Eval {
        index: usize,
        step: &'static str,
        reason: String,
    },
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
