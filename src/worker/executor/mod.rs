//! Executors, the kind-specific logic run on every tick.
//!
//! - `api_polling`: one HTTP request per tick
//! - `data_processing`: filter/map/sort pipeline over in-memory rows
//! - `content_generation`: `{{ placeholder }}` template rendering
//! - `expr`: the closed expression language used by pipeline steps

pub mod api_polling;
pub mod content_generation;
pub mod data_processing;
pub mod expr;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::OrchestratorConfig;
use crate::error::ExecutionError;
use crate::process::ProcessKind;

pub use api_polling::ApiPollingExecutor;
pub use content_generation::ContentGenerationExecutor;
pub use data_processing::DataProcessingExecutor;

/// Runs one tick of a process.
#[async_trait]
pub trait Executor: Send + Sync {
    /// The process kind this executor serves.
    fn kind(&self) -> ProcessKind;

    /// Execute one tick against the latest payload. The returned value becomes
    /// the `data` of an `ExecutionResult`.
    async fn execute(
        &self,
        process_id: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ExecutionError>;
}

/// Executors keyed by process kind.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ProcessKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the three built-in executors.
    pub fn with_defaults(config: &OrchestratorConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ApiPollingExecutor::new(config.http_timeout)));
        registry.register(Arc::new(DataProcessingExecutor));
        registry.register(Arc::new(ContentGenerationExecutor));
        registry
    }

    /// Register an executor, replacing any existing one for the same kind.
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        let kind = executor.kind();
        if self.executors.insert(kind, executor).is_some() {
            tracing::debug!(kind = %kind, "Replaced executor");
        }
    }

    pub fn get(&self, kind: ProcessKind) -> Option<Arc<dyn Executor>> {
        self.executors.get(&kind).cloned()
    }

    /// Dispatch one tick to the executor for `kind`.
    pub async fn execute(
        &self,
        kind: ProcessKind,
        process_id: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ExecutionError> {
        let executor = self.get(kind).ok_or_else(|| ExecutionError::NoExecutor {
            kind: kind.to_string(),
        })?;
        executor.execute(process_id, payload).await
    }
}

/// Deserialize a kind-specific payload, mapping failures to `InvalidPayload`.
pub(crate) fn parse_payload<T: DeserializeOwned>(
    kind: ProcessKind,
    payload: &serde_json::Value,
) -> Result<T, ExecutionError> {
    serde_json::from_value(payload.clone()).map_err(|e| ExecutionError::InvalidPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}
