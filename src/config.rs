//! Configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::process::ProcessKind;
use crate::worker::RetryPolicy;

/// Orchestrator configuration shared by the client, the worker and the daemon.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Location of the libSQL database file.
    pub db_path: PathBuf,
    /// Tick interval used when a payload carries no `interval_ms`.
    pub default_interval: Duration,
    /// Upper bound on worker -> client request/response round trips.
    pub request_timeout: Duration,
    /// Per-request timeout for the API polling executor.
    pub http_timeout: Duration,
    /// Capacity of the command/event queues and the broadcast fan-out.
    pub channel_capacity: usize,
    /// Backoff and give-up policy for failing ticks.
    pub retry: RetryPolicy,
    /// Optional JSON file of processes the daemon starts at boot.
    pub seed_file: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/orchestrator.db"),
            default_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(5),
            http_timeout: Duration::from_secs(30),
            channel_capacity: 256,
            retry: RetryPolicy::default(),
            seed_file: None,
        }
    }
}

impl OrchestratorConfig {
    /// Build a config from `ORCHESTRATOR_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let db_path = std::env::var("ORCHESTRATOR_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let default_interval = env_millis("ORCHESTRATOR_DEFAULT_INTERVAL_MS")?
            .unwrap_or(defaults.default_interval);
        let request_timeout = env_millis("ORCHESTRATOR_REQUEST_TIMEOUT_MS")?
            .unwrap_or(defaults.request_timeout);
        let http_timeout =
            env_millis("ORCHESTRATOR_HTTP_TIMEOUT_MS")?.unwrap_or(defaults.http_timeout);

        let channel_capacity = match env_parse::<usize>("ORCHESTRATOR_CHANNEL_CAPACITY")? {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    key: "ORCHESTRATOR_CHANNEL_CAPACITY".into(),
                    message: "must be greater than zero".into(),
                });
            }
            Some(n) => n,
            None => defaults.channel_capacity,
        };

        let retry = RetryPolicy {
            backoff: env_parse::<bool>("ORCHESTRATOR_BACKOFF")?.unwrap_or(defaults.retry.backoff),
            max_backoff: env_millis("ORCHESTRATOR_MAX_BACKOFF_MS")?
                .unwrap_or(defaults.retry.max_backoff),
            max_consecutive_failures: env_parse::<u32>("ORCHESTRATOR_MAX_CONSECUTIVE_FAILURES")?,
        };

        let seed_file = std::env::var("ORCHESTRATOR_SEED_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            db_path,
            default_interval,
            request_timeout,
            http_timeout,
            channel_capacity,
            retry,
            seed_file,
        })
    }
}

/// A process definition started by the daemon at boot.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedProcess {
    /// Generated when omitted.
    #[serde(default = "generated_id")]
    pub id: String,
    pub kind: ProcessKind,
    pub payload: serde_json::Value,
}

fn generated_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Read a JSON array of [`SeedProcess`] entries.
pub fn load_seed_file(path: &Path) -> Result<Vec<SeedProcess>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::SeedFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::SeedFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(None),
    }
}

fn env_millis(key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}
