//! Process status state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Persisted, not yet armed by the worker.
    Pending,
    /// Armed; the last tick (if any) succeeded.
    Running,
    /// A single-shot process finished successfully.
    Completed,
    /// The last tick failed. The timer keeps running.
    Error,
    /// Timer cancelled by an explicit stop.
    Stopped,
}

impl ProcessStatus {
    /// Check if a worker report may move a process from this status to `target`.
    ///
    /// Reports that repeat the current status are always accepted. `Stopped`
    /// is terminal: a restart saves the process as `Pending` again, so a
    /// late tick report can never revive a stopped process.
    pub fn can_transition_to(&self, target: ProcessStatus) -> bool {
        use ProcessStatus::*;

        if *self == target {
            return true;
        }

        matches!(
            (self, target),
            // From Pending
            (Pending, Running) | (Pending, Error) | (Pending, Stopped) |
            // From Running
            (Running, Completed) | (Running, Error) | (Running, Stopped) |
            // From Error (a later tick can succeed)
            (Error, Running) | (Error, Completed) | (Error, Stopped) |
            // Single-shot timers stay armed until stopped
            (Completed, Stopped)
        )
    }

    /// Stable string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown process status: {other}")),
        }
    }
}
