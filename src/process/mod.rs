//! Process domain types.
//!
//! - `model`: `Process`, `ProcessResult`, filters and kinds
//! - `state`: per-process status state machine

pub mod model;
pub mod state;

pub use model::{Process, ProcessData, ProcessFilter, ProcessKind, ProcessResult, payload_interval};
pub use state::ProcessStatus;
