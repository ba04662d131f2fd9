//! Worker system: the isolated context that owns process execution.
//!
//! Core components:
//! - `worker`: command loop (`Init`, `Stop`, `Sync`) and `WorkerHandle`
//! - `scheduler`: one timer task per armed process
//! - `retry`: backoff and give-up policy for failing ticks
//! - `executor`: kind-specific tick logic

pub mod executor;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use executor::{Executor, ExecutorRegistry};
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use worker::{Worker, WorkerHandle};
