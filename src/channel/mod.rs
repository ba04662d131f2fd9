//! Message channel between the orchestration client and the worker.
//!
//! Two bounded `mpsc` queues, one per direction, plus `oneshot` reply
//! channels for the worker's request/response round trips. Delivery is
//! at-most-once: nothing here retries.

pub mod link;
pub mod message;

pub use link::{ClientLink, WorkerLink};
pub use message::{MessageType, ProcessEvent, WorkerCommand, WorkerEvent, WorkerRequest};
