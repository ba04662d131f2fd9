//! Process orchestrator for recurring background jobs with durable state.

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod process;
pub mod store;
pub mod worker;
