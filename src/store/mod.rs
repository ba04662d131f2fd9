//! Persistence layer: libSQL-backed storage for processes, results and settings.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::ProcessStore;
