//! SQLite storage layer.
//!
//! The persistent operation registry, backed by SQLite with WAL mode and
//! split read/write connection pools.

pub mod execution;
pub mod pool;

pub use execution::SqliteExecutionStore;
pub use pool::DatabasePool;
