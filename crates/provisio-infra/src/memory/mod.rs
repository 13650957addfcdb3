//! In-memory store adapters.

pub mod execution;

pub use execution::InMemoryExecutionStore;
