//! Shared domain types for Provisio.
//!
//! Workflow definitions and run records, the remote-call model, global
//! configuration, and the repository error shared by every store.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod remote;
pub mod workflow;
