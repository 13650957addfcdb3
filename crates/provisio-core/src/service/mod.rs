//! Business logic services (use cases).
//!
//! Services orchestrate the engine and the execution store. They depend on
//! traits (ports), never on concrete infrastructure implementations.

pub mod workflow;

pub use workflow::{ServiceError, WorkflowService};
