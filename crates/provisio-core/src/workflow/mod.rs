//! Workflow engine core: definition model, validation, and execution.
//!
//! - `definition` -- YAML parsing, structural validation, template discovery
//! - `dag` -- step arena, iterative cycle detection, dependency closure
//! - `context` -- run variables, step outputs, and template resolution
//! - `action` -- step action trait, boxed dispatch, and the tag registry
//! - `retry` -- attempt bookkeeping and linear backoff
//! - `executor` -- phase-ordered scheduler with parallel groups and rollback

pub mod action;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod retry;
