//! Business logic and port definitions for Provisio.
//!
//! This crate holds the workflow validator, the execution engine, and the
//! resilient remote-call primitive, plus the traits ("ports") the
//! infrastructure layer implements: `ExecutionStore` for run snapshots and
//! `HttpTransport` for single HTTP exchanges. It depends only on
//! `provisio-types`, never on `provisio-infra` or any database/IO crate.

pub mod remote;
pub mod repository;
pub mod service;
pub mod workflow;
