//! Infrastructure layer for Provisio.
//!
//! Contains implementations of the ports defined in `provisio-core`: the
//! reqwest HTTP transport, in-memory and SQLite execution stores, built-in
//! step actions, the TOML configuration loader, and backend selection.

pub mod action;
pub mod config;
pub mod http;
pub mod memory;
pub mod sqlite;
pub mod store;
