//! Observability setup for Provisio: tracing subscriber installation with
//! plain or JSON output and optional OpenTelemetry span export.

pub mod tracing_setup;

pub use tracing_setup::{LogFormat, init_tracing, shutdown_tracing};
