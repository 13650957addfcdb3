//! Resilient remote-call primitive.
//!
//! - `transport` -- the single-attempt HTTP port implemented in provisio-infra
//! - `client` -- timeout, retry with linear backoff, and failure classification
//! - `redact` -- sensitive header masking for call logs

pub mod client;
pub mod redact;
pub mod transport;

pub use client::ResilientClient;
pub use transport::{HttpTransport, TransportResponse};
