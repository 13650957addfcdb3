//! Outbound HTTP adapters for the resilient call primitive.

pub mod reqwest_transport;

pub use reqwest_transport::ReqwestTransport;
