//! HTTP API Module
//!
//! Health, status, public key and metrics endpoints.

mod metrics;
mod routes;

pub use metrics::Metrics;
pub use routes::run_api_server;
