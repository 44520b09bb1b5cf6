//! Transport layer for the signaling relay
//!
//! Serves the signaling WebSocket and the HTTP health/metrics endpoints.

pub mod http_server;
pub mod signaling_server;

pub use http_server::{build_router, run_http_server, serve};
pub use signaling_server::handle_signaling_connection;
