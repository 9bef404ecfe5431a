//! Thin HTTP surface next to the message-bus workers.

/// Route handlers and their shared state.
pub mod routes;
/// HTTP server bootstrap.
pub mod server;
