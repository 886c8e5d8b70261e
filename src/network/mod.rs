//! Network layer: the accept loop, forwarding client, connection
//! bounding, and WebSocket plumbing.

pub mod client;
pub mod connection_pool;
pub mod server;
pub mod websocket;

pub use client::{ForwardRequest, ForwardedResponse, HttpClient};
pub use connection_pool::{ConnectionGuard, ConnectionPool};

/// Maximum number of concurrent connections.
pub const MAX_CONNECTIONS: usize = 4096;

/// Connection setup timeout.
pub const CONNECT_TIMEOUT_MS: u64 = 1000;

/// Graceful shutdown timeout.
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
