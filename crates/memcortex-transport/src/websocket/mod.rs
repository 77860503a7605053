//! The WebSocket transport: connection pool, per-connection serving
//! loop, and the shared client/event types.

mod connection;
mod pool;
mod types;

pub use connection::{serve_connection, ConnectionConfig};
pub use pool::{Admission, ConnectionPool, PoolMetrics};
pub use types::{ClientHandle, ClientMetadata, MemoryEvent, OutboundMessage};
