//! Transport layer for the memcortex memory server: a newline-delimited
//! stdio transport for local subprocess use, and a WebSocket transport
//! with a connection pool for networked multi-client use.

pub mod stdio;
pub mod websocket;

pub use stdio::{StdioReader, StdioWriter};
pub use websocket::{
    Admission, ClientHandle, ClientMetadata, ConnectionConfig, ConnectionPool, MemoryEvent,
    OutboundMessage, PoolMetrics,
};
