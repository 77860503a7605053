//! Wire-level building blocks for the memcortex MCP memory server:
//! JSON-RPC 2.0 framing, the conversation-chunk data model, the shared
//! error taxonomy, and the object pools the codec builds on.

pub mod chunk;
pub mod codec;
pub mod error;
pub mod jsonrpc;
pub mod pool;
pub mod value;

pub use chunk::{ChunkType, ConversationChunk, ExtendedMetadata, TaskPriority, TaskStatus};
pub use error::{MemoryError, MemoryResult};
pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, ResponseId,
};
pub use pool::{BufferPool, PooledBuffer};
pub use value::Value;

/// Protocol version this server speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
