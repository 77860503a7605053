//! JSON-RPC codec (C2).
//!
//! Encoding never appends a trailing newline (callers that need
//! newline-delimited framing, e.g. the stdio transport, add it
//! themselves) and decoding preserves numeric precision — integers are
//! never silently narrowed through `f64`, because [`crate::jsonrpc::RequestId`]
//! decodes the numeric variant straight into `i64`.
//!
//! Buffers are borrowed from a [`BufferPool`] during encoding, but every
//! function here returns an owned `Vec<u8>`/`String` copy: callers never
//! see a pool-internal buffer, so there is nothing to retain across a
//! `Put`.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Deserializer as JsonDeserializer;

use crate::error::{MemoryError, MemoryResult};
use crate::jsonrpc::{JsonRpcError, JsonRpcMessage, JsonRpcResponse, JsonRpcResponsePayload};
use crate::pool::BufferPool;

/// Encode `value` to an owned byte vector, using `pool` for scratch
/// space during serialization.
pub fn encode<T: Serialize>(value: &T, pool: &BufferPool) -> MemoryResult<Vec<u8>> {
    let mut scratch = pool.get();
    serde_json::to_writer(&mut *scratch, value).map_err(MemoryError::Serialization)?;
    Ok(scratch.clone())
}

/// Decode `bytes` into `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> MemoryResult<T> {
    serde_json::from_slice(bytes).map_err(MemoryError::Serialization)
}

/// Encode `value` directly to `writer`, with no trailing newline.
pub fn encode_to_writer<W: Write, T: Serialize>(writer: &mut W, value: &T) -> MemoryResult<()> {
    serde_json::to_writer(writer, value).map_err(MemoryError::Serialization)
}

/// Decode a single JSON value from `reader`.
pub fn decode_from_reader<R: Read, T: DeserializeOwned>(reader: R) -> MemoryResult<T> {
    serde_json::from_reader(reader).map_err(MemoryError::Serialization)
}

/// Incrementally decode concatenated JSON values from a byte stream
/// (e.g. several JSON-RPC messages written back to back with no
/// delimiter, as some non-conforming peers do).
pub struct StreamingDecoder<R: Read> {
    stream: serde_json::StreamDeserializer<
        'static,
        serde_json::de::IoRead<io::BufReader<R>>,
        JsonRpcMessage,
    >,
}

// `StreamDeserializer` over an `IoRead` source never borrows from the
// reader (it copies bytes into its own buffer), so the `'static` lifetime
// holds regardless of `R`.
impl<R: Read> StreamingDecoder<R> {
    /// Wrap `reader` for incremental decoding.
    pub fn new(reader: R) -> Self {
        let de = JsonDeserializer::from_reader(io::BufReader::new(reader));
        Self {
            stream: de.into_iter::<JsonRpcMessage>(),
        }
    }

    /// Decode the next message, if any remain.
    pub fn next_message(&mut self) -> Option<MemoryResult<JsonRpcMessage>> {
        self.stream
            .next()
            .map(|r| r.map_err(MemoryError::Serialization))
    }
}

/// Fast-path marshaling for the three hot response shapes, avoiding an
/// intermediate `serde_json::Value` for the common case of a
/// caller-provided, already-serializable result/error.
pub struct FastMarshal;

impl FastMarshal {
    /// Marshal a success response directly from its typed result,
    /// without constructing an intermediate [`JsonRpcResponse`] struct.
    pub fn success<T: Serialize>(
        result: &T,
        id: crate::jsonrpc::RequestId,
        pool: &BufferPool,
    ) -> MemoryResult<Vec<u8>> {
        let value = serde_json::to_value(result).map_err(MemoryError::Serialization)?;
        let response = JsonRpcResponse::success(value, id);
        encode(&response, pool)
    }

    /// Marshal an error response.
    pub fn error(
        error: JsonRpcError,
        id: crate::jsonrpc::RequestId,
        pool: &BufferPool,
    ) -> MemoryResult<Vec<u8>> {
        let response = JsonRpcResponse::error_response(error, id);
        encode(&response, pool)
    }

    /// Whether a raw response payload represents success, without fully
    /// decoding it — used by transports that only need to log outcome.
    pub fn peek_is_success(bytes: &[u8]) -> bool {
        decode::<JsonRpcResponse>(bytes)
            .map(|r| matches!(r.payload, JsonRpcResponsePayload::Success { .. }))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::{JsonRpcRequest, RequestId};
    use serde_json::json;

    #[test]
    fn encode_has_no_trailing_newline() {
        let pool = BufferPool::new(4, 64);
        let request = JsonRpcRequest::new("ping", None, RequestId::from("1"));
        let bytes = encode(&request, &pool).unwrap();
        assert_ne!(bytes.last(), Some(&b'\n'));
    }

    #[test]
    fn decode_round_trips() {
        let pool = BufferPool::new(4, 64);
        let request = JsonRpcRequest::new("tools/call", Some(json!({"a":1})), RequestId::from(2i64));
        let bytes = encode(&request, &pool).unwrap();
        let decoded: JsonRpcRequest = decode(&bytes).unwrap();
        assert_eq!(decoded.method, "tools/call");
        assert_eq!(decoded.id, RequestId::Number(2));
    }

    #[test]
    fn decode_preserves_large_integer_id() {
        let json = br#"{"jsonrpc":"2.0","method":"ping","id":9223372036854775}"#;
        let decoded: JsonRpcRequest = decode(json).unwrap();
        assert_eq!(decoded.id, RequestId::Number(9223372036854775));
    }

    #[test]
    fn malformed_json_surfaces_as_serialization_error() {
        let result: MemoryResult<JsonRpcRequest> = decode(b"{not json");
        assert!(matches!(result, Err(MemoryError::Serialization(_))));
    }

    #[test]
    fn streaming_decoder_consumes_concatenated_messages() {
        let payload = br#"{"jsonrpc":"2.0","method":"a","id":"1"}{"jsonrpc":"2.0","method":"b","id":"2"}"#;
        let mut decoder = StreamingDecoder::new(&payload[..]);
        let first = decoder.next_message().unwrap().unwrap();
        let second = decoder.next_message().unwrap().unwrap();
        assert_eq!(first.method(), Some("a"));
        assert_eq!(second.method(), Some("b"));
        assert!(decoder.next_message().is_none());
    }

    #[test]
    fn fast_marshal_success_round_trips() {
        let pool = BufferPool::new(4, 64);
        let bytes = FastMarshal::success(&json!({"ok": true}), RequestId::from("1"), &pool).unwrap();
        assert!(FastMarshal::peek_is_success(&bytes));
    }
}
