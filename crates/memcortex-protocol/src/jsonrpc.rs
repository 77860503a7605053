//! JSON-RPC 2.0 message types.
//!
//! Covers requests, responses, notifications, and the standard error
//! codes used throughout the MCP dispatcher.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// JSON-RPC version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC version marker (always serializes/deserializes as `"2.0"`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// Request/response identifier. Per JSON-RPC 2.0, either a string or a
/// number; we preserve numeric precision by decoding into `i64` rather
/// than `f64`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String identifier.
    String(String),
    /// Numeric identifier.
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// A JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: JsonRpcVersion,
    /// Method name to dispatch.
    pub method: String,
    /// Method parameters, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Correlation id.
    pub id: RequestId,
}

impl JsonRpcRequest {
    /// Build a new request.
    pub fn new(method: impl Into<String>, params: Option<Value>, id: impl Into<RequestId>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            id: id.into(),
        }
    }
}

/// A JSON-RPC notification: a request with no `id` and therefore no
/// expected response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: JsonRpcVersion,
    /// Method name.
    pub method: String,
    /// Method parameters, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Build a new notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// Response payload: exactly one of `result` or `error`, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponsePayload {
    /// Successful result.
    Success {
        /// The result value.
        result: Value,
    },
    /// Error result.
    Error {
        /// The error object.
        error: JsonRpcError,
    },
}

/// Response id. Parse errors (the message never made it far enough to
/// have a known id) serialize this as `null`, per the spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(pub Option<RequestId>);

impl ResponseId {
    /// Build a response id tied to a known request.
    pub fn from_request(id: RequestId) -> Self {
        Self(Some(id))
    }

    /// Build the `null` response id used for parse errors.
    pub fn null() -> Self {
        Self(None)
    }

    /// The underlying request id, if any.
    pub fn as_request_id(&self) -> Option<&RequestId> {
        self.0.as_ref()
    }

    /// Whether this is the `null` parse-error id.
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }
}

/// A JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: JsonRpcVersion,
    /// Result or error, mutually exclusive.
    #[serde(flatten)]
    pub payload: JsonRpcResponsePayload,
    /// Correlation id (null for parse errors).
    pub id: ResponseId,
}

impl JsonRpcResponse {
    /// Build a success response correlated to `id`.
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Success { result },
            id: ResponseId::from_request(id),
        }
    }

    /// Build an error response correlated to `id`.
    pub fn error_response(error: JsonRpcError, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error { error },
            id: ResponseId::from_request(id),
        }
    }

    /// Build a parse-error response. The id is unknown (`null`) because
    /// the message never decoded far enough to find one.
    pub fn parse_error(message: Option<String>) -> Self {
        let error = JsonRpcError {
            code: JsonRpcErrorCode::ParseError.code(),
            message: message.unwrap_or_else(|| JsonRpcErrorCode::ParseError.message().to_string()),
            data: None,
        };
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error { error },
            id: ResponseId::null(),
        }
    }

    /// Whether this response carries a result.
    pub fn is_success(&self) -> bool {
        matches!(self.payload, JsonRpcResponsePayload::Success { .. })
    }

    /// Whether this response carries an error.
    pub fn is_error(&self) -> bool {
        matches!(self.payload, JsonRpcResponsePayload::Error { .. })
    }

    /// The result, if this is a success response.
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            JsonRpcResponsePayload::Success { result } => Some(result),
            JsonRpcResponsePayload::Error { .. } => None,
        }
    }

    /// The error, if this is an error response.
    pub fn error(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            JsonRpcResponsePayload::Success { .. } => None,
            JsonRpcResponsePayload::Error { error } => Some(error),
        }
    }

    /// The request id this response correlates to, if known.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.id.as_request_id()
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Structured hints (offending parameter, valid range, retry-after, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard and MCP-specific JSON-RPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    /// `-32700`: the payload did not parse as JSON.
    ParseError,
    /// `-32600`: the payload parsed but is not a valid JSON-RPC message.
    InvalidRequest,
    /// `-32601`: no handler is registered for `method`.
    MethodNotFound,
    /// `-32602`: `params` failed validation.
    InvalidParams,
    /// `-32603`: an unexpected internal failure, including caught panics.
    InternalError,
    /// `-32002`: a request arrived before `initialize` completed.
    NotInitialized,
    /// `-32000`: the scheduler queue is full.
    Overloaded,
    /// `-32004`: the rate limiter rejected the request.
    RateLimited,
    /// Any other application-defined code.
    ApplicationError(i32),
}

impl JsonRpcErrorCode {
    /// The numeric code.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::NotInitialized => -32002,
            Self::Overloaded => -32000,
            Self::RateLimited => -32004,
            Self::ApplicationError(code) => *code,
        }
    }

    /// The standard message for this code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::NotInitialized => "Server not initialized",
            Self::Overloaded => "Server overloaded",
            Self::RateLimited => "Rate limit exceeded",
            Self::ApplicationError(_) => "Application error",
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

impl From<JsonRpcErrorCode> for JsonRpcError {
    fn from(code: JsonRpcErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data: None,
        }
    }
}

/// Any JSON-RPC message: a request, response, or notification.
///
/// Notifications are distinguished from requests by the absence of
/// `id`; since `serde(untagged)` tries variants in order, `Notification`
/// must be attempted only after `Request` fails to decode (handled by
/// field presence, not declaration order, because `id` is a required
/// field on `JsonRpcRequest`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A response to a prior request.
    Response(JsonRpcResponse),
    /// A notification with no expected response.
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Whether this message is a notification (no `id`, no response expected).
    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Notification(_))
    }

    /// The method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_round_trips() {
        let encoded = serde_json::to_string(&JsonRpcVersion).unwrap();
        assert_eq!(encoded, "\"2.0\"");
        let decoded: JsonRpcVersion = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, JsonRpcVersion);
    }

    #[test]
    fn rejects_wrong_version() {
        let result: Result<JsonRpcVersion, _> = serde_json::from_str("\"1.0\"");
        assert!(result.is_err());
    }

    #[test]
    fn request_decodes_as_request_not_notification() {
        let json = r#"{"jsonrpc":"2.0","method":"tools/list","id":"1"}"#;
        let message: JsonRpcMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(message, JsonRpcMessage::Request(_)));
        assert!(!message.is_notification());
    }

    #[test]
    fn notification_has_no_id() {
        let json = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let message: JsonRpcMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(message, JsonRpcMessage::Notification(_)));
        assert!(message.is_notification());
    }

    #[test]
    fn numeric_id_preserves_precision() {
        let json = r#"{"jsonrpc":"2.0","method":"ping","id":9007199254740993}"#;
        let message: JsonRpcMessage = serde_json::from_str(json).unwrap();
        match message {
            JsonRpcMessage::Request(r) => assert_eq!(r.id, RequestId::Number(9007199254740993)),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn success_and_error_responses_are_mutually_exclusive() {
        let success = JsonRpcResponse::success(json!({"ok": true}), RequestId::from("1"));
        assert!(success.is_success());
        assert!(!success.is_error());
        assert!(success.result().is_some());
        assert!(success.error().is_none());

        let error = JsonRpcResponse::error_response(
            JsonRpcErrorCode::MethodNotFound.into(),
            RequestId::from("1"),
        );
        assert!(error.is_error());
        assert!(!error.is_success());
        assert!(error.error().is_some());
        assert!(error.result().is_none());
    }

    #[test]
    fn parse_error_has_null_id() {
        let response = JsonRpcResponse::parse_error(Some("bad json".into()));
        assert!(response.id.is_null());
        assert_eq!(response.error().unwrap().code, -32700);
    }

    #[test]
    fn error_code_round_trips_through_i32() {
        assert_eq!(JsonRpcErrorCode::RateLimited.code(), -32004);
        assert_eq!(JsonRpcErrorCode::Overloaded.code(), -32000);
        assert_eq!(JsonRpcErrorCode::NotInitialized.code(), -32002);
    }
}
