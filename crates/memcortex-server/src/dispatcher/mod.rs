//! The MCP dispatcher (C5): method routing, the per-connection state
//! machine, and the tool/resource/prompt handler registries.
//!
//! The scheduler (C6) wraps [`Dispatcher::dispatch`] as the unit of work
//! it runs concurrently; the dispatcher itself is not concerned with
//! concurrency, only with routing and connection-state legality.

pub mod handlers;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use memcortex_protocol::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, MemoryError,
    MCP_PROTOCOL_VERSION,
};

pub use handlers::{PromptDefinition, PromptHandler, ResourceDefinition, ResourceHandler, ToolDefinition, ToolHandler};

/// The lifecycle of one connection, per `spec.md` §4.5.
///
/// `New` accepts only `initialize`. `Initializing` accepts only the
/// `notifications/initialized` acknowledgement. `Ready` accepts
/// everything else. `Closed` accepts nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Just accepted; nothing but `initialize` is legal yet.
    New,
    /// `initialize` answered; waiting for `notifications/initialized`.
    Initializing,
    /// Fully handshaked; all methods are legal.
    Ready,
    /// Torn down; no further requests are accepted.
    Closed,
}

/// Per-connection session state the dispatcher consults and advances.
pub struct McpSession {
    state: Mutex<ConnectionState>,
    client_info: Mutex<Option<Value>>,
}

impl McpSession {
    /// A freshly accepted connection, in state `New`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::New),
            client_info: Mutex::new(None),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Mark the connection closed. Idempotent.
    pub fn close(&self) {
        *self.state.lock() = ConnectionState::Closed;
    }
}

impl Default for McpSession {
    fn default() -> Self {
        Self::new()
    }
}

/// The `notifications/{kind}/list_changed` notification to broadcast
/// after a tool/resource/prompt registration changes the listing.
pub fn list_changed_notification(kind: &str) -> JsonRpcNotification {
    JsonRpcNotification::new(format!("notifications/{kind}/list_changed"), None)
}

/// The outcome of one [`Dispatcher::dispatch`] call: the response to send
/// (`None` for notifications, which never get one) plus any notifications
/// generated as a side effect of handling it (e.g. a registration landing
/// mid-flight). Callers must enqueue `notifications` ahead of `response`
/// to preserve the ordering guarantee in `spec.md` §4.5.
pub struct DispatchOutcome {
    /// The response to deliver, if this was a request (not a notification).
    pub response: Option<JsonRpcResponse>,
    /// Notifications generated while handling this message.
    pub notifications: Vec<JsonRpcNotification>,
}

impl DispatchOutcome {
    fn response_only(response: JsonRpcResponse) -> Self {
        Self {
            response: Some(response),
            notifications: Vec::new(),
        }
    }
}

/// Routes JSON-RPC requests to registered tool/resource/prompt handlers
/// and enforces the connection state machine.
pub struct Dispatcher {
    tools: DashMap<String, Arc<dyn ToolHandler>>,
    resources: DashMap<String, Arc<dyn ResourceHandler>>,
    prompts: DashMap<String, Arc<dyn PromptHandler>>,
    server_name: String,
    server_version: String,
    list_changed_seq: AtomicU64,
}

impl Dispatcher {
    /// Build an empty dispatcher identifying itself as `server_name`
    /// `server_version` in its `initialize` response.
    pub fn new(server_name: impl Into<String>, server_version: impl Into<String>) -> Self {
        Self {
            tools: DashMap::new(),
            resources: DashMap::new(),
            prompts: DashMap::new(),
            server_name: server_name.into(),
            server_version: server_version.into(),
            list_changed_seq: AtomicU64::new(0),
        }
    }

    /// Register a tool handler. A second registration under the same name
    /// replaces the first ("last writer wins") and returns `true` to
    /// signal that a `list_changed` notification should be emitted.
    pub fn register_tool(&self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> bool {
        let replaced = self.tools.insert(name.into(), handler).is_some();
        self.list_changed_seq.fetch_add(1, Ordering::Relaxed);
        replaced
    }

    /// Register a resource handler. See [`Dispatcher::register_tool`].
    pub fn register_resource(&self, uri: impl Into<String>, handler: Arc<dyn ResourceHandler>) -> bool {
        let replaced = self.resources.insert(uri.into(), handler).is_some();
        self.list_changed_seq.fetch_add(1, Ordering::Relaxed);
        replaced
    }

    /// Register a prompt handler. See [`Dispatcher::register_tool`].
    pub fn register_prompt(&self, name: impl Into<String>, handler: Arc<dyn PromptHandler>) -> bool {
        let replaced = self.prompts.insert(name.into(), handler).is_some();
        self.list_changed_seq.fetch_add(1, Ordering::Relaxed);
        replaced
    }

    /// Dispatch one already-decoded JSON-RPC request, enforcing the
    /// connection's lifecycle state.
    pub async fn dispatch(&self, session: &McpSession, request: JsonRpcRequest) -> DispatchOutcome {
        let state = session.state();
        if state == ConnectionState::Closed {
            return DispatchOutcome::response_only(JsonRpcResponse::error_response(
                JsonRpcError {
                    code: JsonRpcErrorCode::InvalidRequest.code(),
                    message: "connection is closed".to_string(),
                    data: None,
                },
                request.id,
            ));
        }

        if request.method == "initialize" {
            return self.handle_initialize(session, request);
        }

        if state != ConnectionState::Ready {
            return DispatchOutcome::response_only(JsonRpcResponse::error_response(
                JsonRpcErrorCode::NotInitialized.into(),
                request.id,
            ));
        }

        match request.method.as_str() {
            "tools/list" => self.handle_tools_list(request),
            "tools/call" => self.handle_tools_call(request).await,
            "resources/list" => self.handle_resources_list(request),
            "resources/read" => self.handle_resources_read(request).await,
            "prompts/list" => self.handle_prompts_list(request),
            "prompts/get" => self.handle_prompts_get(request).await,
            other => {
                warn!(method = other, "no handler registered for method");
                DispatchOutcome::response_only(JsonRpcResponse::error_response(
                    JsonRpcErrorCode::MethodNotFound.into(),
                    request.id,
                ))
            }
        }
    }

    /// Dispatch a notification. Only `notifications/initialized` has any
    /// effect; anything else is logged and silently dropped, per
    /// JSON-RPC's "no response expected" contract.
    pub fn dispatch_notification(&self, session: &McpSession, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                let mut state = session.state.lock();
                if *state == ConnectionState::Initializing {
                    *state = ConnectionState::Ready;
                } else {
                    debug!(?state, "initialized notification outside Initializing state, ignoring");
                }
            }
            other => debug!(method = other, "unhandled notification"),
        }
    }

    fn handle_initialize(&self, session: &McpSession, request: JsonRpcRequest) -> DispatchOutcome {
        let mut state = session.state.lock();
        if *state != ConnectionState::New {
            drop(state);
            return DispatchOutcome::response_only(JsonRpcResponse::error_response(
                JsonRpcError {
                    code: JsonRpcErrorCode::InvalidRequest.code(),
                    message: "already initialized".to_string(),
                    data: None,
                },
                request.id,
            ));
        }
        *state = ConnectionState::Initializing;
        drop(state);

        *session.client_info.lock() = request.params.clone();

        let result = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version,
            },
            "capabilities": {
                "tools": { "listChanged": true },
                "resources": { "listChanged": true },
                "prompts": { "listChanged": true },
            },
        });

        DispatchOutcome::response_only(JsonRpcResponse::success(result, request.id))
    }

    fn handle_tools_list(&self, request: JsonRpcRequest) -> DispatchOutcome {
        let tools: Vec<ToolDefinition> = self.tools.iter().map(|entry| entry.value().definition()).collect();
        DispatchOutcome::response_only(JsonRpcResponse::success(json!({ "tools": tools }), request.id))
    }

    async fn handle_tools_call(&self, request: JsonRpcRequest) -> DispatchOutcome {
        let Some(params) = request.params.clone() else {
            return self.invalid_params(request.id, "params", "tools/call requires params");
        };
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return self.invalid_params(request.id, "name", "tools/call requires a tool name");
        };

        let Some(handler) = self.tools.get(name).map(|entry| entry.value().clone()) else {
            return DispatchOutcome::response_only(JsonRpcResponse::error_response(
                JsonRpcError::from(MemoryError::NotFound(format!("tool '{name}'"))),
                request.id,
            ));
        };

        let call_params = params.get("arguments").cloned();
        match handler.call(call_params).await {
            Ok(result) => DispatchOutcome::response_only(JsonRpcResponse::success(result, request.id)),
            Err(error) => DispatchOutcome::response_only(JsonRpcResponse::error_response(error.into(), request.id)),
        }
    }

    fn handle_resources_list(&self, request: JsonRpcRequest) -> DispatchOutcome {
        let resources: Vec<ResourceDefinition> =
            self.resources.iter().map(|entry| entry.value().definition()).collect();
        DispatchOutcome::response_only(JsonRpcResponse::success(json!({ "resources": resources }), request.id))
    }

    async fn handle_resources_read(&self, request: JsonRpcRequest) -> DispatchOutcome {
        let Some(params) = request.params.clone() else {
            return self.invalid_params(request.id, "uri", "resources/read requires params");
        };
        let Some(uri) = params.get("uri").and_then(Value::as_str) else {
            return self.invalid_params(request.id, "uri", "resources/read requires a uri");
        };

        let Some(handler) = self.resources.get(uri).map(|entry| entry.value().clone()) else {
            return DispatchOutcome::response_only(JsonRpcResponse::error_response(
                JsonRpcError::from(MemoryError::NotFound(format!("resource '{uri}'"))),
                request.id,
            ));
        };

        match handler.read(uri).await {
            Ok(result) => DispatchOutcome::response_only(JsonRpcResponse::success(result, request.id)),
            Err(error) => DispatchOutcome::response_only(JsonRpcResponse::error_response(error.into(), request.id)),
        }
    }

    fn handle_prompts_list(&self, request: JsonRpcRequest) -> DispatchOutcome {
        let prompts: Vec<PromptDefinition> = self.prompts.iter().map(|entry| entry.value().definition()).collect();
        DispatchOutcome::response_only(JsonRpcResponse::success(json!({ "prompts": prompts }), request.id))
    }

    async fn handle_prompts_get(&self, request: JsonRpcRequest) -> DispatchOutcome {
        let Some(params) = request.params.clone() else {
            return self.invalid_params(request.id, "name", "prompts/get requires params");
        };
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return self.invalid_params(request.id, "name", "prompts/get requires a name");
        };

        let Some(handler) = self.prompts.get(name).map(|entry| entry.value().clone()) else {
            return DispatchOutcome::response_only(JsonRpcResponse::error_response(
                JsonRpcError::from(MemoryError::NotFound(format!("prompt '{name}'"))),
                request.id,
            ));
        };

        let prompt_args = params.get("arguments").cloned();
        match handler.get(prompt_args).await {
            Ok(result) => DispatchOutcome::response_only(JsonRpcResponse::success(result, request.id)),
            Err(error) => DispatchOutcome::response_only(JsonRpcResponse::error_response(error.into(), request.id)),
        }
    }

    fn invalid_params(
        &self,
        id: memcortex_protocol::RequestId,
        field: &str,
        message: &str,
    ) -> DispatchOutcome {
        DispatchOutcome::response_only(JsonRpcResponse::error_response(
            JsonRpcError::from(MemoryError::validation(field, message)),
            id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memcortex_protocol::{MemoryResult, RequestId};

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, params: Option<Value>) -> MemoryResult<Value> {
            Ok(params.unwrap_or(Value::Null))
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "echoes its arguments".to_string(),
                input_schema: json!({ "type": "object" }),
            }
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        async fn call(&self, _params: Option<Value>) -> MemoryResult<Value> {
            Err(MemoryError::NotFound("nothing here".to_string()))
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "fails".to_string(),
                description: "always fails".to_string(),
                input_schema: json!({ "type": "object" }),
            }
        }
    }

    fn dispatcher_with_echo() -> Dispatcher {
        let dispatcher = Dispatcher::new("memcortex", "0.1.0");
        dispatcher.register_tool("echo", Arc::new(EchoTool));
        dispatcher.register_tool("fails", Arc::new(FailingTool));
        dispatcher
    }

    async fn ready_session(dispatcher: &Dispatcher) -> McpSession {
        let session = McpSession::new();
        let init = JsonRpcRequest::new("initialize", None, RequestId::from(1i64));
        dispatcher.dispatch(&session, init).await;
        dispatcher.dispatch_notification(&session, JsonRpcNotification::new("notifications/initialized", None));
        session
    }

    #[tokio::test]
    async fn requests_before_initialize_are_rejected() {
        let dispatcher = dispatcher_with_echo();
        let session = McpSession::new();
        let outcome = dispatcher
            .dispatch(&session, JsonRpcRequest::new("tools/list", None, RequestId::from(1i64)))
            .await;
        let response = outcome.response.unwrap();
        assert_eq!(response.error().unwrap().code, JsonRpcErrorCode::NotInitialized.code());
    }

    #[tokio::test]
    async fn double_initialize_is_a_conflict() {
        let dispatcher = dispatcher_with_echo();
        let session = McpSession::new();
        dispatcher
            .dispatch(&session, JsonRpcRequest::new("initialize", None, RequestId::from(1i64)))
            .await;
        let second = dispatcher
            .dispatch(&session, JsonRpcRequest::new("initialize", None, RequestId::from(2i64)))
            .await;
        assert_eq!(
            second.response.unwrap().error().unwrap().code,
            JsonRpcErrorCode::InvalidRequest.code()
        );
    }

    #[tokio::test]
    async fn full_handshake_then_tools_list_succeeds() {
        let dispatcher = dispatcher_with_echo();
        let session = ready_session(&dispatcher).await;
        assert_eq!(session.state(), ConnectionState::Ready);

        let outcome = dispatcher
            .dispatch(&session, JsonRpcRequest::new("tools/list", None, RequestId::from(3i64)))
            .await;
        let response = outcome.response.unwrap();
        let tools = response.result().unwrap()["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
    }

    #[tokio::test]
    async fn tools_call_routes_to_the_named_handler() {
        let dispatcher = dispatcher_with_echo();
        let session = ready_session(&dispatcher).await;

        let params = json!({ "name": "echo", "arguments": { "x": 1 } });
        let outcome = dispatcher
            .dispatch(&session, JsonRpcRequest::new("tools/call", Some(params), RequestId::from(4i64)))
            .await;
        let response = outcome.response.unwrap();
        assert_eq!(response.result().unwrap()["x"], 1);
    }

    #[tokio::test]
    async fn tools_call_on_unknown_tool_is_not_found() {
        let dispatcher = dispatcher_with_echo();
        let session = ready_session(&dispatcher).await;

        let params = json!({ "name": "nonexistent" });
        let outcome = dispatcher
            .dispatch(&session, JsonRpcRequest::new("tools/call", Some(params), RequestId::from(5i64)))
            .await;
        assert_eq!(outcome.response.unwrap().error().unwrap().code, -32001);
    }

    #[tokio::test]
    async fn tool_handler_error_propagates_as_jsonrpc_error() {
        let dispatcher = dispatcher_with_echo();
        let session = ready_session(&dispatcher).await;

        let params = json!({ "name": "fails" });
        let outcome = dispatcher
            .dispatch(&session, JsonRpcRequest::new("tools/call", Some(params), RequestId::from(6i64)))
            .await;
        assert_eq!(outcome.response.unwrap().error().unwrap().code, -32001);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let dispatcher = dispatcher_with_echo();
        let session = ready_session(&dispatcher).await;

        let outcome = dispatcher
            .dispatch(&session, JsonRpcRequest::new("nonexistent/method", None, RequestId::from(7i64)))
            .await;
        assert_eq!(
            outcome.response.unwrap().error().unwrap().code,
            JsonRpcErrorCode::MethodNotFound.code()
        );
    }

    #[tokio::test]
    async fn requests_after_close_are_rejected() {
        let dispatcher = dispatcher_with_echo();
        let session = ready_session(&dispatcher).await;
        session.close();

        let outcome = dispatcher
            .dispatch(&session, JsonRpcRequest::new("tools/list", None, RequestId::from(8i64)))
            .await;
        assert_eq!(
            outcome.response.unwrap().error().unwrap().code,
            JsonRpcErrorCode::InvalidRequest.code()
        );
    }

    #[test]
    fn last_writer_wins_on_duplicate_registration() {
        let dispatcher = dispatcher_with_echo();
        let replaced = dispatcher.register_tool("echo", Arc::new(EchoTool));
        assert!(replaced);
    }
}
