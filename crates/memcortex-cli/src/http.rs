//! The HTTP transport: a single JSON-RPC POST endpoint plus the
//! management surface (`/status`, `/metrics`, `/ws/status`,
//! `/ws/metrics`, `/ws/health`, `/ws/connections`, `/ws/broadcast`), via
//! axum. One [`McpSession`] per request — the HTTP transport does not
//! keep a connection-scoped handshake, so every call walks `initialize`
//! through `tools/call` within a single request. The `/ws` upgrade
//! itself is served separately by `ws_listener`, not this router.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use memcortex_protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use memcortex_server::middleware::auth::Credentials;
use memcortex_server::middleware::rate_limit::{build_identifier, IdentifierDimensions};
use memcortex_server::{ManagementApi, McpSession, MetricsReport, StatusReport};
use memcortex_transport::websocket::{MemoryEvent, PoolMetrics};
use serde::Serialize;
use tracing::error;

use crate::composition::Server;

pub fn router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws/status", get(ws_status_handler))
        .route("/ws/metrics", get(ws_metrics_handler))
        .route("/ws/health", get(ws_health_handler))
        .route("/ws/connections", get(ws_connections_handler))
        .route("/ws/broadcast", post(ws_broadcast_handler))
        .with_state(server)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// One-shot JSON-RPC handling: authenticate, rate-limit, then walk
/// `initialize` through the real request, so a stateless HTTP client can
/// call a tool in a single POST.
async fn rpc_handler(
    State(server): State<Arc<Server>>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    let started = Instant::now();
    let method = request.method.clone();
    let request_bytes = serde_json::to_vec(&request).map(|bytes| bytes.len()).unwrap_or(0);

    let credentials = Credentials::from_headers(header_str(&headers, "authorization"), header_str(&headers, "x-api-key"));
    let auth_ctx = match server.auth.authenticate(&credentials) {
        Ok(ctx) => ctx,
        Err(error) => {
            let response = JsonRpcResponse::error_response(JsonRpcError::from(&error), request.id);
            record(&server, &method, started, request_bytes, &response);
            return Json(response);
        }
    };

    let identifier = build_identifier(
        IdentifierDimensions { per_user: true, per_ip: false },
        auth_ctx.as_ref().map(|ctx| ctx.user.id.as_str()),
        None,
    );
    if let Err(error) = server.rate_limiter.check(identifier.as_deref(), 1.0) {
        let response = JsonRpcResponse::error_response(JsonRpcError::from(&error), request.id);
        record(&server, &method, started, request_bytes, &response);
        return Json(response);
    }

    let session = Arc::new(McpSession::new());
    let request_id = request.id.clone();
    let init = JsonRpcRequest::new("initialize", None, request.id.clone());
    server.dispatcher.dispatch(&session, init).await;
    server
        .dispatcher
        .dispatch_notification(&session, JsonRpcNotification::new("notifications/initialized", None));

    let response = match server.scheduler.schedule(server.dispatcher.clone(), session, request).await {
        Ok(outcome) => outcome.response.unwrap_or_else(|| {
            JsonRpcResponse::parse_error(Some(
                "notifications are not meaningful over the one-shot HTTP transport".to_string(),
            ))
        }),
        Err(error) => JsonRpcResponse::error_response(error.into(), request_id),
    };
    record(&server, &method, started, request_bytes, &response);
    Json(response)
}

fn record(server: &Server, method: &str, started: Instant, request_bytes: usize, response: &JsonRpcResponse) {
    let response_bytes = serde_json::to_vec(response).map(|bytes| bytes.len()).unwrap_or(0);
    server
        .metrics
        .record(method, started.elapsed(), request_bytes, response_bytes, response.is_error());
}

async fn status_handler(State(server): State<Arc<Server>>) -> Result<Json<StatusReport>, StatusCode> {
    server.management.status().await.map(Json).map_err(|error| {
        error!(%error, "status report failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn metrics_handler(State(server): State<Arc<Server>>) -> Result<Json<MetricsReport>, StatusCode> {
    server.management.metrics().await.map(Json).map_err(|error| {
        error!(%error, "metrics report failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[derive(Debug, Serialize)]
struct WsStatus {
    active_connections: usize,
    capacity: usize,
}

async fn ws_status_handler(State(server): State<Arc<Server>>) -> Json<WsStatus> {
    let metrics = server.connection_pool.metrics();
    Json(WsStatus {
        active_connections: metrics.active,
        capacity: metrics.active + metrics.available_capacity,
    })
}

async fn ws_metrics_handler(State(server): State<Arc<Server>>) -> Json<PoolMetrics> {
    Json(server.connection_pool.metrics())
}

#[derive(Debug, Serialize)]
struct WsHealth {
    healthy: bool,
}

async fn ws_health_handler(State(_server): State<Arc<Server>>) -> Json<WsHealth> {
    Json(WsHealth { healthy: true })
}

#[derive(Debug, Serialize)]
struct ConnectionSummary {
    id: String,
    repository: String,
    session_id: String,
    laggy: bool,
}

async fn ws_connections_handler(State(server): State<Arc<Server>>) -> Json<Vec<ConnectionSummary>> {
    let connections = server
        .connection_pool
        .get_all()
        .into_iter()
        .map(|client| ConnectionSummary {
            id: client.id.clone(),
            repository: client.repository.clone(),
            session_id: client.session_id.clone(),
            laggy: client.is_laggy(),
        })
        .collect();
    Json(connections)
}

#[derive(Debug, Serialize)]
struct WsBroadcastResult {
    delivered: usize,
}

async fn ws_broadcast_handler(
    State(server): State<Arc<Server>>,
    Json(event): Json<MemoryEvent>,
) -> Json<WsBroadcastResult> {
    let delivered = server.connection_pool.broadcast(&event);
    Json(WsBroadcastResult { delivered })
}
