//! The composition root: wires every memcortex-server collaborator
//! together into one [`Dispatcher`] plus the pieces a transport needs
//! around it (auth, rate limiting, management reporting).

use std::sync::Arc;

use memcortex_server::config::{AiProvider, ServerConfig};
use memcortex_server::dispatcher::list_changed_notification;
use memcortex_server::middleware::auth::{AuthConfig, AuthMiddleware};
use memcortex_server::middleware::rate_limit::{RateLimitConfig, RateLimiterRegistry};
use memcortex_server::{
    AnalyticsEngine, AnalyzeToolHandler, Dispatcher, HeuristicPatternDetector, InMemoryVectorStore,
    MockLlmClient, RequestScheduler, ServerManagementApi, ToolHandler, memory_tools,
};
use memcortex_transport::websocket::MemoryEvent;
use memcortex_transport::ConnectionPool;

/// Everything a transport (stdio, HTTP, or the WebSocket listener) needs
/// to serve requests.
pub struct Server {
    pub dispatcher: Arc<Dispatcher>,
    /// Fronts every live `dispatcher.dispatch` call with the strategy
    /// `config.scheduler_strategy` selected.
    pub scheduler: Arc<RequestScheduler>,
    pub auth: Arc<AuthMiddleware>,
    pub rate_limiter: Arc<RateLimiterRegistry>,
    pub management: Arc<ServerManagementApi>,
    pub analytics: Arc<AnalyticsEngine>,
    /// Live WebSocket clients, shared between the raw TCP listener
    /// (`ws_listener`) and the `/ws/*` management endpoints in `http.rs`.
    pub connection_pool: Arc<ConnectionPool>,
    /// Per-endpoint counters, fed by every transport as it dispatches a
    /// request.
    pub metrics: Arc<memcortex_server::MetricsRegistry>,
}

/// Register `handler` under `name` and broadcast a `list_changed`
/// notification to connected WebSocket clients if this replaced an
/// existing registration.
fn register_tool_and_notify(
    dispatcher: &Dispatcher,
    connection_pool: &ConnectionPool,
    name: impl Into<String>,
    handler: Arc<dyn ToolHandler>,
) {
    if dispatcher.register_tool(name, handler) {
        notify_list_changed(connection_pool, "tools");
    }
}

fn notify_list_changed(connection_pool: &ConnectionPool, kind: &str) {
    let notification = list_changed_notification(kind);
    let event = MemoryEvent {
        event_type: notification.method,
        action: None,
        chunk_id: None,
        repository: None,
        session_id: None,
        data: notification.params,
        timestamp: None,
    };
    connection_pool.broadcast(&event);
}

/// Build the default server: in-memory storage, the heuristic pattern
/// detector, and a mock LLM client standing in for the out-of-scope
/// real provider integration (`config.ai_provider` only selects which
/// provider *would* be dialed; wiring a real one is left to deployments
/// that need it).
pub fn build(config: &ServerConfig) -> Server {
    if !matches!(config.ai_provider.provider, AiProvider::Mock) {
        tracing::info!(
            provider = ?config.ai_provider.provider,
            "AI provider selected but not wired; falling back to the mock LLM client"
        );
    }

    let storage = Arc::new(InMemoryVectorStore::default());
    let analytics = AnalyticsEngine::new(storage.clone(), config.analytics_flush_interval);
    let pattern_detector: Arc<HeuristicPatternDetector> = Arc::new(HeuristicPatternDetector);
    let llm = Arc::new(MockLlmClient::default());

    let connection_pool = Arc::new(ConnectionPool::new(config.websocket.max_connections));

    let dispatcher = Arc::new(Dispatcher::new("memcortex", env!("CARGO_PKG_VERSION")));
    for (name, handler) in memory_tools(storage.clone(), analytics.clone()) {
        register_tool_and_notify(&dispatcher, &connection_pool, name, handler);
    }
    for handler in AnalyzeToolHandler::all(storage, analytics.clone(), pattern_detector, llm) {
        let name = handler.definition().name;
        register_tool_and_notify(&dispatcher, &connection_pool, name, handler);
    }

    let scheduler = Arc::new(RequestScheduler::new(config.scheduler_strategy));

    let auth = Arc::new(AuthMiddleware::new(AuthConfig {
        require_auth: config.auth.required,
        ..AuthConfig::default()
    }));

    let rate_limiter = RateLimiterRegistry::new(RateLimitConfig {
        default_rate: config.rate_limit.requests_per_second as f64,
        default_burst: config.rate_limit.burst as f64,
        ttl: config.rate_limit.bucket_ttl,
        ..RateLimitConfig::default()
    });

    let metrics = Arc::new(memcortex_server::MetricsRegistry::new(
        config.websocket.max_connections,
        64,
    ));
    let management = Arc::new(ServerManagementApi::new(
        "memcortex",
        env!("CARGO_PKG_VERSION"),
        analytics.clone(),
        rate_limiter.clone(),
        metrics.clone(),
    ));

    analytics.spawn_flush_loop();
    rate_limiter.spawn_sweeper();

    Server {
        dispatcher,
        scheduler,
        auth,
        rate_limiter,
        management,
        analytics,
        connection_pool,
        metrics,
    }
}
