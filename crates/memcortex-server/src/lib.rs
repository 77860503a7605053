//! # memcortex-server
//!
//! MCP dispatcher, middleware, scheduler, analytics engine, and analyze-tool
//! handlers for the memcortex memory server. This crate is transport-agnostic:
//! it answers `initialize`/`tools/*`/`resources/*`/`prompts/*` requests and
//! exposes a management surface, but never opens a socket itself — that's
//! `memcortex-cli`'s job.
//!
//! ## Layout
//!
//! - [`dispatcher`] — the JSON-RPC method router and connection state machine
//! - [`analytics`] — the write-coalescing access-counter engine (C9)
//! - [`analyze`] — the analyze-tool handlers built on it (C10)
//! - [`tools`] — the memory ingest/retrieval tool handlers
//! - [`middleware`] — JWT/API-key auth and token-bucket rate limiting
//! - [`scheduler`] — worker pool, batch processor, and pipeline strategies
//! - [`metrics`] — per-endpoint latency/throughput tracking
//! - [`management`] — status/metrics payloads for the HTTP management surface
//! - [`storage`] and [`llm`] — collaborator contracts (`VectorStore`, `LlmClient`)
//! - [`config`] — server configuration and its builder

pub mod analytics;
pub mod analyze;
pub mod config;
pub mod dispatcher;
pub mod llm;
pub mod management;
pub mod metrics;
pub mod middleware;
pub mod pattern;
pub mod scheduler;
pub mod storage;
pub mod tools;

pub use analytics::{AccessMetrics, AnalyticsEngine};
pub use analyze::{AnalyzeOperation, AnalyzeToolHandler};
pub use config::{AiProvider, AiProviderConfig, SchedulerStrategy, ServerConfig, ServerConfigBuilder};
pub use dispatcher::{
    DispatchOutcome, Dispatcher, McpSession, PromptDefinition, PromptHandler, ResourceDefinition,
    ResourceHandler, ToolDefinition, ToolHandler,
};
pub use llm::{ChatMessage, Completion, LlmClient, MockLlmClient, Usage};
pub use management::{ManagementApi, MetricsReport, ServerManagementApi, StatusReport};
pub use metrics::{EndpointSnapshot, MetricsRegistry};
pub use middleware::{AuthContext, AuthMiddleware, RateLimiterRegistry};
pub use pattern::{DetectedPattern, HeuristicPatternDetector, PatternDetector, QualityReport};
pub use scheduler::RequestScheduler;
pub use storage::{InMemoryVectorStore, VectorStore};
pub use tools::memory_tools;

/// Convenience re-exports for composition roots (the `memcortex-cli` binary
/// and integration tests) that want the whole public surface in one `use`.
pub mod prelude {
    pub use crate::analyze::{AnalyzeOperation, AnalyzeToolHandler};
    pub use crate::analytics::AnalyticsEngine;
    pub use crate::config::ServerConfig;
    pub use crate::dispatcher::{Dispatcher, ToolDefinition, ToolHandler};
    pub use crate::llm::{LlmClient, MockLlmClient};
    pub use crate::management::{ManagementApi, ServerManagementApi};
    pub use crate::middleware::{AuthMiddleware, RateLimiterRegistry};
    pub use crate::pattern::{HeuristicPatternDetector, PatternDetector};
    pub use crate::storage::{InMemoryVectorStore, VectorStore};
    pub use crate::tools::memory_tools;
    pub use memcortex_protocol::{MCP_PROTOCOL_VERSION, MemoryError, MemoryResult};
}
