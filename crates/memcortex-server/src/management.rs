//! Management surface: status and metrics payloads exposed over HTTP.
//!
//! The actual router (axum routes, auth extraction, listener binding) lives
//! in the `memcortex-cli` crate — this module only owns the shapes and the
//! trait a composition root implements to answer them, so the payloads stay
//! testable without standing up a transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use memcortex_protocol::{MCP_PROTOCOL_VERSION, MemoryResult};

use crate::analytics::AnalyticsEngine;
use crate::metrics::MetricsRegistry;
use crate::middleware::rate_limit::RateLimiterRegistry;

/// Server health, as reported by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub protocol_version: String,
    pub server_name: String,
    pub server_version: String,
    pub uptime_secs: u64,
    pub active_rate_limit_buckets: usize,
    pub pending_analytics_writes: usize,
}

/// Endpoint latency/throughput snapshot, as reported by `GET /metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub endpoints: HashMap<String, crate::metrics::EndpointSnapshot>,
}

/// What a composition root must supply to answer management requests.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    async fn status(&self) -> MemoryResult<StatusReport>;
    async fn metrics(&self) -> MemoryResult<MetricsReport>;
}

/// The default [`ManagementApi`], built from the same collaborators the
/// dispatcher and tool handlers share.
pub struct ServerManagementApi {
    server_name: String,
    server_version: String,
    started_at: Instant,
    analytics: Arc<AnalyticsEngine>,
    rate_limiter: Arc<RateLimiterRegistry>,
    metrics: Arc<MetricsRegistry>,
}

impl ServerManagementApi {
    pub fn new(
        server_name: impl Into<String>,
        server_version: impl Into<String>,
        analytics: Arc<AnalyticsEngine>,
        rate_limiter: Arc<RateLimiterRegistry>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            server_version: server_version.into(),
            started_at: Instant::now(),
            analytics,
            rate_limiter,
            metrics,
        }
    }
}

#[async_trait]
impl ManagementApi for ServerManagementApi {
    async fn status(&self) -> MemoryResult<StatusReport> {
        Ok(StatusReport {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            server_name: self.server_name.clone(),
            server_version: self.server_version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            active_rate_limit_buckets: self.rate_limiter.len(),
            pending_analytics_writes: self.analytics.pending_len(),
        })
    }

    async fn metrics(&self) -> MemoryResult<MetricsReport> {
        Ok(MetricsReport {
            endpoints: self.metrics.snapshot_all(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::rate_limit::RateLimitConfig;
    use crate::storage::InMemoryVectorStore;

    fn api() -> ServerManagementApi {
        let storage = Arc::new(InMemoryVectorStore::default());
        let analytics = AnalyticsEngine::new(storage, std::time::Duration::from_secs(30));
        let rate_limiter = RateLimiterRegistry::new(RateLimitConfig::default());
        let metrics = Arc::new(MetricsRegistry::new(100, 32));
        ServerManagementApi::new("memcortex", "0.1.0", analytics, rate_limiter, metrics)
    }

    #[tokio::test]
    async fn status_reports_the_negotiated_protocol_version() {
        let report = api().status().await.unwrap();
        assert_eq!(report.protocol_version, MCP_PROTOCOL_VERSION);
        assert_eq!(report.server_name, "memcortex");
    }

    #[tokio::test]
    async fn metrics_starts_empty() {
        let report = api().metrics().await.unwrap();
        assert!(report.endpoints.is_empty());
    }
}
