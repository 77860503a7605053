//! Analyze-tool handlers (C10): `detect_patterns`, `suggest_related`,
//! `analyze_quality`, `detect_conflicts`, `generate_insights`,
//! `predict_trends`.
//!
//! Each operation dispatches through the single pipeline described in
//! `spec.md` §4.8: parse params -> validate standard params -> touch
//! session bookkeeping -> retrieve the scoped chunk set -> delegate to a
//! collaborator -> assemble `{total, scope, analyzed_at, ...}`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use memcortex_protocol::{ConversationChunk, MemoryError, MemoryResult};

use crate::analytics::AnalyticsEngine;
use crate::dispatcher::handlers::{ToolDefinition, ToolHandler};
use crate::llm::LlmClient;
use crate::pattern::PatternDetector;
use crate::storage::VectorStore;

const TIMEFRAME_CLAMP: ChronoDuration = ChronoDuration::days(365);

/// One of the six analyze operations, each a separate registered tool
/// sharing this module's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzeOperation {
    DetectPatterns,
    SuggestRelated,
    AnalyzeQuality,
    DetectConflicts,
    GenerateInsights,
    PredictTrends,
}

impl AnalyzeOperation {
    /// The MCP tool name this operation registers under.
    pub fn tool_name(self) -> &'static str {
        match self {
            Self::DetectPatterns => "detect_patterns",
            Self::SuggestRelated => "suggest_related",
            Self::AnalyzeQuality => "analyze_quality",
            Self::DetectConflicts => "detect_conflicts",
            Self::GenerateInsights => "generate_insights",
            Self::PredictTrends => "predict_trends",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::DetectPatterns => "Detect recurring patterns across stored memory chunks",
            Self::SuggestRelated => "Suggest chunks related to the ones already in scope",
            Self::AnalyzeQuality => "Summarize the quality of stored memory chunks",
            Self::DetectConflicts => "Detect contradictory memory chunks",
            Self::GenerateInsights => "Generate higher-level insights from stored memory",
            Self::PredictTrends => "Predict trends from stored memory history",
        }
    }

    /// Whether this operation has real logic (`true`) or is a documented
    /// stub returning a well-typed neutral result, per `spec.md` §9's
    /// redesign flag on `handleDetectConflicts`/`handleGenerateInsights`/
    /// `handlePredictTrends`.
    fn is_stub(self) -> bool {
        matches!(self, Self::DetectConflicts | Self::GenerateInsights | Self::PredictTrends)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Session,
    Repository,
    Timeframe,
}

impl Scope {
    fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Repository => "repository",
            Self::Timeframe => "timeframe",
        }
    }
}

#[derive(Debug, Deserialize)]
struct DateRange {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeParams {
    project_id: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    date_range: Option<DateRange>,
    #[serde(default)]
    limit: Option<usize>,
}

fn parse_params(params: Option<Value>) -> MemoryResult<AnalyzeParams> {
    let params = params.ok_or_else(|| MemoryError::validation("params", "analyze tools require params"))?;
    let parsed: AnalyzeParams = serde_json::from_value(params).map_err(|e| {
        MemoryError::validation("params", format!("could not parse analyze params: {e}"))
    })?;
    if parsed.project_id.trim().is_empty() {
        return Err(MemoryError::validation("project_id", "project_id is required"));
    }
    Ok(parsed)
}

fn resolve_scope(params: &AnalyzeParams) -> MemoryResult<Scope> {
    match params.scope.as_deref() {
        Some("session") => {
            if params.session_id.as_deref().unwrap_or("").trim().is_empty() {
                return Err(MemoryError::validation(
                    "session_id",
                    "scope 'session' requires a non-empty session_id",
                ));
            }
            Ok(Scope::Session)
        }
        Some("timeframe") => Ok(Scope::Timeframe),
        Some("repository") | None => Ok(Scope::Repository),
        Some(other) => Err(MemoryError::validation("scope", format!("unknown scope '{other}'"))),
    }
}

fn clamped_date_range(range: &Option<DateRange>, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let default_from = now - TIMEFRAME_CLAMP;
    let default_to = now;
    let Some(range) = range else {
        return (default_from, default_to);
    };
    let from = range.from.max(now - TIMEFRAME_CLAMP);
    let to = range.to.min(now);
    (from, to)
}

/// Shared pipeline for all six analyze operations, parameterized by
/// which one this instance handles.
pub struct AnalyzeToolHandler {
    operation: AnalyzeOperation,
    storage: Arc<dyn VectorStore>,
    analytics: Arc<AnalyticsEngine>,
    pattern_detector: Arc<dyn PatternDetector>,
    llm: Arc<dyn LlmClient>,
}

impl AnalyzeToolHandler {
    /// Build the handler for one [`AnalyzeOperation`], sharing the
    /// storage/analytics/collaborator set every operation draws from.
    pub fn new(
        operation: AnalyzeOperation,
        storage: Arc<dyn VectorStore>,
        analytics: Arc<AnalyticsEngine>,
        pattern_detector: Arc<dyn PatternDetector>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            operation,
            storage,
            analytics,
            pattern_detector,
            llm,
        }
    }

    /// Build all six operations sharing one collaborator set, ready to
    /// register on a [`crate::dispatcher::Dispatcher`].
    pub fn all(
        storage: Arc<dyn VectorStore>,
        analytics: Arc<AnalyticsEngine>,
        pattern_detector: Arc<dyn PatternDetector>,
        llm: Arc<dyn LlmClient>,
    ) -> Vec<Arc<Self>> {
        [
            AnalyzeOperation::DetectPatterns,
            AnalyzeOperation::SuggestRelated,
            AnalyzeOperation::AnalyzeQuality,
            AnalyzeOperation::DetectConflicts,
            AnalyzeOperation::GenerateInsights,
            AnalyzeOperation::PredictTrends,
        ]
        .into_iter()
        .map(|operation| {
            Arc::new(Self::new(
                operation,
                storage.clone(),
                analytics.clone(),
                pattern_detector.clone(),
                llm.clone(),
            ))
        })
        .collect()
    }

    async fn scoped_chunks(&self, params: &AnalyzeParams, scope: Scope) -> MemoryResult<Vec<ConversationChunk>> {
        let mut chunks = self.storage.list_by_repository(&params.project_id).await?;
        match scope {
            Scope::Session => {
                let session_id = params.session_id.as_deref().unwrap_or_default();
                chunks.retain(|c| c.session_id == session_id);
            }
            Scope::Timeframe => {
                let (from, to) = clamped_date_range(&params.date_range, Utc::now());
                chunks.retain(|c| c.timestamp >= from && c.timestamp <= to);
            }
            Scope::Repository => {}
        }
        Ok(chunks)
    }

    /// Record that this session touched the analyze pipeline. Distinct
    /// from per-chunk `RecordAccess`: this is session-level bookkeeping
    /// ahead of retrieval, per `spec.md` §4.8.
    fn touch_session(&self, params: &AnalyzeParams) {
        if let Some(session_id) = &params.session_id {
            debug!(session_id, operation = self.operation.tool_name(), "analyze session bookkeeping");
        }
    }

    async fn payload(&self, chunks: &[ConversationChunk]) -> MemoryResult<Value> {
        if self.operation.is_stub() {
            // Declared input/output shape only, per spec.md §9 — the
            // source's equivalents return stubbed data.
            return Ok(match self.operation {
                AnalyzeOperation::DetectConflicts => json!({ "conflicts": [] }),
                AnalyzeOperation::GenerateInsights => json!({ "insights": [] }),
                AnalyzeOperation::PredictTrends => json!({ "trends": [] }),
                _ => unreachable!("is_stub only matches the three stub operations"),
            });
        }

        match self.operation {
            AnalyzeOperation::DetectPatterns => {
                let patterns = self.pattern_detector.detect_patterns(chunks).await?;
                Ok(json!({ "patterns": patterns }))
            }
            AnalyzeOperation::AnalyzeQuality => {
                let report = self.pattern_detector.quality_report(chunks).await?;
                Ok(json!({ "quality": report }))
            }
            AnalyzeOperation::SuggestRelated => {
                let Some(anchor) = chunks.first() else {
                    return Ok(json!({ "related": [] }));
                };
                let related = self.storage.find_similar(&anchor.id, 5).await?;
                Ok(json!({ "related": related.into_iter().map(|c| c.id).collect::<Vec<_>>() }))
            }
            _ => unreachable!("stub operations are handled above"),
        }
    }

    async fn run(&self, params: Option<Value>) -> MemoryResult<Value> {
        let params = parse_params(params)?;
        let scope = resolve_scope(&params)?;
        self.touch_session(&params);

        let mut chunks = self.scoped_chunks(&params, scope).await?;
        chunks.retain(|c| !c.is_obsolete());
        if let Some(limit) = params.limit {
            chunks.truncate(limit);
        }
        for chunk in &chunks {
            self.analytics.record_access(&chunk.id);
        }

        let total = chunks.len();
        let payload = self.payload(&chunks).await?;

        let mut response = json!({
            "total": total,
            "scope": scope.as_str(),
            "analyzed_at": Utc::now().to_rfc3339(),
        });
        if let Value::Object(map) = payload {
            response.as_object_mut().unwrap().extend(map);
        }
        Ok(response)
    }

    /// Used only by [`AnalyzeOperation::GenerateInsights`] were it not a
    /// documented stub; kept so the LLM collaborator and its 60s/3-retry
    /// contract (`spec.md` §5) have a concrete call site in this module
    /// even while the operation itself returns a neutral result.
    #[allow(dead_code)]
    async fn narrate(&self, prompt: &str) -> MemoryResult<String> {
        let messages = [crate::llm::ChatMessage::user(prompt)];
        let mut attempts = 0;
        loop {
            match tokio::time::timeout(Duration::from_secs(60), self.llm.complete(&messages, 256, 0.2)).await {
                Ok(Ok(completion)) => return Ok(completion.content),
                Ok(Err(error)) if error.is_retryable() && attempts < 3 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Ok(Err(error)) => return Err(error),
                Err(_) => return Err(MemoryError::Timeout(Duration::from_secs(60))),
            }
        }
    }
}

#[async_trait::async_trait]
impl ToolHandler for AnalyzeToolHandler {
    async fn call(&self, params: Option<Value>) -> MemoryResult<Value> {
        self.run(params).await
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.operation.tool_name().to_string(),
            description: self.operation.description().to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project_id": { "type": "string" },
                    "session_id": { "type": "string" },
                    "scope": { "type": "string", "enum": ["session", "repository", "timeframe"] },
                    "date_range": {
                        "type": "object",
                        "properties": {
                            "from": { "type": "string", "format": "date-time" },
                            "to": { "type": "string", "format": "date-time" }
                        }
                    },
                    "limit": { "type": "integer" }
                },
                "required": ["project_id"]
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::pattern::HeuristicPatternDetector;
    use crate::storage::InMemoryVectorStore;
    use memcortex_protocol::{ChunkType, ExtendedMetadata};
    use std::time::Duration as StdDuration;

    fn chunk(id: &str, repo: &str, session: &str, chunk_type: ChunkType) -> ConversationChunk {
        ConversationChunk {
            id: id.to_string(),
            repository: repo.to_string(),
            session_id: session.to_string(),
            chunk_type,
            timestamp: Utc::now(),
            tags: vec![],
            content: "content".to_string(),
            metadata: ExtendedMetadata::new(),
        }
    }

    fn handler(operation: AnalyzeOperation, storage: Arc<dyn VectorStore>) -> AnalyzeToolHandler {
        let analytics = AnalyticsEngine::new(storage.clone(), StdDuration::from_secs(30));
        AnalyzeToolHandler::new(
            operation,
            storage,
            analytics,
            Arc::new(HeuristicPatternDetector),
            Arc::new(MockLlmClient::default()),
        )
    }

    #[tokio::test]
    async fn project_id_is_required() {
        let storage: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let handler = handler(AnalyzeOperation::DetectPatterns, storage);
        let err = handler.call(Some(json!({}))).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation { .. }));
    }

    #[tokio::test]
    async fn session_scope_requires_session_id() {
        let storage: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let handler = handler(AnalyzeOperation::DetectPatterns, storage);
        let err = handler
            .call(Some(json!({ "project_id": "repo", "scope": "session" })))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation { .. }));
    }

    #[tokio::test]
    async fn detect_patterns_assembles_standard_envelope() {
        let store = InMemoryVectorStore::new();
        store.seed(chunk("a", "repo", "s1", ChunkType::Solution), vec![1.0]);
        store.seed(chunk("b", "repo", "s1", ChunkType::Solution), vec![1.0]);
        let storage: Arc<dyn VectorStore> = Arc::new(store);
        let handler = handler(AnalyzeOperation::DetectPatterns, storage);

        let result = handler.call(Some(json!({ "project_id": "repo" }))).await.unwrap();
        assert_eq!(result["total"], 2);
        assert_eq!(result["scope"], "repository");
        assert!(result["analyzed_at"].is_string());
        assert_eq!(result["patterns"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn obsolete_chunks_are_excluded_from_scope() {
        let store = InMemoryVectorStore::new();
        let mut obsolete = chunk("a", "repo", "s1", ChunkType::Solution);
        obsolete.metadata.set(memcortex_protocol::chunk::keys::IS_OBSOLETE, true);
        store.seed(obsolete, vec![1.0]);
        store.seed(chunk("b", "repo", "s1", ChunkType::Solution), vec![1.0]);
        let storage: Arc<dyn VectorStore> = Arc::new(store);
        let handler = handler(AnalyzeOperation::AnalyzeQuality, storage);

        let result = handler.call(Some(json!({ "project_id": "repo" }))).await.unwrap();
        assert_eq!(result["total"], 1);
    }

    #[tokio::test]
    async fn session_scope_filters_by_session() {
        let store = InMemoryVectorStore::new();
        store.seed(chunk("a", "repo", "s1", ChunkType::Solution), vec![1.0]);
        store.seed(chunk("b", "repo", "s2", ChunkType::Solution), vec![1.0]);
        let storage: Arc<dyn VectorStore> = Arc::new(store);
        let handler = handler(AnalyzeOperation::DetectPatterns, storage);

        let result = handler
            .call(Some(json!({ "project_id": "repo", "session_id": "s1", "scope": "session" })))
            .await
            .unwrap();
        assert_eq!(result["total"], 1);
        assert_eq!(result["scope"], "session");
    }

    #[tokio::test]
    async fn stub_operations_return_well_typed_neutral_results() {
        let storage: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        for op in [
            AnalyzeOperation::DetectConflicts,
            AnalyzeOperation::GenerateInsights,
            AnalyzeOperation::PredictTrends,
        ] {
            let handler = handler(op, storage.clone());
            let result = handler.call(Some(json!({ "project_id": "repo" }))).await.unwrap();
            assert_eq!(result["total"], 0);
        }
    }

    #[tokio::test]
    async fn timeframe_scope_clamps_to_one_year() {
        let storage: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let handler = handler(AnalyzeOperation::AnalyzeQuality, storage);
        let far_past = Utc::now() - ChronoDuration::days(3650);
        let result = handler
            .call(Some(json!({
                "project_id": "repo",
                "scope": "timeframe",
                "date_range": { "from": far_past.to_rfc3339(), "to": Utc::now().to_rfc3339() }
            })))
            .await
            .unwrap();
        assert_eq!(result["scope"], "timeframe");
    }
}
