//! Memory ingest/retrieval tool handlers: the `ToolHandler` registrations
//! backing chunk storage, access/usage bookkeeping, and top-memory
//! ranking, fronted by the analytics engine (C9) and the storage
//! collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use memcortex_protocol::{ChunkType, ConversationChunk, ExtendedMetadata, MemoryError, MemoryResult};

use crate::analytics::AnalyticsEngine;
use crate::dispatcher::handlers::{ToolDefinition, ToolHandler};
use crate::storage::VectorStore;

fn require_params(params: Option<Value>) -> MemoryResult<Value> {
    params.ok_or_else(|| MemoryError::validation("params", "this tool requires params"))
}

fn require_string(params: &Value, field: &str) -> MemoryResult<String> {
    params
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| MemoryError::validation(field, format!("{field} is required")))
}

/// Stores a new chunk, embedding included, into the vector store.
pub struct StoreChunkTool {
    storage: Arc<dyn VectorStore>,
}

impl StoreChunkTool {
    /// Build the tool over `storage`.
    pub fn new(storage: Arc<dyn VectorStore>) -> Self {
        Self { storage }
    }
}

#[derive(Deserialize)]
struct StoreChunkParams {
    repository: String,
    session_id: String,
    #[serde(rename = "type")]
    chunk_type: ChunkType,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[async_trait]
impl ToolHandler for StoreChunkTool {
    async fn call(&self, params: Option<Value>) -> MemoryResult<Value> {
        let params = require_params(params)?;
        let parsed: StoreChunkParams = serde_json::from_value(params)
            .map_err(|e| MemoryError::validation("params", format!("invalid store_chunk params: {e}")))?;

        let chunk = ConversationChunk {
            id: Uuid::new_v4().to_string(),
            repository: parsed.repository,
            session_id: parsed.session_id,
            chunk_type: parsed.chunk_type,
            timestamp: chrono::Utc::now(),
            tags: parsed.tags,
            content: parsed.content,
            metadata: ExtendedMetadata::new(),
        };

        self.storage.batch_store(vec![chunk.clone()]).await?;
        Ok(json!({ "id": chunk.id }))
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "store_chunk".to_string(),
            description: "Store a new conversation chunk".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repository": { "type": "string" },
                    "session_id": { "type": "string" },
                    "type": { "type": "string" },
                    "content": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["repository", "session_id", "type", "content"]
            }),
        }
    }
}

/// Records a single access against a chunk's pending analytics.
pub struct RecordAccessTool {
    analytics: Arc<AnalyticsEngine>,
}

impl RecordAccessTool {
    /// Build the tool over `analytics`.
    pub fn new(analytics: Arc<AnalyticsEngine>) -> Self {
        Self { analytics }
    }
}

#[async_trait]
impl ToolHandler for RecordAccessTool {
    async fn call(&self, params: Option<Value>) -> MemoryResult<Value> {
        let params = require_params(params)?;
        let chunk_id = require_string(&params, "chunk_id")?;
        self.analytics.record_access(&chunk_id);
        Ok(json!({ "recorded": true }))
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "record_access".to_string(),
            description: "Record a single access against a chunk".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "chunk_id": { "type": "string" } },
                "required": ["chunk_id"]
            }),
        }
    }
}

/// Records a use of a chunk, successful or not.
pub struct RecordUsageTool {
    analytics: Arc<AnalyticsEngine>,
}

impl RecordUsageTool {
    /// Build the tool over `analytics`.
    pub fn new(analytics: Arc<AnalyticsEngine>) -> Self {
        Self { analytics }
    }
}

#[async_trait]
impl ToolHandler for RecordUsageTool {
    async fn call(&self, params: Option<Value>) -> MemoryResult<Value> {
        let params = require_params(params)?;
        let chunk_id = require_string(&params, "chunk_id")?;
        let successful = params
            .get("successful")
            .and_then(Value::as_bool)
            .ok_or_else(|| MemoryError::validation("successful", "successful is required"))?;
        self.analytics.record_usage(&chunk_id, successful);
        Ok(json!({ "recorded": true }))
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "record_usage".to_string(),
            description: "Record a use of a chunk, successful or not".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "chunk_id": { "type": "string" },
                    "successful": { "type": "boolean" }
                },
                "required": ["chunk_id", "successful"]
            }),
        }
    }
}

/// Marks a chunk obsolete, excluding it from future top-memory ranking.
pub struct MarkObsoleteTool {
    analytics: Arc<AnalyticsEngine>,
}

impl MarkObsoleteTool {
    /// Build the tool over `analytics`.
    pub fn new(analytics: Arc<AnalyticsEngine>) -> Self {
        Self { analytics }
    }
}

#[async_trait]
impl ToolHandler for MarkObsoleteTool {
    async fn call(&self, params: Option<Value>) -> MemoryResult<Value> {
        let params = require_params(params)?;
        let chunk_id = require_string(&params, "chunk_id")?;
        let reason = params.get("reason").and_then(Value::as_str).unwrap_or("").to_string();
        self.analytics.mark_obsolete(&chunk_id, &reason).await?;
        Ok(json!({ "marked_obsolete": true }))
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "mark_obsolete".to_string(),
            description: "Mark a chunk obsolete".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "chunk_id": { "type": "string" },
                    "reason": { "type": "string" }
                },
                "required": ["chunk_id"]
            }),
        }
    }
}

/// Lists the top-scoring, non-obsolete chunks in a repository.
pub struct GetTopMemoriesTool {
    analytics: Arc<AnalyticsEngine>,
}

impl GetTopMemoriesTool {
    /// Build the tool over `analytics`.
    pub fn new(analytics: Arc<AnalyticsEngine>) -> Self {
        Self { analytics }
    }
}

#[async_trait]
impl ToolHandler for GetTopMemoriesTool {
    async fn call(&self, params: Option<Value>) -> MemoryResult<Value> {
        let params = require_params(params)?;
        let repository = require_string(&params, "repository")?;
        let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
        let chunks = self.analytics.get_top_memories(&repository, limit).await?;
        Ok(json!({ "chunks": chunks }))
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_top_memories".to_string(),
            description: "List the top-scoring non-obsolete chunks in a repository".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repository": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["repository"]
            }),
        }
    }
}

/// Semantic search within a repository by embedding similarity.
pub struct SearchChunksTool {
    storage: Arc<dyn VectorStore>,
}

impl SearchChunksTool {
    /// Build the tool over `storage`.
    pub fn new(storage: Arc<dyn VectorStore>) -> Self {
        Self { storage }
    }
}

#[derive(Deserialize)]
struct SearchChunksParams {
    repository: String,
    query_embedding: Vec<f32>,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    10
}

#[async_trait]
impl ToolHandler for SearchChunksTool {
    async fn call(&self, params: Option<Value>) -> MemoryResult<Value> {
        let params = require_params(params)?;
        let parsed: SearchChunksParams = serde_json::from_value(params)
            .map_err(|e| MemoryError::validation("params", format!("invalid search_chunks params: {e}")))?;
        let chunks = self
            .storage
            .search(&parsed.repository, &parsed.query_embedding, parsed.limit)
            .await?;
        Ok(json!({ "chunks": chunks }))
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_chunks".to_string(),
            description: "Semantic search within a repository by embedding similarity".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repository": { "type": "string" },
                    "query_embedding": { "type": "array", "items": { "type": "number" } },
                    "limit": { "type": "integer" }
                },
                "required": ["repository", "query_embedding"]
            }),
        }
    }
}

/// Build every memory tool sharing one storage/analytics pair, ready to
/// register on a [`crate::dispatcher::Dispatcher`].
pub fn memory_tools(
    storage: Arc<dyn VectorStore>,
    analytics: Arc<AnalyticsEngine>,
) -> Vec<(&'static str, Arc<dyn ToolHandler>)> {
    vec![
        ("store_chunk", Arc::new(StoreChunkTool::new(storage.clone()))),
        ("record_access", Arc::new(RecordAccessTool::new(analytics.clone()))),
        ("record_usage", Arc::new(RecordUsageTool::new(analytics.clone()))),
        ("mark_obsolete", Arc::new(MarkObsoleteTool::new(analytics.clone()))),
        ("get_top_memories", Arc::new(GetTopMemoriesTool::new(analytics))),
        ("search_chunks", Arc::new(SearchChunksTool::new(storage))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryVectorStore;
    use std::time::Duration;

    fn engine(storage: Arc<dyn VectorStore>) -> Arc<AnalyticsEngine> {
        AnalyticsEngine::new(storage, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn store_chunk_requires_fields() {
        let storage: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let tool = StoreChunkTool::new(storage);
        let err = tool.call(Some(json!({ "repository": "r" }))).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation { .. }));
    }

    #[tokio::test]
    async fn store_chunk_persists_and_returns_id() {
        let storage: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let tool = StoreChunkTool::new(storage.clone());
        let result = tool
            .call(Some(json!({
                "repository": "repo",
                "session_id": "s1",
                "type": "solution",
                "content": "fixed it"
            })))
            .await
            .unwrap();
        let id = result["id"].as_str().unwrap();
        assert!(storage.get_by_id(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn record_access_then_flush_persists_count() {
        let store = InMemoryVectorStore::new();
        store.seed(
            ConversationChunk {
                id: "c1".to_string(),
                repository: "repo".to_string(),
                session_id: "s1".to_string(),
                chunk_type: ChunkType::Solution,
                timestamp: chrono::Utc::now(),
                tags: vec![],
                content: "x".to_string(),
                metadata: ExtendedMetadata::new(),
            },
            vec![1.0],
        );
        let storage: Arc<dyn VectorStore> = Arc::new(store);
        let analytics = engine(storage.clone());
        let tool = RecordAccessTool::new(analytics.clone());
        tool.call(Some(json!({ "chunk_id": "c1" }))).await.unwrap();
        analytics.flush().await;
        let persisted = storage.get_by_id("c1").await.unwrap().unwrap();
        assert_eq!(persisted.metadata.access_count(), Some(1));
    }

    #[tokio::test]
    async fn mark_obsolete_tool_marks_the_chunk() {
        let store = InMemoryVectorStore::new();
        store.seed(
            ConversationChunk {
                id: "c1".to_string(),
                repository: "repo".to_string(),
                session_id: "s1".to_string(),
                chunk_type: ChunkType::Solution,
                timestamp: chrono::Utc::now(),
                tags: vec![],
                content: "x".to_string(),
                metadata: ExtendedMetadata::new(),
            },
            vec![1.0],
        );
        let storage: Arc<dyn VectorStore> = Arc::new(store);
        let analytics = engine(storage.clone());
        let tool = MarkObsoleteTool::new(analytics);
        tool.call(Some(json!({ "chunk_id": "c1", "reason": "superseded" }))).await.unwrap();
        let persisted = storage.get_by_id("c1").await.unwrap().unwrap();
        assert!(persisted.is_obsolete());
    }

    #[tokio::test]
    async fn get_top_memories_tool_honors_limit() {
        let store = InMemoryVectorStore::new();
        for i in 0..5 {
            store.seed(
                ConversationChunk {
                    id: format!("c{i}"),
                    repository: "repo".to_string(),
                    session_id: "s1".to_string(),
                    chunk_type: ChunkType::Solution,
                    timestamp: chrono::Utc::now(),
                    tags: vec![],
                    content: "x".to_string(),
                    metadata: ExtendedMetadata::new(),
                },
                vec![1.0],
            );
        }
        let storage: Arc<dyn VectorStore> = Arc::new(store);
        let analytics = engine(storage);
        let tool = GetTopMemoriesTool::new(analytics);
        let result = tool.call(Some(json!({ "repository": "repo", "limit": 2 }))).await.unwrap();
        assert_eq!(result["chunks"].as_array().unwrap().len(), 2);
    }
}
