//! The `VectorStore` collaborator contract.
//!
//! Storage itself is out of scope (`spec.md` §1): this module only
//! defines the trait the analytics engine and analyze-tool handlers
//! depend on, plus an in-memory mock so those subsystems can be
//! exercised end-to-end in tests without a real backend.

use async_trait::async_trait;
use dashmap::DashMap;

use memcortex_protocol::{ConversationChunk, MemoryError, MemoryResult};

/// Storage backend for conversation chunks and their embeddings.
///
/// Every `ConversationChunk` is exclusively owned by whatever implements
/// this trait; callers only ever see borrowed copies.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Fetch a single chunk by id.
    async fn get_by_id(&self, id: &str) -> MemoryResult<Option<ConversationChunk>>;

    /// Persist a full chunk update (used by the analytics engine after
    /// recomputing metadata, and by obsoletion).
    async fn update(&self, chunk: &ConversationChunk) -> MemoryResult<()>;

    /// List every chunk belonging to `repository`.
    async fn list_by_repository(&self, repository: &str) -> MemoryResult<Vec<ConversationChunk>>;

    /// Semantic search within `repository` by embedding similarity.
    async fn search(
        &self,
        repository: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> MemoryResult<Vec<ConversationChunk>>;

    /// Chunks most similar to an existing chunk, excluding itself.
    async fn find_similar(&self, chunk_id: &str, limit: usize) -> MemoryResult<Vec<ConversationChunk>>;

    /// Insert or replace many chunks in one call.
    async fn batch_store(&self, chunks: Vec<ConversationChunk>) -> MemoryResult<()>;

    /// Delete many chunks by id in one call.
    async fn batch_delete(&self, ids: &[String]) -> MemoryResult<()>;

    /// Repository-scoped cleanup (the only path that may delete chunks
    /// outside explicit `batch_delete`). Returns the number removed.
    async fn cleanup(&self, repository: &str) -> MemoryResult<u64>;

    /// Liveness check used by the management `/ws/health` surface.
    async fn health_check(&self) -> MemoryResult<()>;
}

/// An in-memory `VectorStore` used by tests and by the mock composition
/// root. Carries no production logic: similarity search is a naive
/// dot-product scan, fine for exercising the analytics engine and
/// analyze-tool handlers but not a real backend.
#[derive(Default)]
pub struct InMemoryVectorStore {
    chunks: DashMap<String, ConversationChunk>,
    embeddings: DashMap<String, Vec<f32>>,
}

impl InMemoryVectorStore {
    /// Build an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a chunk and its embedding (test convenience;
    /// production stores populate via `batch_store`).
    pub fn seed(&self, chunk: ConversationChunk, embedding: Vec<f32>) {
        self.embeddings.insert(chunk.id.clone(), embedding);
        self.chunks.insert(chunk.id.clone(), chunk);
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len().min(b.len());
        if len == 0 {
            return 0.0;
        }
        let dot: f32 = a[..len].iter().zip(&b[..len]).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a[..len].iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b[..len].iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn get_by_id(&self, id: &str) -> MemoryResult<Option<ConversationChunk>> {
        Ok(self.chunks.get(id).map(|e| e.value().clone()))
    }

    async fn update(&self, chunk: &ConversationChunk) -> MemoryResult<()> {
        if !self.chunks.contains_key(&chunk.id) {
            return Err(MemoryError::NotFound(chunk.id.clone()));
        }
        self.chunks.insert(chunk.id.clone(), chunk.clone());
        Ok(())
    }

    async fn list_by_repository(&self, repository: &str) -> MemoryResult<Vec<ConversationChunk>> {
        Ok(self
            .chunks
            .iter()
            .filter(|e| e.value().repository == repository)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn search(
        &self,
        repository: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> MemoryResult<Vec<ConversationChunk>> {
        let mut scored: Vec<(f32, ConversationChunk)> = self
            .chunks
            .iter()
            .filter(|e| e.value().repository == repository)
            .filter_map(|e| {
                let embedding = self.embeddings.get(e.key())?;
                Some((Self::cosine(query_embedding, &embedding), e.value().clone()))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(limit).map(|(_, c)| c).collect())
    }

    async fn find_similar(&self, chunk_id: &str, limit: usize) -> MemoryResult<Vec<ConversationChunk>> {
        let Some(embedding) = self.embeddings.get(chunk_id).map(|e| e.clone()) else {
            return Ok(Vec::new());
        };
        let Some(origin) = self.chunks.get(chunk_id).map(|e| e.value().repository.clone()) else {
            return Ok(Vec::new());
        };
        let mut results = self.search(&origin, &embedding, limit + 1).await?;
        results.retain(|c| c.id != chunk_id);
        results.truncate(limit);
        Ok(results)
    }

    async fn batch_store(&self, chunks: Vec<ConversationChunk>) -> MemoryResult<()> {
        for chunk in chunks {
            self.chunks.insert(chunk.id.clone(), chunk);
        }
        Ok(())
    }

    async fn batch_delete(&self, ids: &[String]) -> MemoryResult<()> {
        for id in ids {
            self.chunks.remove(id);
            self.embeddings.remove(id);
        }
        Ok(())
    }

    async fn cleanup(&self, repository: &str) -> MemoryResult<u64> {
        let ids: Vec<String> = self
            .chunks
            .iter()
            .filter(|e| e.value().repository == repository)
            .map(|e| e.key().clone())
            .collect();
        let count = ids.len() as u64;
        self.batch_delete(&ids).await?;
        Ok(count)
    }

    async fn health_check(&self) -> MemoryResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use memcortex_protocol::{ChunkType, ExtendedMetadata};

    fn chunk(id: &str, repo: &str) -> ConversationChunk {
        ConversationChunk {
            id: id.to_string(),
            repository: repo.to_string(),
            session_id: "s1".to_string(),
            chunk_type: ChunkType::Solution,
            timestamp: Utc::now(),
            tags: vec![],
            content: "content".to_string(),
            metadata: ExtendedMetadata::new(),
        }
    }

    #[tokio::test]
    async fn update_rejects_unknown_chunk() {
        let store = InMemoryVectorStore::new();
        let err = store.update(&chunk("missing", "repo")).await.unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_by_repository_scopes_correctly() {
        let store = InMemoryVectorStore::new();
        store.seed(chunk("a", "repo1"), vec![1.0, 0.0]);
        store.seed(chunk("b", "repo2"), vec![0.0, 1.0]);
        let listed = store.list_by_repository("repo1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "a");
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let store = InMemoryVectorStore::new();
        store.seed(chunk("close", "repo"), vec![1.0, 0.0]);
        store.seed(chunk("far", "repo"), vec![0.0, 1.0]);
        let results = store.search("repo", &[0.9, 0.1], 2).await.unwrap();
        assert_eq!(results[0].id, "close");
    }

    #[tokio::test]
    async fn cleanup_removes_only_the_named_repository() {
        let store = InMemoryVectorStore::new();
        store.seed(chunk("a", "repo1"), vec![1.0]);
        store.seed(chunk("b", "repo2"), vec![1.0]);
        let removed = store.cleanup("repo1").await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_by_id("a").await.unwrap().is_none());
        assert!(store.get_by_id("b").await.unwrap().is_some());
    }
}
