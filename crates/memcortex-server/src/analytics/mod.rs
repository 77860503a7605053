//! Memory analytics engine (C9): write-coalescing access counters,
//! periodic flush, and deterministic effectiveness scoring.

mod scoring;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use memcortex_protocol::{chunk::keys, ConversationChunk, ExtendedMetadata, MemoryResult, Value};

use crate::storage::VectorStore;

pub use scoring::effectiveness_score;

/// In-memory coalescing buffer for a single chunk's pending access/usage
/// deltas, guarded by its own mutex independent of the owning map's lock.
#[derive(Debug, Clone, Default)]
pub struct AccessMetrics {
    /// Accesses recorded since the last flush.
    pub access_count: i64,
    /// Most recent access time recorded since the last flush.
    pub last_accessed: Option<chrono::DateTime<Utc>>,
    /// Uses recorded as successful since the last flush.
    pub successful_uses: i64,
    /// Total uses recorded since the last flush.
    pub total_uses: i64,
}

type PendingMap = HashMap<String, Arc<Mutex<AccessMetrics>>>;

/// The memory analytics engine.
///
/// Holds a process-wide pending-metrics map (RW lock around the map
/// structure, per-record mutex around each entry's counters, per the
/// design note in `spec.md` §9) and a storage collaborator it flushes
/// into periodically.
pub struct AnalyticsEngine {
    storage: Arc<dyn VectorStore>,
    pending: RwLock<PendingMap>,
    flush_interval: Duration,
    shutdown: Notify,
    stopped: std::sync::atomic::AtomicBool,
}

impl AnalyticsEngine {
    /// Default flush interval per `spec.md` §4.7.
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

    /// Build a new engine over `storage`, flushing every `flush_interval`.
    pub fn new(storage: Arc<dyn VectorStore>, flush_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            storage,
            pending: RwLock::new(HashMap::new()),
            flush_interval,
            shutdown: Notify::new(),
            stopped: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn entry(&self, chunk_id: &str) -> Arc<Mutex<AccessMetrics>> {
        if let Some(existing) = self.pending.read().get(chunk_id) {
            return existing.clone();
        }
        self.pending
            .write()
            .entry(chunk_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AccessMetrics::default())))
            .clone()
    }

    /// Record a single access: bumps the pending access count and
    /// `last_accessed` to now. Never touches storage. O(1) amortized.
    pub fn record_access(&self, chunk_id: &str) {
        let entry = self.entry(chunk_id);
        let mut metrics = entry.lock();
        metrics.access_count += 1;
        metrics.last_accessed = Some(Utc::now());
    }

    /// Record a use of a chunk, successful or not.
    pub fn record_usage(&self, chunk_id: &str, successful: bool) {
        let entry = self.entry(chunk_id);
        let mut metrics = entry.lock();
        metrics.total_uses += 1;
        if successful {
            metrics.successful_uses += 1;
        }
    }

    /// Count of chunks with not-yet-flushed metrics, for status reporting.
    pub fn pending_len(&self) -> usize {
        self.pending.read().len()
    }

    /// A snapshot of a chunk's pending (not-yet-flushed) metrics, mostly
    /// useful for tests asserting on coalesced state before a flush.
    pub fn pending_snapshot(&self, chunk_id: &str) -> Option<AccessMetrics> {
        self.pending.read().get(chunk_id).map(|e| e.lock().clone())
    }

    /// Fetch the chunk, merge any pending delta for it into
    /// `ExtendedMetadata`, recompute `effectiveness_score`, and persist.
    /// Does not remove the pending entry — callers that want drain
    /// semantics go through [`Self::flush`].
    pub async fn update_chunk_analytics(&self, chunk_id: &str) -> MemoryResult<()> {
        let metrics = self.pending.read().get(chunk_id).map(|e| e.lock().clone());
        self.merge_and_persist(chunk_id, metrics.as_ref()).await
    }

    /// Mark a chunk obsolete. Idempotent on the `is_obsolete` field.
    pub async fn mark_obsolete(&self, chunk_id: &str, reason: &str) -> MemoryResult<()> {
        let mut chunk = self
            .storage
            .get_by_id(chunk_id)
            .await?
            .ok_or_else(|| memcortex_protocol::MemoryError::NotFound(chunk_id.to_string()))?;
        chunk.metadata.set(keys::IS_OBSOLETE, true);
        chunk.metadata.set(keys::ARCHIVED_AT, Utc::now());
        chunk.metadata.set(keys::OBSOLETE_REASON, reason);
        self.storage.update(&chunk).await
    }

    /// List the top `limit` chunks in `repository` by freshly computed
    /// effectiveness score, excluding obsolete chunks. Ties break by
    /// `timestamp` descending, then `id` ascending, for deterministic
    /// output (a stable O(n log n) sort, not the source's O(n²)
    /// selection sort — see `spec.md` §9's redesign flag).
    pub async fn get_top_memories(
        &self,
        repository: &str,
        limit: usize,
    ) -> MemoryResult<Vec<ConversationChunk>> {
        let mut chunks = self.storage.list_by_repository(repository).await?;
        chunks.retain(|c| !c.is_obsolete());

        let now = Utc::now();
        let mut scored: Vec<(f64, ConversationChunk)> = chunks
            .into_iter()
            .map(|c| (effectiveness_score(&c, now), c))
            .collect();

        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });

        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, c)| c).collect())
    }

    async fn merge_and_persist(&self, chunk_id: &str, metrics: Option<&AccessMetrics>) -> MemoryResult<()> {
        let Some(mut chunk) = self.storage.get_by_id(chunk_id).await? else {
            return Err(memcortex_protocol::MemoryError::NotFound(chunk_id.to_string()));
        };

        if let Some(metrics) = metrics {
            let base_access_count = chunk.metadata.access_count().unwrap_or(0);
            chunk
                .metadata
                .set(keys::ACCESS_COUNT, base_access_count + metrics.access_count);

            if let Some(last_accessed) = metrics.last_accessed {
                chunk.metadata.set(keys::LAST_ACCESSED, last_accessed);
            }

            if metrics.total_uses > 0 {
                let prior_successes = (chunk.metadata.success_rate().unwrap_or(0.0)
                    * chunk.metadata.access_count().unwrap_or(0) as f64)
                    .round() as i64;
                let total_successes = prior_successes + metrics.successful_uses;
                let total_uses = chunk.metadata.access_count().unwrap_or(0).max(1) + metrics.total_uses;
                let success_rate = (total_successes as f64 / total_uses as f64).clamp(0.0, 1.0);
                chunk.metadata.set(keys::SUCCESS_RATE, success_rate);
            }
        }

        let score = effectiveness_score(&chunk, Utc::now());
        chunk.metadata.set(keys::EFFECTIVENESS_SCORE, score);

        self.storage.update(&chunk).await
    }

    /// Drain the pending-metrics map and flush every key into storage.
    /// Errors on individual chunks are logged and do not abort the
    /// batch, per `spec.md` §4.7/§7.
    pub async fn flush(&self) {
        let drained: PendingMap = std::mem::take(&mut *self.pending.write());
        for (chunk_id, metrics) in drained {
            let snapshot = metrics.lock().clone();
            if let Err(error) = self.merge_and_persist(&chunk_id, Some(&snapshot)).await {
                error!(chunk_id = %chunk_id, %error, "failed to flush chunk analytics");
            } else {
                debug!(chunk_id = %chunk_id, "flushed chunk analytics");
            }
        }
    }

    /// Spawn the periodic flush ticker as a background task. Ends when
    /// [`Self::stop`] is called.
    pub fn spawn_flush_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => engine.flush().await,
                    _ = engine.shutdown.notified() => break,
                }
            }
        })
    }

    /// Halt the ticker and perform one final synchronous flush.
    pub async fn stop(&self) {
        if self.stopped.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
        self.flush().await;
    }
}

/// Build an [`ExtendedMetadata`] populated with the fields the analytics
/// engine reads; test helper re-exported for use across the crate.
#[cfg(test)]
pub(crate) fn metadata_with(pairs: &[(&str, Value)]) -> ExtendedMetadata {
    let mut metadata = ExtendedMetadata::new();
    for (key, value) in pairs {
        metadata.set(key, value.clone());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryVectorStore;
    use memcortex_protocol::ChunkType;
    use std::sync::Arc as StdArc;

    fn chunk(id: &str, repo: &str, chunk_type: ChunkType) -> ConversationChunk {
        ConversationChunk {
            id: id.to_string(),
            repository: repo.to_string(),
            session_id: "s1".to_string(),
            chunk_type,
            timestamp: Utc::now(),
            tags: vec![],
            content: "content".to_string(),
            metadata: ExtendedMetadata::new(),
        }
    }

    #[tokio::test]
    async fn record_access_five_times_coalesces_to_five() {
        let storage: StdArc<dyn VectorStore> = StdArc::new(InMemoryVectorStore::new());
        let engine = AnalyticsEngine::new(storage, Duration::from_secs(30));
        for _ in 0..5 {
            engine.record_access("c1");
        }
        let snapshot = engine.pending_snapshot("c1").unwrap();
        assert_eq!(snapshot.access_count, 5);
        assert!(snapshot.last_accessed.is_some());
    }

    #[tokio::test]
    async fn record_usage_tracks_successes_and_total() {
        let storage: StdArc<dyn VectorStore> = StdArc::new(InMemoryVectorStore::new());
        let engine = AnalyticsEngine::new(storage, Duration::from_secs(30));
        engine.record_usage("c2", true);
        engine.record_usage("c2", true);
        engine.record_usage("c2", false);
        engine.record_usage("c2", true);
        let snapshot = engine.pending_snapshot("c2").unwrap();
        assert_eq!(snapshot.total_uses, 4);
        assert_eq!(snapshot.successful_uses, 3);
    }

    #[tokio::test]
    async fn mark_obsolete_is_idempotent() {
        let store = InMemoryVectorStore::new();
        store.seed(chunk("c1", "repo", ChunkType::Solution), vec![1.0]);
        let storage: StdArc<dyn VectorStore> = StdArc::new(store);
        let engine = AnalyticsEngine::new(storage.clone(), Duration::from_secs(30));

        engine.mark_obsolete("c1", "superseded").await.unwrap();
        engine.mark_obsolete("c1", "superseded again").await.unwrap();

        let chunk = storage.get_by_id("c1").await.unwrap().unwrap();
        assert!(chunk.is_obsolete());
    }

    #[tokio::test]
    async fn get_top_memories_excludes_obsolete_and_limits() {
        let store = InMemoryVectorStore::new();
        for i in 0..5 {
            let mut c = chunk(&format!("c{i}"), "repo", ChunkType::Solution);
            c.metadata.set(keys::SUCCESS_RATE, 0.9);
            c.metadata.set(keys::ACCESS_COUNT, 10i64);
            store.seed(c, vec![1.0]);
        }
        // Mark the highest-scoring one obsolete.
        {
            let mut obsolete = store.get_by_id("c0").await.unwrap().unwrap();
            obsolete.metadata.set(keys::IS_OBSOLETE, true);
            store.update(&obsolete).await.unwrap();
        }
        let storage: StdArc<dyn VectorStore> = StdArc::new(store);
        let engine = AnalyticsEngine::new(storage, Duration::from_secs(30));

        let top = engine.get_top_memories("repo", 3).await.unwrap();
        assert_eq!(top.len(), 3);
        assert!(top.iter().all(|c| c.id != "c0"));
    }

    #[tokio::test]
    async fn flush_drains_and_persists_access_count() {
        let store = InMemoryVectorStore::new();
        store.seed(chunk("c1", "repo", ChunkType::Solution), vec![1.0]);
        let storage: StdArc<dyn VectorStore> = StdArc::new(store);
        let engine = AnalyticsEngine::new(storage.clone(), Duration::from_secs(30));

        engine.record_access("c1");
        engine.record_access("c1");
        engine.flush().await;

        let persisted = storage.get_by_id("c1").await.unwrap().unwrap();
        assert_eq!(persisted.metadata.access_count(), Some(2));
        assert!(engine.pending_snapshot("c1").is_none());
    }

    #[tokio::test]
    async fn stop_performs_one_final_synchronous_flush() {
        let store = InMemoryVectorStore::new();
        store.seed(chunk("c1", "repo", ChunkType::Solution), vec![1.0]);
        let storage: StdArc<dyn VectorStore> = StdArc::new(store);
        let engine = AnalyticsEngine::new(storage.clone(), Duration::from_secs(3600));

        engine.record_access("c1");
        engine.stop().await;

        let persisted = storage.get_by_id("c1").await.unwrap().unwrap();
        assert_eq!(persisted.metadata.access_count(), Some(1));
    }
}
