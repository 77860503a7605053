//! The `ConversationChunk` data model: the stored unit ingested from
//! conversational and project artifacts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// The kind of a stored chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// A solution to a problem.
    Solution,
    /// A described problem.
    Problem,
    /// A task definition.
    Task,
    /// An update to an existing task.
    TaskUpdate,
    /// A progress report on a task.
    TaskProgress,
    /// A recorded architecture decision.
    ArchitectureDecision,
    /// A code change description.
    CodeChange,
    /// An analysis artifact.
    Analysis,
    /// A verification artifact.
    Verification,
    /// General discussion.
    Discussion,
    /// A summary of a session.
    SessionSummary,
    /// A question.
    Question,
}

impl ChunkType {
    /// All chunk type variants, for exhaustive iteration in scoring and tests.
    pub const ALL: &'static [ChunkType] = &[
        ChunkType::Solution,
        ChunkType::Problem,
        ChunkType::Task,
        ChunkType::TaskUpdate,
        ChunkType::TaskProgress,
        ChunkType::ArchitectureDecision,
        ChunkType::CodeChange,
        ChunkType::Analysis,
        ChunkType::Verification,
        ChunkType::Discussion,
        ChunkType::SessionSummary,
        ChunkType::Question,
    ];
}

/// Status of a task-typed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet started.
    Todo,
    /// Currently being worked.
    InProgress,
    /// Finished.
    Completed,
    /// Abandoned without completion.
    Cancelled,
    /// Blocked on something external.
    Blocked,
}

/// Priority of a task-typed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Low priority.
    Low,
    /// Normal priority.
    Medium,
    /// High priority.
    High,
    /// Must be done immediately.
    Critical,
}

/// Well-known metadata keys read and written by the analytics engine.
/// Anything outside this set still round-trips through the opaque map.
pub mod keys {
    /// Non-decreasing access counter.
    pub const ACCESS_COUNT: &str = "access_count";
    /// RFC 3339 timestamp of the most recent access.
    pub const LAST_ACCESSED: &str = "last_accessed";
    /// Fraction of uses judged successful, in `[0, 1]`.
    pub const SUCCESS_RATE: &str = "success_rate";
    /// Cached effectiveness score, in `[0, 1]`.
    pub const EFFECTIVENESS_SCORE: &str = "effectiveness_score";
    /// Whether the chunk has been marked obsolete.
    pub const IS_OBSOLETE: &str = "is_obsolete";
    /// RFC 3339 timestamp of when the chunk was archived.
    pub const ARCHIVED_AT: &str = "archived_at";
    /// Human-readable reason the chunk was marked obsolete.
    pub const OBSOLETE_REASON: &str = "obsolete_reason";
    /// Task status, for `Task`-typed chunks.
    pub const TASK_STATUS: &str = "task_status";
    /// Task priority, for `Task`-typed chunks.
    pub const TASK_PRIORITY: &str = "task_priority";
    /// Task completion percentage, `0..=100`.
    pub const TASK_PROGRESS: &str = "task_progress";
}

/// Opaque, extensible metadata attached to a chunk. The wire shape is a
/// string-keyed map of untyped values; this type adds type-safe
/// accessors for the handful of keys the analytics engine understands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtendedMetadata(pub BTreeMap<String, Value>);

impl ExtendedMetadata {
    /// An empty metadata map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the map has no entries at all (distinct from `is_obsolete`
    /// or any other single field being absent).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Insert or replace a value.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `access_count` field, if present.
    pub fn access_count(&self) -> Option<i64> {
        self.get(keys::ACCESS_COUNT).and_then(Value::as_i64)
    }

    /// The `last_accessed` field, if present.
    pub fn last_accessed(&self) -> Option<DateTime<Utc>> {
        self.get(keys::LAST_ACCESSED).and_then(Value::as_timestamp)
    }

    /// The `success_rate` field, if present.
    pub fn success_rate(&self) -> Option<f64> {
        self.get(keys::SUCCESS_RATE).and_then(Value::as_f64)
    }

    /// The `effectiveness_score` field, if present.
    pub fn effectiveness_score(&self) -> Option<f64> {
        self.get(keys::EFFECTIVENESS_SCORE).and_then(Value::as_f64)
    }

    /// Whether the chunk is marked obsolete. Absent means `false`.
    pub fn is_obsolete(&self) -> bool {
        self.get(keys::IS_OBSOLETE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The `task_status` field, parsed from its wire string form.
    pub fn task_status(&self) -> Option<TaskStatus> {
        self.get(keys::TASK_STATUS)
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok())
    }

    /// The `task_priority` field, parsed from its wire string form.
    pub fn task_priority(&self) -> Option<TaskPriority> {
        self.get(keys::TASK_PRIORITY)
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok())
    }

    /// The `task_progress` field, if present.
    pub fn task_progress(&self) -> Option<i64> {
        self.get(keys::TASK_PROGRESS).and_then(Value::as_i64)
    }
}

/// A stored unit of conversational or project memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationChunk {
    /// Stable identifier, unique within the storage backend.
    pub id: String,
    /// Logical project partition this chunk belongs to.
    pub repository: String,
    /// Session this chunk was produced within.
    pub session_id: String,
    /// Kind of chunk.
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    /// When the chunk was created.
    pub timestamp: DateTime<Utc>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Opaque text payload.
    pub content: String,
    /// Analytics and task bookkeeping.
    #[serde(default)]
    pub metadata: ExtendedMetadata,
}

impl ConversationChunk {
    /// Whether this chunk has been marked obsolete and should be
    /// excluded from top-N ranking.
    pub fn is_obsolete(&self) -> bool {
        self.metadata.is_obsolete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_through_json() {
        let mut metadata = ExtendedMetadata::new();
        metadata.set(keys::ACCESS_COUNT, 5i64);
        metadata.set(keys::SUCCESS_RATE, 0.9f64);
        metadata.set(keys::IS_OBSOLETE, false);

        let json = serde_json::to_string(&metadata).unwrap();
        let decoded: ExtendedMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.access_count(), Some(5));
        assert_eq!(decoded.success_rate(), Some(0.9));
        assert!(!decoded.is_obsolete());
    }

    #[test]
    fn chunk_serializes_type_field_as_snake_case() {
        let chunk = ConversationChunk {
            id: "c1".into(),
            repository: "repo".into(),
            session_id: "s1".into(),
            chunk_type: ChunkType::ArchitectureDecision,
            timestamp: Utc::now(),
            tags: vec![],
            content: "decided to use postgres".into(),
            metadata: ExtendedMetadata::new(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "architecture_decision");
    }

    #[test]
    fn absent_is_obsolete_defaults_false() {
        let metadata = ExtendedMetadata::new();
        assert!(!metadata.is_obsolete());
    }
}
