//! The pattern-detection collaborator contract.
//!
//! Like [`crate::storage::VectorStore`] and [`crate::llm::LlmClient`],
//! real pattern detection (clustering, anomaly scoring, whatever a given
//! deployment wires in) is out of scope (`spec.md` §1): the analyze-tool
//! handlers (C10) only ever see this trait, plus a heuristic mock used
//! by tests and the default composition.

use std::collections::HashMap;

use async_trait::async_trait;

use memcortex_protocol::{ChunkType, ConversationChunk, MemoryResult};

/// One detected pattern across a set of chunks.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DetectedPattern {
    /// Short human-readable label for the pattern.
    pub label: String,
    /// Ids of the chunks that make up this pattern.
    pub chunk_ids: Vec<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

/// A quality snapshot over a set of chunks.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QualityReport {
    /// Mean content length, in characters.
    pub average_content_length: f64,
    /// Fraction of chunks carrying at least one tag, in `[0, 1]`.
    pub tag_coverage: f64,
    /// Fraction of chunks marked obsolete, in `[0, 1]`.
    pub obsolete_fraction: f64,
    /// Chunk count by type.
    pub type_distribution: HashMap<ChunkType, usize>,
}

/// Collaborator invoked by the analyze-tool handlers (C10) to turn a
/// scoped set of chunks into patterns, relations, or a quality report.
#[async_trait]
pub trait PatternDetector: Send + Sync {
    /// Group `chunks` into recurring patterns.
    async fn detect_patterns(&self, chunks: &[ConversationChunk]) -> MemoryResult<Vec<DetectedPattern>>;

    /// Summarize the quality of `chunks`.
    async fn quality_report(&self, chunks: &[ConversationChunk]) -> MemoryResult<QualityReport>;
}

/// A heuristic pattern detector: groups by chunk type and tag overlap.
/// Carries no production logic — a real deployment would swap in
/// embedding-cluster-based detection behind the same trait.
#[derive(Default)]
pub struct HeuristicPatternDetector;

#[async_trait]
impl PatternDetector for HeuristicPatternDetector {
    async fn detect_patterns(&self, chunks: &[ConversationChunk]) -> MemoryResult<Vec<DetectedPattern>> {
        let mut groups: HashMap<ChunkType, Vec<String>> = HashMap::new();
        for chunk in chunks {
            groups.entry(chunk.chunk_type).or_default().push(chunk.id.clone());
        }

        let total = chunks.len().max(1) as f64;
        let mut patterns: Vec<DetectedPattern> = groups
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(chunk_type, ids)| {
                let confidence = (ids.len() as f64 / total).min(1.0);
                DetectedPattern {
                    label: format!("recurring {chunk_type:?}"),
                    chunk_ids: ids,
                    confidence,
                }
            })
            .collect();

        patterns.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.label.cmp(&b.label))
        });
        Ok(patterns)
    }

    async fn quality_report(&self, chunks: &[ConversationChunk]) -> MemoryResult<QualityReport> {
        if chunks.is_empty() {
            return Ok(QualityReport {
                average_content_length: 0.0,
                tag_coverage: 0.0,
                obsolete_fraction: 0.0,
                type_distribution: HashMap::new(),
            });
        }

        let total = chunks.len() as f64;
        let total_len: usize = chunks.iter().map(|c| c.content.chars().count()).sum();
        let tagged = chunks.iter().filter(|c| !c.tags.is_empty()).count();
        let obsolete = chunks.iter().filter(|c| c.is_obsolete()).count();

        let mut type_distribution: HashMap<ChunkType, usize> = HashMap::new();
        for chunk in chunks {
            *type_distribution.entry(chunk.chunk_type).or_insert(0) += 1;
        }

        Ok(QualityReport {
            average_content_length: total_len as f64 / total,
            tag_coverage: tagged as f64 / total,
            obsolete_fraction: obsolete as f64 / total,
            type_distribution,
        })
    }
}
