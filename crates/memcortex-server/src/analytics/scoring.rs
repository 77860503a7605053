//! Deterministic effectiveness scoring.
//!
//! `effectiveness_score` is a total function over a chunk and the
//! current time: `0.4*F_success + 0.2*F_access + 0.2*F_recency + F_type`,
//! clamped to `[0, 1]`. Every constant here is load-bearing for the
//! cross-implementation replication scenarios in `spec.md` §8 — changing
//! one changes which bucket a scenario's expected score range falls
//! into, so treat this module as a spec artifact, not a tuning knob.

use chrono::{DateTime, Utc};

use memcortex_protocol::{ChunkType, ConversationChunk, TaskPriority, TaskStatus};

const W_SUCCESS: f64 = 0.4;
const W_ACCESS: f64 = 0.2;
const W_RECENCY: f64 = 0.2;

const ACCESS_SATURATION: f64 = 10.0;
const RECENCY_WINDOW_DAYS: f64 = 30.0;

/// `F_success` when metadata is present but carries no `success_rate`.
const DEFAULT_SUCCESS: f64 = 0.5;
/// `F_access` when metadata is present but carries no `access_count`.
const DEFAULT_ACCESS: f64 = 0.5;

/// Compute the effectiveness score for `chunk` as of `now`.
pub fn effectiveness_score(chunk: &ConversationChunk, now: DateTime<Utc>) -> f64 {
    let has_metadata = !chunk.metadata.is_empty();

    let f_success = match chunk.metadata.success_rate() {
        Some(rate) => rate,
        None if !has_metadata => estimate_success_by_type(chunk),
        None => DEFAULT_SUCCESS,
    };

    let f_access = match chunk.metadata.access_count() {
        Some(count) => (count as f64 / ACCESS_SATURATION).min(1.0),
        None if !has_metadata => potential_access_by_type(chunk),
        None => DEFAULT_ACCESS,
    };

    let reference_time = chunk.metadata.last_accessed().unwrap_or(chunk.timestamp);
    let days = (now - reference_time).num_milliseconds() as f64 / (1000.0 * 60.0 * 60.0 * 24.0);
    let f_recency = (1.0 - days / RECENCY_WINDOW_DAYS).max(0.0);

    let f_type = type_bonus(chunk);

    let score = W_SUCCESS * f_success + W_ACCESS * f_access + W_RECENCY * f_recency + f_type;
    score.min(1.0).max(0.0)
}

/// `estimate_by_type_and_attrs`: the `F_success` estimate used when a
/// chunk carries no metadata at all.
fn estimate_success_by_type(chunk: &ConversationChunk) -> f64 {
    match chunk.chunk_type {
        ChunkType::Solution => 0.8,
        ChunkType::Problem => 0.4,
        ChunkType::Task => task_success_estimate(chunk),
        ChunkType::TaskUpdate => 0.55,
        ChunkType::TaskProgress => 0.55,
        ChunkType::ArchitectureDecision => 0.7,
        ChunkType::CodeChange => 0.6,
        ChunkType::Analysis => 0.65,
        ChunkType::Verification => 0.7,
        ChunkType::Discussion => 0.45,
        ChunkType::SessionSummary => 0.5,
        ChunkType::Question => 0.4,
    }
}

fn task_success_estimate(chunk: &ConversationChunk) -> f64 {
    let completed = chunk.metadata.task_status() == Some(TaskStatus::Completed);
    let high_priority = matches!(
        chunk.metadata.task_priority(),
        Some(TaskPriority::High) | Some(TaskPriority::Critical)
    );
    match (completed, high_priority) {
        (true, true) => 0.9,
        (true, false) => 0.75,
        (false, _) => 0.6,
    }
}

/// `potential_by_type`: the `F_access` estimate used when a chunk
/// carries no metadata at all.
fn potential_access_by_type(chunk: &ConversationChunk) -> f64 {
    match chunk.chunk_type {
        ChunkType::Solution => 0.6,
        ChunkType::Problem => 0.3,
        ChunkType::Task => {
            if chunk.metadata.task_status() == Some(TaskStatus::InProgress) {
                0.6
            } else {
                0.5
            }
        }
        ChunkType::TaskUpdate => 0.4,
        ChunkType::TaskProgress => 0.4,
        ChunkType::ArchitectureDecision => 0.5,
        ChunkType::CodeChange => 0.45,
        ChunkType::Analysis => 0.45,
        ChunkType::Verification => 0.4,
        ChunkType::Discussion => 0.3,
        ChunkType::SessionSummary => 0.35,
        ChunkType::Question => 0.35,
    }
}

/// `F_type`: a small additive per-type bonus, with extra credit for
/// completed/high-priority tasks and for task progress `>= 80`. The
/// final `min(1, ...)` clamp in [`effectiveness_score`] caps the total,
/// so this never needs to be bounded on its own.
fn type_bonus(chunk: &ConversationChunk) -> f64 {
    let base = match chunk.chunk_type {
        ChunkType::Solution => 0.15,
        ChunkType::Problem => 0.0,
        ChunkType::Task => 0.05,
        ChunkType::TaskUpdate => 0.03,
        ChunkType::TaskProgress => 0.03,
        ChunkType::ArchitectureDecision => 0.1,
        ChunkType::CodeChange => 0.05,
        ChunkType::Analysis => 0.05,
        ChunkType::Verification => 0.08,
        ChunkType::Discussion => 0.0,
        ChunkType::SessionSummary => 0.02,
        ChunkType::Question => 0.0,
    };

    let mut bonus = base;
    if chunk.metadata.task_status() == Some(TaskStatus::Completed) {
        bonus += 0.1;
    }
    if matches!(
        chunk.metadata.task_priority(),
        Some(TaskPriority::High) | Some(TaskPriority::Critical)
    ) {
        bonus += 0.05;
    }
    if chunk.metadata.task_progress().unwrap_or(0) >= 80 {
        bonus += 0.05;
    }
    bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use memcortex_protocol::chunk::keys;
    use memcortex_protocol::ExtendedMetadata;

    fn base_chunk(chunk_type: ChunkType, timestamp: DateTime<Utc>) -> ConversationChunk {
        ConversationChunk {
            id: "c1".to_string(),
            repository: "repo".to_string(),
            session_id: "s1".to_string(),
            chunk_type,
            timestamp,
            tags: vec![],
            content: "content".to_string(),
            metadata: ExtendedMetadata::new(),
        }
    }

    #[test]
    fn score_is_always_within_unit_interval() {
        let now = Utc::now();
        for chunk_type in ChunkType::ALL {
            for days_old in [0i64, 5, 30, 90, 365] {
                let chunk = base_chunk(*chunk_type, now - ChronoDuration::days(days_old));
                let score = effectiveness_score(&chunk, now);
                assert!((0.0..=1.0).contains(&score), "score {score} out of range for {chunk_type:?}");
            }
        }
    }

    #[test]
    fn scenario_solution_with_rich_metadata_scores_high() {
        let now = Utc::now();
        let mut chunk = base_chunk(ChunkType::Solution, now - ChronoDuration::hours(24));
        chunk.metadata.set(keys::SUCCESS_RATE, 0.9);
        chunk.metadata.set(keys::ACCESS_COUNT, 10i64);
        chunk.metadata.set(keys::LAST_ACCESSED, now - ChronoDuration::hours(2));

        let score = effectiveness_score(&chunk, now);
        assert!((0.7..=1.0).contains(&score), "score was {score}");
    }

    #[test]
    fn scenario_stale_problem_with_no_metadata_scores_low() {
        let now = Utc::now();
        let chunk = base_chunk(ChunkType::Problem, now - ChronoDuration::days(60));

        let score = effectiveness_score(&chunk, now);
        assert!((0.0..=0.4).contains(&score), "score was {score}");
    }

    #[test]
    fn no_metadata_score_depends_only_on_type_and_timestamp() {
        let now = Utc::now();
        let a = base_chunk(ChunkType::Solution, now - ChronoDuration::days(10));
        let b = base_chunk(ChunkType::Solution, now - ChronoDuration::days(10));
        assert_eq!(effectiveness_score(&a, now), effectiveness_score(&b, now));
    }

    #[test]
    fn completed_high_priority_task_scores_above_default_task() {
        let now = Utc::now();
        let mut completed = base_chunk(ChunkType::Task, now);
        completed.metadata.set(keys::TASK_STATUS, "completed");
        completed.metadata.set(keys::TASK_PRIORITY, "high");

        let mut plain = base_chunk(ChunkType::Task, now);
        plain.metadata.set(keys::TASK_STATUS, "todo");

        assert!(effectiveness_score(&completed, now) > effectiveness_score(&plain, now));
    }

    #[test]
    fn high_task_progress_adds_bonus() {
        let now = Utc::now();
        let mut high_progress = base_chunk(ChunkType::TaskProgress, now);
        high_progress.metadata.set(keys::TASK_PROGRESS, 90i64);

        let mut low_progress = base_chunk(ChunkType::TaskProgress, now);
        low_progress.metadata.set(keys::TASK_PROGRESS, 10i64);

        assert!(effectiveness_score(&high_progress, now) > effectiveness_score(&low_progress, now));
    }
}
