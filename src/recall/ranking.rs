//! Candidate ranking for recall.
//!
//! Weighted blend of decayed importance, keyword relevance, entity overlap,
//! and access recency, with a deterministic tie-break.

use crate::models::Memory;
use std::collections::HashSet;

/// Weight of decayed importance.
pub const W_IMPORTANCE: f64 = 0.35;
/// Weight of keyword overlap with the prompt.
pub const W_RELEVANCE: f64 = 0.30;
/// Weight of entity overlap with the prompt.
pub const W_ENTITY: f64 = 0.20;
/// Weight of access recency.
pub const W_RECENCY: f64 = 0.15;

/// Recency half-life window in days: a week-old access scores ~1/e.
const RECENCY_WINDOW_DAYS: f64 = 7.0;

/// Scores one memory against the prompt features.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score(
    memory: &Memory,
    prompt_tokens: &HashSet<String>,
    prompt_entities: &HashSet<String>,
    now: u64,
) -> f64 {
    let importance = memory.decayed_importance(now);

    let relevance = if prompt_tokens.is_empty() {
        0.0
    } else {
        let content_lower = memory.content.to_lowercase();
        let matched = prompt_tokens
            .iter()
            .filter(|t| content_lower.contains(t.as_str()))
            .count();
        matched as f64 / prompt_tokens.len() as f64
    };

    let entity_overlap = if prompt_entities.is_empty() {
        0.0
    } else {
        let matched = memory
            .entities
            .iter()
            .filter(|e| prompt_entities.contains(&e.to_lowercase()))
            .count();
        matched as f64 / prompt_entities.len() as f64
    };

    let age_days = now.saturating_sub(memory.accessed_at) as f64 / 86_400.0;
    let recency = (-age_days / RECENCY_WINDOW_DAYS).exp();

    W_IMPORTANCE * importance
        + W_RELEVANCE * relevance
        + W_ENTITY * entity_overlap
        + W_RECENCY * recency
}

/// Ranks memories in place: score descending, then `created_at` descending,
/// then id ascending for determinism.
pub fn rank(
    memories: &mut Vec<Memory>,
    prompt_tokens: &HashSet<String>,
    prompt_entities: &HashSet<String>,
    now: u64,
) {
    let mut scored: Vec<(f64, Memory)> = memories
        .drain(..)
        .map(|m| (score(&m, prompt_tokens, prompt_entities, now), m))
        .collect();

    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    *memories = scored.into_iter().map(|(_, m)| m).collect();
}

/// Aggregate confidence: mean score of the candidates, clamped to [0, 1].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn confidence(
    memories: &[Memory],
    prompt_tokens: &HashSet<String>,
    prompt_entities: &HashSet<String>,
    now: u64,
) -> f64 {
    if memories.is_empty() {
        return 0.0;
    }
    let total: f64 = memories
        .iter()
        .map(|m| score(m, prompt_tokens, prompt_entities, now))
        .sum();
    (total / memories.len() as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemoryType;

    const NOW: u64 = 1_700_000_000;

    fn memory(content: &str, importance: f64, created_at: u64) -> Memory {
        let mut m = Memory::new(content, MemoryType::Semantic, created_at);
        m.importance = importance;
        m
    }

    fn tokens(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| (*w).to_string()).collect()
    }

    #[test]
    fn test_keyword_overlap_raises_score() {
        let relevant = memory("we deploy with docker and kubernetes", 0.5, NOW);
        let irrelevant = memory("lunch is at noon", 0.5, NOW);
        let prompt = tokens(&["docker", "kubernetes"]);

        let s_rel = score(&relevant, &prompt, &HashSet::new(), NOW);
        let s_irr = score(&irrelevant, &prompt, &HashSet::new(), NOW);
        assert!(s_rel > s_irr);
    }

    #[test]
    fn test_entity_overlap_raises_score() {
        let mut tagged = memory("uses Redis", 0.5, NOW);
        tagged.entities = vec!["Redis".to_string()];
        let untagged = memory("uses Redis", 0.5, NOW);

        let prompt_entities = tokens(&["redis"]);
        let s_tagged = score(&tagged, &HashSet::new(), &prompt_entities, NOW);
        let s_untagged = score(&untagged, &HashSet::new(), &prompt_entities, NOW);
        assert!(s_tagged > s_untagged);
    }

    #[test]
    fn test_importance_dominates_among_equal_relevance() {
        let high = memory("the database is Postgres", 0.9, NOW);
        let low = memory("the database is Postgres", 0.2, NOW);
        let prompt = tokens(&["database"]);
        assert!(score(&high, &prompt, &HashSet::new(), NOW) > score(&low, &prompt, &HashSet::new(), NOW));
    }

    #[test]
    fn test_stale_access_decays_recency() {
        let mut fresh = memory("fact", 0.5, NOW - 100);
        fresh.accessed_at = NOW;
        let mut stale = memory("fact two", 0.5, NOW - 100);
        stale.accessed_at = NOW - 30 * 86_400;

        assert!(
            score(&fresh, &HashSet::new(), &HashSet::new(), NOW)
                > score(&stale, &HashSet::new(), &HashSet::new(), NOW)
        );
    }

    #[test]
    fn test_rank_orders_by_score_then_created_then_id() {
        let prompt = tokens(&["postgres"]);
        let winner = memory("postgres is our database", 0.9, NOW - 50);
        let mut older_tie = memory("unrelated alpha", 0.5, NOW - 1000);
        older_tie.id = crate::models::MemoryId::new("aaa");
        let mut newer_tie = memory("unrelated beta", 0.5, NOW - 500);
        newer_tie.id = crate::models::MemoryId::new("bbb");
        // Force identical tie-break inputs apart from created_at.
        older_tie.accessed_at = NOW;
        newer_tie.accessed_at = NOW;

        let mut memories = vec![older_tie, winner.clone(), newer_tie];
        rank(&mut memories, &prompt, &HashSet::new(), NOW);

        assert_eq!(memories[0].id, winner.id);
        // Newer creation wins the tie.
        assert_eq!(memories[1].id.as_str(), "bbb");
        assert_eq!(memories[2].id.as_str(), "aaa");
    }

    #[test]
    fn test_rank_is_deterministic() {
        let prompt = tokens(&["postgres"]);
        let mut a = vec![
            memory("postgres one", 0.5, NOW),
            memory("postgres two", 0.5, NOW),
            memory("postgres three", 0.5, NOW),
        ];
        let mut b = a.clone();
        rank(&mut a, &prompt, &HashSet::new(), NOW);
        rank(&mut b, &prompt, &HashSet::new(), NOW);

        let ids_a: Vec<_> = a.iter().map(|m| m.id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_confidence_bounds() {
        assert!((confidence(&[], &HashSet::new(), &HashSet::new(), NOW) - 0.0).abs() < f64::EPSILON);

        let memories = vec![memory("postgres", 1.0, NOW)];
        let prompt = tokens(&["postgres"]);
        let c = confidence(&memories, &prompt, &HashSet::new(), NOW);
        assert!(c > 0.0 && c <= 1.0);
    }
}
