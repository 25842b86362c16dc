//! The recall engine: prompt to ranked context bundle.
//!
//! Four strategies over the graph store with a hard latency posture: cache
//! consults before locks, index-only query paths, fan-out capped at three
//! times the requested limit, and infallible degradation to the original
//! prompt on any storage failure.

pub mod ranking;

use crate::extraction::{EntityRecognizer, STOP_WORDS};
use crate::models::{Memory, MemoryContext, MemoryId, RecallStrategy};
use crate::storage::{GraphStore, QueryFilters};
use crate::{Error, current_timestamp};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Keywords taken from a prompt.
const MAX_PROMPT_KEYWORDS: usize = 5;

/// Temporal window for "recent" prompts: seven days.
const TEMPORAL_WINDOW_SECS: u64 = 7 * 86_400;

/// Markers that switch on the temporal strategy.
static TEMPORAL_MARKERS: &[&str] = &[
    "recent",
    "recently",
    "latest",
    "yesterday",
    "today",
    "last week",
    "this week",
    "just now",
    "lately",
];

/// Options for one recall call.
#[derive(Debug, Clone)]
pub struct RecallOptions {
    /// Maximum memories in the bundle.
    pub limit: usize,
    /// Strategy to run.
    pub strategy: RecallStrategy,
    /// Storage filters (user scope, type, validity).
    pub filters: QueryFilters,
    /// File-lock timeout; zero on the hook path.
    pub lock_timeout: Duration,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            strategy: RecallStrategy::Hybrid,
            filters: QueryFilters::default(),
            lock_timeout: Duration::from_secs(2),
        }
    }
}

/// Multi-strategy recall over a shared store.
pub struct RecallEngine {
    store: Arc<GraphStore>,
}

impl RecallEngine {
    /// Creates an engine over the store.
    #[must_use]
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    /// Recalls relevant memories for a prompt.
    ///
    /// Never fails: lock contention with a zero timeout yields a skipped
    /// bundle, any other storage failure yields a passthrough bundle, both
    /// with the original prompt intact.
    #[must_use]
    pub fn recall(&self, prompt: &str, options: &RecallOptions) -> MemoryContext {
        let start = Instant::now();
        let strategy = options.strategy;

        let result = self.run_strategy(prompt, options);
        let context = match result {
            Ok(memories) => {
                let now = current_timestamp();
                let tokens = prompt_keywords(prompt).into_iter().collect::<HashSet<_>>();
                let entities = prompt_entity_names(prompt);
                let conf = ranking::confidence(&memories, &tokens, &entities, now);

                self.touch_results(&memories);
                MemoryContext::assemble(prompt, memories, conf, strategy)
            },
            Err(Error::Busy { .. }) if options.lock_timeout.is_zero() => {
                tracing::debug!("store locked, hook recall skipped");
                metrics::counter!("recall_skipped_total").increment(1);
                MemoryContext::skipped(prompt, strategy)
            },
            Err(e) => {
                tracing::warn!(error = %e, "recall failed, returning original prompt");
                metrics::counter!("recall_fallback_total").increment(1);
                MemoryContext::passthrough(prompt, strategy)
            },
        };

        let elapsed_ms = start.elapsed().as_millis();
        metrics::histogram!("recall_duration_ms", "strategy" => strategy.as_str())
            .record(elapsed_ms as f64);
        tracing::debug!(
            strategy = strategy.as_str(),
            memories = context.memories.len(),
            elapsed_ms = %elapsed_ms,
            "recall complete"
        );
        context
    }

    fn run_strategy(
        &self,
        prompt: &str,
        options: &RecallOptions,
    ) -> crate::Result<Vec<Memory>> {
        let fan_out = options.limit.saturating_mul(3).max(options.limit);
        match options.strategy {
            RecallStrategy::Keyword => {
                let memories = self.keyword_query(prompt, fan_out, options)?;
                Ok(memories.into_iter().take(options.limit).collect())
            },
            RecallStrategy::Entity => {
                let memories = self.entity_query(prompt, fan_out, options)?;
                Ok(memories.into_iter().take(options.limit).collect())
            },
            RecallStrategy::Temporal => {
                let memories = self.temporal_query(prompt, fan_out, options)?;
                Ok(memories.into_iter().take(options.limit).collect())
            },
            RecallStrategy::Hybrid => self.hybrid_query(prompt, fan_out, options),
        }
    }

    fn keyword_query(
        &self,
        prompt: &str,
        fan_out: usize,
        options: &RecallOptions,
    ) -> crate::Result<Vec<Memory>> {
        let keywords = prompt_keywords(prompt);
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        self.store
            .query_by_keywords(&keywords, fan_out, &options.filters, options.lock_timeout)
    }

    fn entity_query(
        &self,
        prompt: &str,
        fan_out: usize,
        options: &RecallOptions,
    ) -> crate::Result<Vec<Memory>> {
        let names: Vec<String> = prompt_entity_names(prompt).into_iter().collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }
        self.store
            .query_by_entities(&names, fan_out, &options.filters, options.lock_timeout)
    }

    fn temporal_query(
        &self,
        prompt: &str,
        fan_out: usize,
        options: &RecallOptions,
    ) -> crate::Result<Vec<Memory>> {
        if !has_temporal_marker(prompt) {
            return Ok(Vec::new());
        }
        let since = current_timestamp().saturating_sub(TEMPORAL_WINDOW_SECS);
        self.store
            .query_recent(since, fan_out, &options.filters, options.lock_timeout)
    }

    /// Runs all three strategies, merges by id, and ranks the union.
    fn hybrid_query(
        &self,
        prompt: &str,
        fan_out: usize,
        options: &RecallOptions,
    ) -> crate::Result<Vec<Memory>> {
        let mut merged: Vec<Memory> = Vec::new();
        let mut seen: HashSet<MemoryId> = HashSet::new();

        for memories in [
            self.keyword_query(prompt, fan_out, options)?,
            self.entity_query(prompt, fan_out, options)?,
            self.temporal_query(prompt, fan_out, options)?,
        ] {
            for memory in memories {
                if seen.insert(memory.id.clone()) {
                    merged.push(memory);
                }
            }
        }

        let now = current_timestamp();
        let tokens: HashSet<String> = prompt_keywords(prompt).into_iter().collect();
        let entities = prompt_entity_names(prompt);
        ranking::rank(&mut merged, &tokens, &entities, now);
        merged.truncate(options.limit);
        Ok(merged)
    }

    /// Batched access touch for the returned memories; elided when the
    /// store is locked.
    fn touch_results(&self, memories: &[Memory]) {
        if memories.is_empty() {
            return;
        }
        let ids: Vec<MemoryId> = memories.iter().map(|m| m.id.clone()).collect();
        match self.store.touch_batch(&ids, Duration::ZERO) {
            Ok(_) => {},
            Err(Error::Busy { .. }) => {
                tracing::debug!("store locked, access touch elided");
            },
            Err(e) => {
                tracing::debug!(error = %e, "access touch failed");
            },
        }
    }
}

/// Extracts up to five salient keywords from a prompt: stopwords and short
/// tokens dropped, ranked by frequency then length.
#[must_use]
pub fn prompt_keywords(prompt: &str) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for raw in prompt.split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_') {
        let token = raw.to_lowercase();
        if token.len() <= 2 || STOP_WORDS.contains(token.as_str()) {
            continue;
        }
        if token.chars().all(char::is_numeric) {
            continue;
        }
        if let Some(entry) = counts.iter_mut().find(|(t, _)| *t == token) {
            entry.1 += 1;
        } else {
            counts.push((token, 1));
        }
    }

    counts.sort_by(|(token_a, count_a), (token_b, count_b)| {
        count_b
            .cmp(count_a)
            .then_with(|| token_b.len().cmp(&token_a.len()))
            .then_with(|| token_a.cmp(token_b))
    });
    counts
        .into_iter()
        .take(MAX_PROMPT_KEYWORDS)
        .map(|(t, _)| t)
        .collect()
}

/// Lowercased entity names recognized in the prompt.
#[must_use]
pub fn prompt_entity_names(prompt: &str) -> HashSet<String> {
    EntityRecognizer::recognize(prompt)
        .into_iter()
        .map(|e| e.name.to_lowercase())
        .collect()
}

/// Whether the prompt asks about the recent past.
#[must_use]
pub fn has_temporal_marker(prompt: &str) -> bool {
    let lower = prompt.to_lowercase();
    TEMPORAL_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemoryType, RecognizedEntity};
    use crate::storage::MemoryWrite;

    const FG: Duration = Duration::from_secs(2);

    fn engine() -> (tempfile::TempDir, Arc<GraphStore>, RecallEngine) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            GraphStore::open(&dir.path().join("memories.db"), Duration::from_secs(300)).unwrap(),
        );
        let engine = RecallEngine::new(Arc::clone(&store));
        (dir, store, engine)
    }

    fn seed(store: &GraphStore, content: &str, ty: MemoryType, entities: &[&str]) -> MemoryId {
        let mut memory = Memory::new(content, ty, current_timestamp());
        memory.entities = entities.iter().map(|e| (*e).to_string()).collect();
        let mentions: Vec<RecognizedEntity> = entities
            .iter()
            .map(|e| RecognizedEntity::new(*e, crate::models::EntityType::Technology, 0.9))
            .collect();
        store
            .put_batch(vec![MemoryWrite { memory, mentions }], FG)
            .unwrap()[0]
            .clone()
    }

    #[test]
    fn test_prompt_keywords() {
        let kws = prompt_keywords("What language should I use for the backend?");
        assert!(kws.contains(&"language".to_string()));
        assert!(kws.contains(&"backend".to_string()));
        assert!(!kws.contains(&"the".to_string()));
        assert!(kws.len() <= MAX_PROMPT_KEYWORDS);
    }

    #[test]
    fn test_temporal_markers() {
        assert!(has_temporal_marker("What did we do recently?"));
        assert!(has_temporal_marker("show the latest changes"));
        assert!(!has_temporal_marker("what database do we use?"));
    }

    #[test]
    fn test_keyword_strategy_finds_match() {
        let (_dir, store, engine) = engine();
        seed(&store, "User prefers Python for scripting", MemoryType::Preference, &["Python"]);

        let ctx = engine.recall(
            "Which language for the new Python script?",
            &RecallOptions {
                strategy: RecallStrategy::Keyword,
                ..RecallOptions::default()
            },
        );
        assert_eq!(ctx.strategy_used, RecallStrategy::Keyword);
        assert_eq!(ctx.memories.len(), 1);
        assert!(ctx.enhanced_prompt.starts_with("## Relevant Context:"));
    }

    #[test]
    fn test_entity_strategy() {
        let (_dir, store, engine) = engine();
        seed(&store, "sessions live in Redis", MemoryType::Decision, &["Redis"]);
        seed(&store, "unrelated fact", MemoryType::Semantic, &[]);

        let ctx = engine.recall(
            "How do we configure Redis?",
            &RecallOptions {
                strategy: RecallStrategy::Entity,
                ..RecallOptions::default()
            },
        );
        assert_eq!(ctx.memories.len(), 1);
        assert!(ctx.memories[0].content.contains("Redis"));
    }

    #[test]
    fn test_temporal_strategy_without_marker_is_empty() {
        let (_dir, store, engine) = engine();
        seed(&store, "fresh decision", MemoryType::Decision, &[]);

        let ctx = engine.recall(
            "what database do we use?",
            &RecallOptions {
                strategy: RecallStrategy::Temporal,
                ..RecallOptions::default()
            },
        );
        assert!(ctx.memories.is_empty());
        assert_eq!(ctx.enhanced_prompt, ctx.prompt);
    }

    #[test]
    fn test_temporal_strategy_with_marker() {
        let (_dir, store, engine) = engine();
        seed(&store, "shipped the importer", MemoryType::Episodic, &[]);

        let ctx = engine.recall(
            "What did we ship recently?",
            &RecallOptions {
                strategy: RecallStrategy::Temporal,
                ..RecallOptions::default()
            },
        );
        assert_eq!(ctx.memories.len(), 1);
    }

    #[test]
    fn test_hybrid_merges_and_dedups() {
        let (_dir, store, engine) = engine();
        // Matched by both keyword ("python") and entity ("Python").
        seed(&store, "User prefers Python", MemoryType::Preference, &["Python"]);

        let ctx = engine.recall("should we use Python?", &RecallOptions::default());
        assert_eq!(ctx.strategy_used, RecallStrategy::Hybrid);
        assert_eq!(ctx.memories.len(), 1, "same memory must not appear twice");
        assert!(ctx.confidence > 0.0);
    }

    #[test]
    fn test_no_match_passthrough() {
        let (_dir, _store, engine) = engine();
        let ctx = engine.recall("completely unrelated question", &RecallOptions::default());
        assert!(ctx.memories.is_empty());
        assert_eq!(ctx.enhanced_prompt, ctx.prompt);
        assert!(!ctx.skipped);
    }

    #[test]
    fn test_recall_idempotent_without_writes() {
        let (_dir, store, engine) = engine();
        for i in 0..5 {
            seed(&store, &format!("Python note number {i}"), MemoryType::Semantic, &[]);
        }

        let first = engine.recall("tell me about Python notes", &RecallOptions::default());
        let second = engine.recall("tell me about Python notes", &RecallOptions::default());

        let ids1: Vec<_> = first.memories.iter().map(|m| m.id.clone()).collect();
        let ids2: Vec<_> = second.memories.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids1, ids2);
    }

    #[test]
    fn test_limit_respected() {
        let (_dir, store, engine) = engine();
        for i in 0..10 {
            seed(&store, &format!("Python fact {i}"), MemoryType::Semantic, &[]);
        }

        let ctx = engine.recall(
            "Python facts?",
            &RecallOptions {
                limit: 3,
                ..RecallOptions::default()
            },
        );
        assert_eq!(ctx.memories.len(), 3);
    }

    #[test]
    fn test_touch_recorded_on_recall() {
        let (_dir, store, engine) = engine();
        let id = seed(&store, "Python is preferred", MemoryType::Preference, &[]);
        let before = store.get(&id).unwrap().unwrap().access_count;

        let _ = engine.recall("Python?", &RecallOptions::default());
        let after = store.get(&id).unwrap().unwrap().access_count;
        assert!(after > before);
    }
}
