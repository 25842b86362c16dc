//! Extraction pipeline: raw text to typed memory candidates.
//!
//! Pattern matching assigns type and confidence, entity recognition links
//! surface forms, in-call dedup collapses repeats, and the rule classifier
//! refines the result. Extraction is total: any input yields a (possibly
//! empty) candidate list, never an error.

mod classifier;
mod entities;
mod patterns;

pub use classifier::RuleClassifier;
pub use entities::EntityRecognizer;
pub use patterns::{MEMORY_SIGNALS, MemorySignal, STOP_WORDS};

use crate::dedup::ContentHasher;
use crate::models::{MemoryCandidate, MemoryType, PatternGroup};
use std::time::Instant;

/// Minimum content length for a candidate; shorter captures are noise.
const MIN_CONTENT_LEN: usize = 5;

/// Caller-provided hints for an extraction call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionHints {
    /// Preferred type for remember-directive matches (e.g. the git-commit
    /// adapter hints `Episodic`).
    pub memory_type: Option<MemoryType>,
}

/// The pattern + entity extraction pipeline.
pub struct ExtractionPipeline;

impl ExtractionPipeline {
    /// Extracts memory candidates from raw text.
    ///
    /// Within one call, content is deduplicated by normalized form with the
    /// first occurrence winning; repeated identity/decision matches of the
    /// same content raise its importance instead of duplicating it.
    #[must_use]
    pub fn extract(text: &str, hints: ExtractionHints) -> Vec<MemoryCandidate> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let start = Instant::now();

        let recognized = EntityRecognizer::recognize(text);
        let mut candidates: Vec<MemoryCandidate> = Vec::new();
        let mut seen: Vec<String> = Vec::new();

        for signal in MEMORY_SIGNALS.iter() {
            for caps in signal.pattern.captures_iter(text) {
                let Some(capture) = caps.get(1) else { continue };
                let content = clean_capture(capture.as_str());
                if content.len() < MIN_CONTENT_LEN {
                    continue;
                }

                let normalized = ContentHasher::normalize(&content);
                if let Some(idx) = seen.iter().position(|s| *s == normalized) {
                    reinforce(&mut candidates[idx], signal);
                    continue;
                }
                seen.push(normalized);

                let memory_type = assign_type(signal, hints);
                let mut candidate = MemoryCandidate::new(content, memory_type, signal.confidence);
                candidate.meta.pattern_group = Some(signal.group);
                candidate.importance = base_importance(signal.group);
                candidate.entities = attach_entities(&candidate.content, &recognized);
                candidates.push(candidate);
            }
        }

        for candidate in &mut candidates {
            RuleClassifier::refine(candidate);
        }

        let elapsed_ms = start.elapsed().as_millis();
        tracing::debug!(
            candidates = candidates.len(),
            text_len = text.len(),
            elapsed_ms = %elapsed_ms,
            "extraction complete"
        );
        metrics::histogram!("extraction_duration_ms").record(elapsed_ms as f64);

        candidates
    }
}

/// Entities for one candidate: recognized inside its own content, plus
/// whole-text recognitions whose surface form appears in the content (a
/// bare captured name like "Alice" carries no recognizable cue on its own).
fn attach_entities(
    content: &str,
    whole_text: &[crate::models::RecognizedEntity],
) -> Vec<crate::models::RecognizedEntity> {
    let mut entities = EntityRecognizer::recognize(content);
    let content_lower = content.to_lowercase();
    for entity in whole_text {
        if content_lower.contains(&entity.name.to_lowercase()) {
            let key = entity.dedup_key();
            if !entities.iter().any(|e| e.dedup_key() == key) {
                entities.push(entity.clone());
            }
        }
    }
    entities
}

/// Trims whitespace and dangling punctuation from a capture.
fn clean_capture(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['.', ',', ';', ':', '!', '?'])
        .trim()
        .to_string()
}

fn assign_type(signal: &MemorySignal, hints: ExtractionHints) -> MemoryType {
    if signal.group == PatternGroup::RememberDirective {
        return hints.memory_type.unwrap_or(signal.memory_type);
    }
    signal.memory_type
}

const fn base_importance(group: PatternGroup) -> f64 {
    match group {
        PatternGroup::Correction => 0.7,
        PatternGroup::Identity | PatternGroup::Decision => 0.6,
        PatternGroup::RememberDirective | PatternGroup::Preference => 0.5,
    }
}

/// Applies the per-extra-match bonuses when the same content is captured by
/// more than one signal.
fn reinforce(candidate: &mut MemoryCandidate, signal: &MemorySignal) {
    if matches!(signal.group, PatternGroup::Identity | PatternGroup::Decision) {
        candidate.importance = (candidate.importance + 0.1).clamp(0.0, 1.0);
    }
    if signal.confidence > candidate.confidence {
        candidate.confidence = signal.confidence;
    }
}
