//! Rule-based candidate refinement.
//!
//! Runs after pattern extraction and may only refine candidates: adjust
//! type, re-score confidence, extract keywords, estimate importance, and
//! attach sentiment. It never drops a candidate.

use crate::models::{MemoryCandidate, MemoryType, Sentiment, SentimentLabel};

use super::patterns::STOP_WORDS;

/// Maximum keywords attached per candidate.
const MAX_KEYWORDS: usize = 8;

/// Words signalling positive polarity.
static POSITIVE_WORDS: &[&str] = &[
    "love", "like", "prefer", "great", "good", "excellent", "works", "fixed", "solved", "fast",
    "clean", "happy", "better", "best", "nice", "awesome",
];

/// Words signalling negative polarity.
static NEGATIVE_WORDS: &[&str] = &[
    "hate", "dislike", "bad", "broken", "slow", "bug", "fails", "failed", "error", "worse",
    "worst", "avoid", "annoying", "flaky", "crash", "regression",
];

/// Cue words that sharpen a type assignment when the pattern pass was
/// ambiguous.
static DECISION_CUES: &[&str] = &["decided", "chose", "agreed", "settled"];
static SOLUTION_CUES: &[&str] = &["fixed", "solved", "resolved", "workaround"];
static PROCEDURE_CUES: &[&str] = &["steps", "first", "then", "finally", "run"];

/// Refine-only rule classifier.
pub struct RuleClassifier;

impl RuleClassifier {
    /// Refines a candidate in place.
    ///
    /// The signature enforces refine-only semantics: there is no way to
    /// remove a candidate from here.
    pub fn refine(candidate: &mut MemoryCandidate) {
        let lower = candidate.content.to_lowercase();
        let tokens = tokenize(&lower);

        candidate.meta.keywords = keywords(&tokens);
        candidate.meta.sentiment = Some(sentiment(&tokens));

        refine_type(candidate, &tokens);
        refine_scores(candidate, &tokens);
    }
}

fn tokenize(lower: &str) -> Vec<&str> {
    lower
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .filter(|t| !t.is_empty())
        .collect()
}

fn keywords(tokens: &[&str]) -> Vec<String> {
    let mut out = Vec::with_capacity(MAX_KEYWORDS);
    for token in tokens {
        if token.len() < 3 || STOP_WORDS.contains(*token) {
            continue;
        }
        if token.chars().all(char::is_numeric) {
            continue;
        }
        if out.iter().any(|k: &String| k == token) {
            continue;
        }
        out.push((*token).to_string());
        if out.len() >= MAX_KEYWORDS {
            break;
        }
    }
    out
}

#[allow(clippy::cast_precision_loss)]
fn sentiment(tokens: &[&str]) -> Sentiment {
    let pos = tokens.iter().filter(|t| POSITIVE_WORDS.contains(t)).count() as f64;
    let neg = tokens.iter().filter(|t| NEGATIVE_WORDS.contains(t)).count() as f64;

    // Simple negation flip: "don't like" reads negative.
    let negated = tokens.iter().any(|t| matches!(*t, "not" | "don" | "don't" | "dont" | "never"));
    let (pos, neg) = if negated && pos > 0.0 {
        (0.0, neg + pos)
    } else {
        (pos, neg)
    };

    let total = pos + neg;
    if total == 0.0 {
        return Sentiment {
            label: SentimentLabel::Neutral,
            compound: 0.0,
        };
    }

    let compound = ((pos - neg) / total).clamp(-1.0, 1.0);
    let label = if compound > 0.1 {
        SentimentLabel::Positive
    } else if compound < -0.1 {
        SentimentLabel::Negative
    } else {
        SentimentLabel::Neutral
    };
    Sentiment { label, compound }
}

fn refine_type(candidate: &mut MemoryCandidate, tokens: &[&str]) {
    // Pattern-group assignments are authoritative; only sharpen the generic
    // types.
    if !matches!(candidate.memory_type, MemoryType::Context | MemoryType::Semantic) {
        return;
    }
    if candidate.meta.pattern_group == Some(crate::models::PatternGroup::Correction) {
        return;
    }

    if tokens.iter().any(|t| DECISION_CUES.contains(t)) {
        candidate.memory_type = MemoryType::Decision;
    } else if tokens.iter().any(|t| SOLUTION_CUES.contains(t)) {
        candidate.memory_type = MemoryType::Solution;
    } else if tokens.iter().filter(|t| PROCEDURE_CUES.contains(t)).count() >= 2 {
        candidate.memory_type = MemoryType::Procedural;
    }
}

#[allow(clippy::cast_precision_loss)]
fn refine_scores(candidate: &mut MemoryCandidate, tokens: &[&str]) {
    // Longer, keyword-rich content is worth slightly more.
    let richness = (candidate.meta.keywords.len() as f64 * 0.02).min(0.1);
    candidate.importance = (candidate.importance + richness).clamp(0.0, 1.0);

    // Very short token streams are weaker evidence.
    if tokens.len() < 3 {
        candidate.confidence = (candidate.confidence - 0.05).clamp(0.0, 1.0);
    }
}
