//! Extraction output types.

use super::entity::RecognizedEntity;
use super::memory::MemoryType;
use serde::{Deserialize, Serialize};

/// Which pattern group produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternGroup {
    /// "remember that ...", "don't forget ...", "always ...", "never ..."
    RememberDirective,
    /// "my name is ...", "I work at ...", "I am a ..."
    Identity,
    /// "I prefer ...", "I (don't) like ...", "please ..."
    Preference,
    /// "we decided ...", "let's use ...", "we'll go with ..."
    Decision,
    /// "actually it's ...", "correction: ..."
    Correction,
}

impl PatternGroup {
    /// Returns the group as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RememberDirective => "remember-directive",
            Self::Identity => "identity",
            Self::Preference => "preference",
            Self::Decision => "decision",
            Self::Correction => "correction",
        }
    }
}

/// Three-way sentiment label with a compound score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    /// Categorical label.
    pub label: SentimentLabel,
    /// Compound score in [-1, 1]; sign matches the label.
    pub compound: f64,
}

/// Categorical sentiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    /// Net-positive wording.
    Positive,
    /// Net-negative wording.
    Negative,
    /// No clear polarity.
    #[default]
    Neutral,
}

/// Provenance and enrichment attached to a candidate by the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionMeta {
    /// The pattern group that matched, if any.
    pub pattern_group: Option<PatternGroup>,
    /// Salient keywords extracted by the classifier.
    pub keywords: Vec<String>,
    /// Sentiment attached by the classifier.
    pub sentiment: Option<Sentiment>,
}

/// A memory candidate produced by extraction, before storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCandidate {
    /// Extracted content (capture group of the matched pattern).
    pub content: String,
    /// SHA-256 over normalized content.
    pub content_hash: String,
    /// Assigned memory type.
    pub memory_type: MemoryType,
    /// Extractor confidence in [0, 1].
    pub confidence: f64,
    /// Importance estimate in [0, 1].
    pub importance: f64,
    /// Entities recognized inside the candidate content.
    pub entities: Vec<RecognizedEntity>,
    /// Provenance and classifier enrichment.
    pub meta: ExtractionMeta,
}

impl MemoryCandidate {
    /// Creates a candidate with hash computed from the content.
    #[must_use]
    pub fn new(content: impl Into<String>, memory_type: MemoryType, confidence: f64) -> Self {
        let content = content.into();
        let content_hash = crate::dedup::ContentHasher::hash(&content);
        Self {
            content,
            content_hash,
            memory_type,
            confidence,
            importance: 0.5,
            entities: Vec::new(),
            meta: ExtractionMeta::default(),
        }
    }
}
