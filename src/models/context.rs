//! Recall strategies and the context bundle returned to callers.

use super::memory::Memory;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A recall plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecallStrategy {
    /// Token match against memory content.
    Keyword,
    /// Join through MENTIONS edges on recognized prompt entities.
    Entity,
    /// Recent-window query, triggered by temporal markers in the prompt.
    Temporal,
    /// Keyword + entity + temporal merged and ranked.
    #[default]
    Hybrid,
}

impl RecallStrategy {
    /// Returns the strategy as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Entity => "entity",
            Self::Temporal => "temporal",
            Self::Hybrid => "hybrid",
        }
    }

    /// Parses a strategy from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "keyword" => Some(Self::Keyword),
            "entity" => Some(Self::Entity),
            "temporal" => Some(Self::Temporal),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

impl fmt::Display for RecallStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The bundle returned by recall: original prompt, formatted enhancement,
/// ranked memories, and an aggregate confidence callers may gate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryContext {
    /// The prompt as submitted.
    pub prompt: String,
    /// Prompt with relevant context prepended, or the original prompt when
    /// nothing matched.
    pub enhanced_prompt: String,
    /// Ranked, currently-valid memories.
    pub memories: Vec<Memory>,
    /// Mean of the top candidates' scores, clamped to [0, 1].
    pub confidence: f64,
    /// The strategy that produced this bundle.
    pub strategy_used: RecallStrategy,
    /// True when a hook-path call found the store locked and skipped recall
    /// entirely. Normal flow control, not an error.
    pub skipped: bool,
}

impl MemoryContext {
    /// An empty bundle that passes the prompt through unchanged.
    #[must_use]
    pub fn passthrough(prompt: impl Into<String>, strategy: RecallStrategy) -> Self {
        let prompt = prompt.into();
        Self {
            enhanced_prompt: prompt.clone(),
            prompt,
            memories: Vec::new(),
            confidence: 0.0,
            strategy_used: strategy,
            skipped: false,
        }
    }

    /// A skipped bundle for hook-path lock contention.
    #[must_use]
    pub fn skipped(prompt: impl Into<String>, strategy: RecallStrategy) -> Self {
        let mut ctx = Self::passthrough(prompt, strategy);
        ctx.skipped = true;
        ctx
    }

    /// Assembles a bundle from ranked memories, formatting the enhanced
    /// prompt deterministically:
    ///
    /// ```text
    /// ## Relevant Context:
    /// - <memory 1 content>
    /// - <memory 2 content>
    ///
    /// <original prompt>
    /// ```
    #[must_use]
    pub fn assemble(
        prompt: impl Into<String>,
        memories: Vec<Memory>,
        confidence: f64,
        strategy: RecallStrategy,
    ) -> Self {
        let prompt = prompt.into();
        if memories.is_empty() {
            return Self::passthrough(prompt, strategy);
        }

        let mut enhanced = String::from("## Relevant Context:\n");
        for memory in &memories {
            enhanced.push_str("- ");
            enhanced.push_str(&memory.content);
            enhanced.push('\n');
        }
        enhanced.push('\n');
        enhanced.push_str(&prompt);

        Self {
            prompt,
            enhanced_prompt: enhanced,
            memories,
            confidence: confidence.clamp(0.0, 1.0),
            strategy_used: strategy,
            skipped: false,
        }
    }
}
