//! Memory extraction patterns.
//!
//! Static pattern data for the extraction pipeline. Each signal owns a
//! compiled case-insensitive regex whose first capture group is the memory
//! content, a target memory type, and a base confidence.
// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]

use crate::models::{MemoryType, PatternGroup};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// A memory signal pattern with its assigned type and confidence.
#[derive(Debug)]
pub struct MemorySignal {
    /// The regex to match; group 1 captures the memory content.
    pub pattern: Regex,
    /// The memory type this signal assigns.
    pub memory_type: MemoryType,
    /// Base confidence for matches of this signal.
    pub confidence: f64,
    /// The pattern group this signal belongs to.
    pub group: PatternGroup,
    /// Human-readable description of the signal.
    #[allow(dead_code)]
    pub description: &'static str,
}

/// Static memory signal patterns grouped by trigger family.
pub static MEMORY_SIGNALS: LazyLock<Vec<MemorySignal>> = LazyLock::new(|| {
    vec![
        // Remember-directive patterns
        MemorySignal {
            pattern: Regex::new(r"(?i)\bremember\s+that\s+([^.;!?\n]+)")
                .expect("static regex: remember that"),
            memory_type: MemoryType::Semantic,
            confidence: 0.90,
            group: PatternGroup::RememberDirective,
            description: "remember that",
        },
        MemorySignal {
            pattern: Regex::new(r"(?i)\bdon'?t\s+forget\s+(?:that\s+|to\s+)?([^.;!?\n]+)")
                .expect("static regex: don't forget"),
            memory_type: MemoryType::Semantic,
            confidence: 0.90,
            group: PatternGroup::RememberDirective,
            description: "don't forget",
        },
        MemorySignal {
            pattern: Regex::new(r"(?im)^\s*always\s+([^.;!?\n]+)")
                .expect("static regex: always"),
            memory_type: MemoryType::Semantic,
            confidence: 0.90,
            group: PatternGroup::RememberDirective,
            description: "always ...",
        },
        MemorySignal {
            pattern: Regex::new(r"(?im)^\s*never\s+([^.;!?\n]+)")
                .expect("static regex: never"),
            memory_type: MemoryType::Semantic,
            confidence: 0.90,
            group: PatternGroup::RememberDirective,
            description: "never ...",
        },
        // Identity patterns
        MemorySignal {
            pattern: Regex::new(r"(?i)\bmy\s+name\s+is\s+((?-i:[A-Z]\w*(?:\s+[A-Z]\w*)*))")
                .expect("static regex: my name is"),
            memory_type: MemoryType::Identity,
            confidence: 0.90,
            group: PatternGroup::Identity,
            description: "my name is",
        },
        MemorySignal {
            pattern: Regex::new(
                r"(?i)\bi\s+work\s+(?:at|for)\s+((?-i:[A-Z][\w&-]*(?:\s+[A-Z][\w&-]*)*))",
            )
            .expect("static regex: I work at"),
            memory_type: MemoryType::Identity,
            confidence: 0.90,
            group: PatternGroup::Identity,
            description: "I work at/for",
        },
        MemorySignal {
            pattern: Regex::new(r"(?i)\bi\s+am\s+an?\s+([^,.;!?\n]+)")
                .expect("static regex: I am a"),
            memory_type: MemoryType::Identity,
            confidence: 0.90,
            group: PatternGroup::Identity,
            description: "I am a",
        },
        // Preference patterns
        MemorySignal {
            pattern: Regex::new(r"(?i)\bi\s+prefer\s+([^.;!?\n]+)")
                .expect("static regex: I prefer"),
            memory_type: MemoryType::Preference,
            confidence: 0.80,
            group: PatternGroup::Preference,
            description: "I prefer",
        },
        MemorySignal {
            pattern: Regex::new(r"(?i)\bi\s+(?:really\s+)?like\s+([^.;!?\n]+)")
                .expect("static regex: I like"),
            memory_type: MemoryType::Preference,
            confidence: 0.80,
            group: PatternGroup::Preference,
            description: "I like",
        },
        MemorySignal {
            pattern: Regex::new(r"(?i)\b(i\s+(?:do\s+not|don'?t)\s+like\s+[^.;!?\n]+)")
                .expect("static regex: I don't like"),
            memory_type: MemoryType::Preference,
            confidence: 0.80,
            group: PatternGroup::Preference,
            description: "I don't like (negation kept in content)",
        },
        MemorySignal {
            pattern: Regex::new(r"(?i)\bplease\s+([^.;!?\n]+)")
                .expect("static regex: please"),
            memory_type: MemoryType::Preference,
            confidence: 0.80,
            group: PatternGroup::Preference,
            description: "please ...",
        },
        // Decision patterns
        MemorySignal {
            pattern: Regex::new(
                r"(?i)\bwe\s+(?:have\s+)?decided\s+(?:to\s+|on\s+|that\s+)?([^.;!?\n]+)",
            )
            .expect("static regex: we decided"),
            memory_type: MemoryType::Decision,
            confidence: 0.90,
            group: PatternGroup::Decision,
            description: "we decided",
        },
        MemorySignal {
            pattern: Regex::new(r"(?i)\blet'?s\s+(?:use|go\s+with|adopt|try)\s+([^.;!?\n]+)")
                .expect("static regex: let's use"),
            memory_type: MemoryType::Decision,
            confidence: 0.90,
            group: PatternGroup::Decision,
            description: "let's use/go with",
        },
        MemorySignal {
            pattern: Regex::new(r"(?i)\bwe'?ll\s+go\s+with\s+([^.;!?\n]+)")
                .expect("static regex: we'll go with"),
            memory_type: MemoryType::Decision,
            confidence: 0.90,
            group: PatternGroup::Decision,
            description: "we'll go with",
        },
        MemorySignal {
            pattern: Regex::new(r"(?i)\bwe\s+(?:use|chose|are\s+using|switched\s+to)\s+([^.;!?\n]+)")
                .expect("static regex: we use"),
            memory_type: MemoryType::Decision,
            confidence: 0.90,
            group: PatternGroup::Decision,
            description: "we use/chose",
        },
        // Correction patterns
        MemorySignal {
            pattern: Regex::new(r"(?i)\bactually,?\s+(?:it'?s\s+|we\s+|i\s+meant\s+)?([^.;!?\n]+)")
                .expect("static regex: actually"),
            memory_type: MemoryType::Context,
            confidence: 0.95,
            group: PatternGroup::Correction,
            description: "actually it's",
        },
        MemorySignal {
            pattern: Regex::new(r"(?i)\bcorrection:?\s+([^.;!?\n]+)")
                .expect("static regex: correction"),
            memory_type: MemoryType::Context,
            confidence: 0.95,
            group: PatternGroup::Correction,
            description: "correction:",
        },
    ]
});

/// Common words excluded from keywords, topics, and person recognition.
pub static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "if", "then", "else", "for", "nor", "so", "yet",
        "at", "by", "from", "in", "into", "of", "on", "onto", "to", "with", "about", "over",
        "under", "after", "before", "between", "through", "during", "above", "below", "up",
        "down", "out", "off", "again", "further", "once", "here", "there", "when", "where",
        "why", "how", "all", "any", "both", "each", "few", "more", "most", "other", "some",
        "such", "only", "own", "same", "than", "too", "very", "can", "will", "just", "should",
        "could", "would", "may", "might", "must", "shall", "is", "are", "was", "were", "be",
        "been", "being", "have", "has", "had", "having", "do", "does", "did", "doing", "i",
        "me", "my", "we", "our", "you", "your", "he", "him", "his", "she", "her", "it", "its",
        "they", "them", "their", "this", "that", "these", "those", "what", "which", "who",
        "whom", "am", "as", "not", "no", "don", "use", "using", "used", "get", "got", "make",
        "made", "let", "lets", "please", "thing", "things", "stuff", "really", "actually",
        "want", "wants", "need", "needs", "like", "also",
    ]
    .into_iter()
    .collect()
});
