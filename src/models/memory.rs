//! Memory types, identifiers, and retention policies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

const SECS_PER_DAY: u64 = 86_400;

/// Unique identifier for a memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Creates a new memory ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random memory ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Category of a memory, driving retention and decay behavior.
///
/// Each type carries a static retention policy: a default time-to-live
/// applied at put time when the caller supplied no explicit `valid_to`, and
/// a per-day decay rate applied to importance on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Who the user is: name, role, employer.
    Identity,
    /// Stated likes, dislikes, and working preferences.
    Preference,
    /// Choices made and their subjects.
    Decision,
    /// Recurring approaches and conventions.
    Pattern,
    /// Fixes and resolutions that worked.
    Solution,
    /// Short-lived state of the world.
    Status,
    /// Session-scoped background information.
    #[default]
    Context,
    /// Events tied to a particular time.
    Episodic,
    /// Durable facts independent of time.
    Semantic,
    /// How-to knowledge and procedures.
    Procedural,
}

impl MemoryType {
    /// Returns all memory type variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Identity,
            Self::Preference,
            Self::Decision,
            Self::Pattern,
            Self::Solution,
            Self::Status,
            Self::Context,
            Self::Episodic,
            Self::Semantic,
            Self::Procedural,
        ]
    }

    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Preference => "preference",
            Self::Decision => "decision",
            Self::Pattern => "pattern",
            Self::Solution => "solution",
            Self::Status => "status",
            Self::Context => "context",
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
        }
    }

    /// Parses a memory type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "identity" => Some(Self::Identity),
            "preference" | "preferences" => Some(Self::Preference),
            "decision" | "decisions" => Some(Self::Decision),
            "pattern" | "patterns" => Some(Self::Pattern),
            "solution" | "solutions" => Some(Self::Solution),
            "status" => Some(Self::Status),
            "context" => Some(Self::Context),
            "episodic" => Some(Self::Episodic),
            "semantic" => Some(Self::Semantic),
            "procedural" => Some(Self::Procedural),
            _ => None,
        }
    }

    /// Default time-to-live applied at creation when the caller supplied no
    /// explicit `valid_to`. `None` means the memory never expires.
    #[must_use]
    pub const fn ttl(&self) -> Option<Duration> {
        match self {
            Self::Identity | Self::Semantic | Self::Preference => None,
            Self::Decision => Some(Duration::from_secs(365 * SECS_PER_DAY)),
            Self::Pattern | Self::Procedural | Self::Solution => {
                Some(Duration::from_secs(180 * SECS_PER_DAY))
            },
            Self::Episodic => Some(Duration::from_secs(30 * SECS_PER_DAY)),
            Self::Context => Some(Duration::from_secs(7 * SECS_PER_DAY)),
            Self::Status => Some(Duration::from_secs(SECS_PER_DAY)),
        }
    }

    /// Importance decay rate per day, applied on read.
    #[must_use]
    pub const fn decay_per_day(&self) -> f64 {
        match self {
            Self::Identity | Self::Semantic => 0.0,
            Self::Preference => 0.005,
            Self::Decision | Self::Pattern | Self::Procedural | Self::Solution => 0.01,
            Self::Episodic => 0.02,
            Self::Context => 0.05,
            Self::Status => 0.2,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single typed memory with temporal validity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier.
    pub id: MemoryId,
    /// The extracted fact, preference, or decision.
    pub content: String,
    /// SHA-256 over normalized content; the deduplication key.
    pub content_hash: String,
    /// Memory category.
    pub memory_type: MemoryType,
    /// Importance in [0, 1] at creation time. Decay is applied on read via
    /// [`Memory::decayed_importance`], never written back.
    pub importance: f64,
    /// Extractor's self-assessed certainty in [0, 1].
    pub confidence: f64,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Start of the validity window (Unix epoch seconds).
    pub valid_from: u64,
    /// End of the validity window. `None` means currently valid forever.
    pub valid_to: Option<u64>,
    /// Last access timestamp. Monotonically advances.
    pub accessed_at: u64,
    /// Number of times this memory was returned or re-submitted. Monotonic.
    pub access_count: u64,
    /// Free-form origin tag, e.g. `"conversation"`, `"git-commit"`, `"hook"`.
    pub source_type: String,
    /// Owner, auto-populated from git identity unless overridden.
    pub user_id: Option<String>,
    /// Optional session scope tag.
    pub session_id: Option<String>,
    /// Optional agent scope tag.
    pub agent_id: Option<String>,
    /// Entity surface strings mentioned in the content.
    pub entities: Vec<String>,
    /// Free-form metadata (commit SHA, sentiment, ...).
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Memory {
    /// Builds a memory with generated id and hash, applying the retention
    /// policy for `memory_type` since no explicit `valid_to` is given.
    #[must_use]
    pub fn new(content: impl Into<String>, memory_type: MemoryType, now: u64) -> Self {
        let content = content.into();
        let content_hash = crate::dedup::ContentHasher::hash(&content);
        let valid_to = memory_type.ttl().map(|ttl| now + ttl.as_secs());
        Self {
            id: MemoryId::generate(),
            content,
            content_hash,
            memory_type,
            importance: 0.5,
            confidence: 1.0,
            created_at: now,
            valid_from: now,
            valid_to,
            accessed_at: now,
            access_count: 1,
            source_type: "api".to_string(),
            user_id: None,
            session_id: None,
            agent_id: None,
            entities: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Whether this memory is valid at `now` (epoch seconds).
    ///
    /// A memory is currently valid iff `valid_to` is unset or in the future.
    #[must_use]
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.valid_to.is_none_or(|until| until > now)
    }

    /// Importance with type-specific decay applied.
    ///
    /// `importance * exp(-decay_per_day * age_days)`, computed on read.
    /// Monotonically non-increasing in time for a fixed memory.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn decayed_importance(&self, now: u64) -> f64 {
        let age_secs = now.saturating_sub(self.created_at);
        let age_days = age_secs as f64 / SECS_PER_DAY as f64;
        self.importance * (-self.memory_type.decay_per_day() * age_days).exp()
    }
}
