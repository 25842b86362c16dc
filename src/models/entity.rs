//! Entity nodes of the reference graph.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a graph entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates a new entity ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random entity ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("ent-{}", uuid::Uuid::new_v4()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Coarse category of a recognized entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// Named project, application, or service.
    Project,
    /// Named individual.
    Person,
    /// Language, framework, tool, or platform.
    Technology,
    /// Filename with a known extension.
    File,
    /// HTTP(S) URL.
    Url,
    /// Email address.
    Email,
    /// Semver-ish version string.
    Version,
    /// ISO or prose date.
    Date,
    /// Anything recognized without a sharper category.
    Other,
}

impl EntityType {
    /// Returns all entity type variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Project,
            Self::Person,
            Self::Technology,
            Self::File,
            Self::Url,
            Self::Email,
            Self::Version,
            Self::Date,
            Self::Other,
        ]
    }

    /// Returns the entity type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Person => "person",
            Self::Technology => "technology",
            Self::File => "file",
            Self::Url => "url",
            Self::Email => "email",
            Self::Version => "version",
            Self::Date => "date",
            Self::Other => "other",
        }
    }

    /// Parses an entity type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "project" | "app" | "service" => Some(Self::Project),
            "person" | "people" | "user" => Some(Self::Person),
            "technology" | "tech" | "tool" => Some(Self::Technology),
            "file" => Some(Self::File),
            "url" | "link" => Some(Self::Url),
            "email" => Some(Self::Email),
            "version" => Some(Self::Version),
            "date" => Some(Self::Date),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named atom referenced by memories.
///
/// Surface form is case-preserved; identity for deduplication is
/// `(lowercased name, entity_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier.
    pub id: EntityId,
    /// Case-preserved surface form.
    pub name: String,
    /// Coarse category.
    pub entity_type: EntityType,
    /// First time any memory mentioned this entity (epoch seconds).
    pub first_seen: u64,
    /// Most recent mention (epoch seconds).
    pub last_seen: u64,
    /// Total MENTIONS edges pointing at this entity.
    pub mention_count: u64,
}

/// An entity occurrence found in a piece of text, before storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedEntity {
    /// Case-preserved surface form.
    pub name: String,
    /// Coarse category.
    pub entity_type: EntityType,
    /// Recognizer confidence in [0, 1].
    pub confidence: f64,
}

impl RecognizedEntity {
    /// Creates a recognized entity.
    #[must_use]
    pub fn new(name: impl Into<String>, entity_type: EntityType, confidence: f64) -> Self {
        Self {
            name: name.into(),
            entity_type,
            confidence,
        }
    }

    /// Deduplication key: lowercased surface form plus type.
    #[must_use]
    pub fn dedup_key(&self) -> (String, EntityType) {
        (self.name.to_lowercase(), self.entity_type)
    }
}
