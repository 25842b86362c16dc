//! Row conversion between the database schema and [`Memory`] objects.

use crate::models::{Memory, MemoryId, MemoryType};
use rusqlite::Row;
use std::collections::BTreeMap;

/// Column list shared by every memory query; order matches
/// [`MemoryRow::from_row`].
pub const MEMORY_COLUMNS: &str = "id, content, content_hash, memory_type, importance, confidence, \
     created_at, valid_from, valid_to, accessed_at, access_count, \
     source_type, user_id, session_id, agent_id, entities, metadata";

/// Internal representation of a memory row with primitive column types.
#[derive(Debug)]
pub struct MemoryRow {
    /// Unique identifier.
    pub id: String,
    /// Memory content.
    pub content: String,
    /// Dedup hash.
    pub content_hash: String,
    /// Type tag string (e.g. "decision").
    pub memory_type: String,
    /// Importance at creation.
    pub importance: f64,
    /// Extractor confidence.
    pub confidence: f64,
    /// Creation time (epoch seconds).
    pub created_at: i64,
    /// Validity window start.
    pub valid_from: i64,
    /// Validity window end, if bounded.
    pub valid_to: Option<i64>,
    /// Last access time.
    pub accessed_at: i64,
    /// Access counter.
    pub access_count: i64,
    /// Origin tag.
    pub source_type: String,
    /// Owner, if tagged.
    pub user_id: Option<String>,
    /// Session scope tag.
    pub session_id: Option<String>,
    /// Agent scope tag.
    pub agent_id: Option<String>,
    /// JSON array of entity surface strings.
    pub entities: String,
    /// JSON object of free-form metadata.
    pub metadata: String,
}

impl MemoryRow {
    /// Builds a row from a rusqlite result row ordered per
    /// [`MEMORY_COLUMNS`].
    ///
    /// # Errors
    ///
    /// Returns the underlying rusqlite error on column type mismatch.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            content: row.get(1)?,
            content_hash: row.get(2)?,
            memory_type: row.get(3)?,
            importance: row.get(4)?,
            confidence: row.get(5)?,
            created_at: row.get(6)?,
            valid_from: row.get(7)?,
            valid_to: row.get(8)?,
            accessed_at: row.get(9)?,
            access_count: row.get(10)?,
            source_type: row.get(11)?,
            user_id: row.get(12)?,
            session_id: row.get(13)?,
            agent_id: row.get(14)?,
            entities: row.get(15)?,
            metadata: row.get(16)?,
        })
    }
}

/// Converts a row into a [`Memory`] with lenient parsing.
///
/// Unknown type tags fall back to the default type; malformed JSON columns
/// become empty collections rather than failing the whole query.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn build_memory_from_row(row: MemoryRow) -> Memory {
    let memory_type = MemoryType::parse(&row.memory_type).unwrap_or_default();
    let entities: Vec<String> = serde_json::from_str(&row.entities).unwrap_or_default();
    let metadata: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&row.metadata).unwrap_or_default();

    Memory {
        id: MemoryId::new(row.id),
        content: row.content,
        content_hash: row.content_hash,
        memory_type,
        importance: row.importance,
        confidence: row.confidence,
        created_at: row.created_at as u64,
        valid_from: row.valid_from as u64,
        valid_to: row.valid_to.map(|v| v as u64),
        accessed_at: row.accessed_at as u64,
        access_count: row.access_count as u64,
        source_type: row.source_type,
        user_id: row.user_id,
        session_id: row.session_id,
        agent_id: row.agent_id,
        entities,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> MemoryRow {
        MemoryRow {
            id: "mem-1".to_string(),
            content: "we use Postgres".to_string(),
            content_hash: "abc".to_string(),
            memory_type: "decision".to_string(),
            importance: 0.6,
            confidence: 0.9,
            created_at: 1_700_000_000,
            valid_from: 1_700_000_000,
            valid_to: Some(1_731_536_000),
            accessed_at: 1_700_000_500,
            access_count: 3,
            source_type: "conversation".to_string(),
            user_id: Some("alice@example.com".to_string()),
            session_id: None,
            agent_id: None,
            entities: r#"["Postgres"]"#.to_string(),
            metadata: r#"{"commit":"abc123"}"#.to_string(),
        }
    }

    #[test]
    fn test_build_memory_basic() {
        let memory = build_memory_from_row(sample_row());
        assert_eq!(memory.id.as_str(), "mem-1");
        assert_eq!(memory.memory_type, MemoryType::Decision);
        assert_eq!(memory.entities, vec!["Postgres"]);
        assert_eq!(memory.access_count, 3);
        assert_eq!(memory.valid_to, Some(1_731_536_000));
        assert_eq!(
            memory.metadata.get("commit").and_then(|v| v.as_str()),
            Some("abc123")
        );
    }

    #[test]
    fn test_unknown_type_defaults() {
        let mut row = sample_row();
        row.memory_type = "mystery".to_string();
        let memory = build_memory_from_row(row);
        assert_eq!(memory.memory_type, MemoryType::default());
    }

    #[test]
    fn test_malformed_json_is_lenient() {
        let mut row = sample_row();
        row.entities = "not json".to_string();
        row.metadata = "{broken".to_string();
        let memory = build_memory_from_row(row);
        assert!(memory.entities.is_empty());
        assert!(memory.metadata.is_empty());
    }

    #[test]
    fn test_null_valid_to_means_forever() {
        let mut row = sample_row();
        row.valid_to = None;
        let memory = build_memory_from_row(row);
        assert!(memory.is_valid_at(u64::MAX - 1));
    }
}
