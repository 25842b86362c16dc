//! Graph schema and version discipline.
//!
//! Two node tables (memories, entities), two edge tables (mentions,
//! relates_to), and a meta table carrying the schema version. A version
//! mismatch at open is fatal; the store never upgrades silently.

use crate::{Error, Result};
use rusqlite::Connection;

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: i64 = 1;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memories (
    id           TEXT PRIMARY KEY,
    content      TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    memory_type  TEXT NOT NULL,
    importance   REAL NOT NULL,
    confidence   REAL NOT NULL,
    created_at   INTEGER NOT NULL,
    valid_from   INTEGER NOT NULL,
    valid_to     INTEGER,
    accessed_at  INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 1,
    source_type  TEXT NOT NULL DEFAULT 'api',
    user_id      TEXT,
    session_id   TEXT,
    agent_id     TEXT,
    entities     TEXT NOT NULL DEFAULT '[]',
    metadata     TEXT NOT NULL DEFAULT '{}'
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_content_hash ON memories(content_hash);
CREATE INDEX IF NOT EXISTS idx_memories_type     ON memories(memory_type);
CREATE INDEX IF NOT EXISTS idx_memories_user     ON memories(user_id);
CREATE INDEX IF NOT EXISTS idx_memories_validity ON memories(valid_from, valid_to);

CREATE TABLE IF NOT EXISTS entities (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    name_lower    TEXT NOT NULL,
    entity_type   TEXT NOT NULL,
    first_seen    INTEGER NOT NULL,
    last_seen     INTEGER NOT NULL,
    mention_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE(name_lower, entity_type)
);

CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name_lower);

CREATE TABLE IF NOT EXISTS mentions (
    memory_id  TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    entity_id  TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    confidence REAL NOT NULL DEFAULT 1.0,
    PRIMARY KEY (memory_id, entity_id)
);

CREATE TABLE IF NOT EXISTS relates_to (
    src_id     TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    dst_id     TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    kind       TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (src_id, dst_id, kind)
);
";

/// Applies pragmas for concurrent local use.
///
/// WAL for concurrent readers with a single writer, NORMAL synchronous, a
/// busy timeout so transient page locks wait instead of erroring, and
/// enforced foreign keys (dangling MENTIONS edges are forbidden).
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a value row; pragma_update tolerates it.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Error::Storage {
            operation: "configure_connection".to_string(),
            cause: e.to_string(),
        })
}

/// Creates the schema on a fresh store, or verifies the version on an
/// existing one.
///
/// # Errors
///
/// Returns [`Error::Schema`] if the store was written by a different schema
/// version, [`Error::Storage`] on SQL failures.
pub fn initialize(conn: &Connection) -> Result<()> {
    match read_version(conn)? {
        None => {
            conn.execute_batch(DDL).map_err(|e| Error::Storage {
                operation: "create_schema".to_string(),
                cause: e.to_string(),
            })?;
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
                [SCHEMA_VERSION.to_string()],
            )
            .map_err(|e| Error::Storage {
                operation: "write_schema_version".to_string(),
                cause: e.to_string(),
            })?;
            Ok(())
        },
        Some(found) if found == SCHEMA_VERSION => Ok(()),
        Some(found) => Err(Error::Schema {
            found,
            expected: SCHEMA_VERSION,
        }),
    }
}

/// Reads the recorded schema version, `None` for a fresh store.
fn read_version(conn: &Connection) -> Result<Option<i64>> {
    let table_exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'meta')",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage {
            operation: "check_meta_table".to_string(),
            cause: e.to_string(),
        })?;
    if !table_exists {
        return Ok(None);
    }

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .map_err(|e| Error::Storage {
            operation: "read_schema_version".to_string(),
            cause: e.to_string(),
        })?;

    match version {
        None => Ok(None),
        Some(v) => v.parse::<i64>().map(Some).map_err(|_| Error::Storage {
            operation: "read_schema_version".to_string(),
            cause: format!("non-numeric schema version: {v}"),
        }),
    }
}
