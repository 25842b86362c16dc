//! Graph-shaped durable storage.
//!
//! Memory and Entity nodes, MENTIONS and RELATES_TO edges, in `SQLite`.
//! Writers serialize through the cross-process advisory lock; strict reads
//! take the shared lock; cached reads skip locking entirely. All writes
//! produced from one text land in a single transaction.

mod cache;
mod lock;
mod row;
mod schema;

pub use cache::{QueryCache, QueryKind};
pub use lock::{DbLock, lock_path};
pub use schema::SCHEMA_VERSION;

use crate::models::{Memory, MemoryId, MemoryType, RecognizedEntity};
use crate::{Error, Result, current_timestamp};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use row::{MEMORY_COLUMNS, MemoryRow, build_memory_from_row};

/// A memory plus the recognized entities it mentions, written atomically.
#[derive(Debug, Clone)]
pub struct MemoryWrite {
    /// The memory row.
    pub memory: Memory,
    /// Entities to upsert and connect via MENTIONS edges.
    pub mentions: Vec<RecognizedEntity>,
}

/// Filters applied to storage queries.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// Restrict to memories owned by this user or unowned ones.
    pub user_id: Option<String>,
    /// Restrict to a single memory type.
    pub memory_type: Option<MemoryType>,
    /// Include memories whose `valid_to` has passed. Defaults to false:
    /// queries are valid-only unless asked otherwise.
    pub include_invalid: bool,
}

impl QueryFilters {
    /// Stable digest for cache signatures.
    #[must_use]
    pub fn digest(&self) -> String {
        format!(
            "u:{}|t:{}|i:{}",
            self.user_id.as_deref().unwrap_or("-"),
            self.memory_type.map_or("-", |t| t.as_str()),
            self.include_invalid
        )
    }
}

/// Partial update for [`GraphStore::update`].
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    /// Replace the content (recomputes the hash).
    pub content: Option<String>,
    /// Replace the importance.
    pub importance: Option<f64>,
    /// Replace the confidence.
    pub confidence: Option<f64>,
    /// Replace the validity end; `Some(None)` clears it.
    pub valid_to: Option<Option<u64>>,
    /// Replace the metadata map.
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

/// Aggregate statistics for a store.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryStats {
    /// All rows, valid or not.
    pub total_memories: u64,
    /// Rows passing the validity filter right now.
    pub valid_memories: u64,
    /// Valid rows per type tag.
    pub memories_by_type: BTreeMap<String, u64>,
    /// Entity node count.
    pub entity_count: u64,
    /// Distinct non-null user ids.
    pub user_count: u64,
    /// On-disk size including the WAL.
    pub db_size_bytes: u64,
    /// Query-cache hit rate since open.
    pub cache_hit_rate: f64,
}

/// Helper to acquire a mutex with poison recovery.
///
/// A poisoned mutex means a panic in a previous critical section; the
/// connection state is still usable, so recover and log instead of
/// cascading the failure.
fn acquire_mutex<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("storage mutex was poisoned, recovering");
            metrics::counter!("storage_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

fn storage_err(operation: &str, e: impl std::fmt::Display) -> Error {
    Error::Storage {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

/// The durable graph store.
pub struct GraphStore {
    conn: Mutex<Connection>,
    lock: Mutex<DbLock>,
    cache: QueryCache,
    db_path: PathBuf,
}

impl GraphStore {
    /// Opens (creating if absent) the store at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] on a version mismatch and
    /// [`Error::Storage`] on filesystem or `SQLite` failures.
    pub fn open(db_path: &Path, cache_ttl: Duration) -> Result<Self> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| storage_err("create_db_dir", e))?;
        }

        let conn = Connection::open(db_path).map_err(|e| storage_err("open_db", e))?;
        schema::configure_connection(&conn)?;
        schema::initialize(&conn)?;

        let db_lock = DbLock::new(db_path)?;
        tracing::info!(path = %db_path.display(), "opened memory store");

        Ok(Self {
            conn: Mutex::new(conn),
            lock: Mutex::new(db_lock),
            cache: QueryCache::new(cache_ttl),
            db_path: db_path.to_path_buf(),
        })
    }

    /// The database file path.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Acquires the in-process handle to the cross-process lock.
    ///
    /// A zero timeout must not block on the process-local mutex either, so
    /// it uses `try_lock`.
    fn lock_handle(&self, timeout: Duration, operation: &str) -> Result<MutexGuard<'_, DbLock>> {
        if timeout.is_zero() {
            match self.lock.try_lock() {
                Ok(guard) => Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => Err(Error::Busy {
                    operation: operation.to_string(),
                    path: lock_path(&self.db_path),
                }),
            }
        } else {
            Ok(acquire_mutex(&self.lock))
        }
    }

    /// Inserts one memory, collapsing to a touch on hash collision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] under lock contention, [`Error::Storage`]
    /// otherwise.
    pub fn put_memory(
        &self,
        memory: Memory,
        mentions: &[RecognizedEntity],
        lock_timeout: Duration,
    ) -> Result<MemoryId> {
        let mut ids = self.put_batch(
            vec![MemoryWrite {
                memory,
                mentions: mentions.to_vec(),
            }],
            lock_timeout,
        )?;
        ids.pop().ok_or_else(|| Error::Storage {
            operation: "put_memory".to_string(),
            cause: "batch returned no id".to_string(),
        })
    }

    /// Writes a batch of memories and their MENTIONS edges in a single
    /// transaction. Hash collisions collapse to touches of the existing
    /// rows; the returned ids are positionally aligned with the input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] under lock contention. A failure mid-batch
    /// rolls the entire batch back.
    pub fn put_batch(
        &self,
        writes: Vec<MemoryWrite>,
        lock_timeout: Duration,
    ) -> Result<Vec<MemoryId>> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }

        let mut db_lock = self.lock_handle(lock_timeout, "put_batch")?;
        let _file_guard = db_lock.exclusive(lock_timeout, "put_batch")?;

        let now = current_timestamp();
        let mut touched_entities: Vec<String> = Vec::new();
        let ids = {
            let mut conn = acquire_mutex(&self.conn);
            let tx = conn
                .transaction()
                .map_err(|e| storage_err("put_batch_begin", e))?;

            let mut ids = Vec::with_capacity(writes.len());
            for write in &writes {
                let id = Self::put_one(&tx, write, now)?;
                if id == write.memory.id {
                    // Fresh insert; entity writes affect cached queries.
                    touched_entities.extend(write.mentions.iter().map(|e| e.name.clone()));
                }
                ids.push(id);
            }

            tx.commit().map_err(|e| storage_err("put_batch_commit", e))?;
            ids
        };

        metrics::counter!("memories_written_total").increment(ids.len() as u64);
        self.cache.invalidate_for_write(&touched_entities);
        Ok(ids)
    }

    fn put_one(tx: &rusqlite::Transaction<'_>, write: &MemoryWrite, now: u64) -> Result<MemoryId> {
        let memory = &write.memory;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM memories WHERE content_hash = ?1",
                [&memory.content_hash],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| storage_err("put_dedup_lookup", e))?;

        if let Some(id) = existing {
            tx.execute(
                "UPDATE memories
                 SET access_count = access_count + 1,
                     accessed_at  = MAX(accessed_at, ?2)
                 WHERE id = ?1",
                params![id, now as i64],
            )
            .map_err(|e| storage_err("put_dedup_touch", e))?;
            tracing::debug!(memory_id = %id, "duplicate content collapsed to touch");
            metrics::counter!("memories_deduplicated_total").increment(1);
            return Ok(MemoryId::new(id));
        }

        let entities_json = serde_json::to_string(&memory.entities)
            .map_err(|e| storage_err("serialize_entities", e))?;
        let metadata_json = serde_json::to_string(&memory.metadata)
            .map_err(|e| storage_err("serialize_metadata", e))?;

        tx.execute(
            "INSERT INTO memories
             (id, content, content_hash, memory_type, importance, confidence,
              created_at, valid_from, valid_to, accessed_at, access_count,
              source_type, user_id, session_id, agent_id, entities, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                memory.id.as_str(),
                memory.content,
                memory.content_hash,
                memory.memory_type.as_str(),
                memory.importance,
                memory.confidence,
                memory.created_at as i64,
                memory.valid_from as i64,
                memory.valid_to.map(|v| v as i64),
                memory.accessed_at as i64,
                memory.access_count as i64,
                memory.source_type,
                memory.user_id,
                memory.session_id,
                memory.agent_id,
                entities_json,
                metadata_json,
            ],
        )
        .map_err(|e| storage_err("insert_memory", e))?;

        for entity in &write.mentions {
            let entity_id = Self::upsert_entity(tx, entity, now)?;
            tx.execute(
                "INSERT OR IGNORE INTO mentions (memory_id, entity_id, confidence)
                 VALUES (?1, ?2, ?3)",
                params![memory.id.as_str(), entity_id, entity.confidence],
            )
            .map_err(|e| storage_err("insert_mention", e))?;
        }

        Ok(memory.id.clone())
    }

    fn upsert_entity(
        tx: &rusqlite::Transaction<'_>,
        entity: &RecognizedEntity,
        now: u64,
    ) -> Result<String> {
        let name_lower = entity.name.to_lowercase();
        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM entities WHERE name_lower = ?1 AND entity_type = ?2",
                params![name_lower, entity.entity_type.as_str()],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| storage_err("entity_lookup", e))?;

        if let Some(id) = existing {
            tx.execute(
                "UPDATE entities
                 SET last_seen = ?2, mention_count = mention_count + 1
                 WHERE id = ?1",
                params![id, now as i64],
            )
            .map_err(|e| storage_err("entity_update", e))?;
            return Ok(id);
        }

        let id = crate::models::EntityId::generate().as_str().to_string();
        tx.execute(
            "INSERT INTO entities
             (id, name, name_lower, entity_type, first_seen, last_seen, mention_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)",
            params![
                id,
                entity.name,
                name_lower,
                entity.entity_type.as_str(),
                now as i64
            ],
        )
        .map_err(|e| storage_err("entity_insert", e))?;
        Ok(id)
    }

    /// Bumps `access_count` and advances `accessed_at` for a set of
    /// memories in one statement.
    ///
    /// Callers on the hook path pass a zero timeout and elide the touch on
    /// [`Error::Busy`]; the update only increments and takes
    /// `MAX(accessed_at, now)`, so monotonicity holds regardless.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] under lock contention, [`Error::Storage`]
    /// otherwise.
    pub fn touch_batch(&self, ids: &[MemoryId], lock_timeout: Duration) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut db_lock = self.lock_handle(lock_timeout, "touch_batch")?;
        let _file_guard = db_lock.exclusive(lock_timeout, "touch_batch")?;

        let now = current_timestamp();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE memories
             SET access_count = access_count + 1, accessed_at = MAX(accessed_at, {})
             WHERE id IN ({placeholders})",
            now as i64
        );

        let conn = acquire_mutex(&self.conn);
        let updated = conn
            .execute(
                &sql,
                params_from_iter(ids.iter().map(|id| id.as_str().to_string())),
            )
            .map_err(|e| storage_err("touch_batch", e))?;
        Ok(updated)
    }

    /// Fetches a memory by id. Point reads skip the file lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure; an unknown id is
    /// `Ok(None)`.
    pub fn get(&self, id: &MemoryId) -> Result<Option<Memory>> {
        let conn = acquire_mutex(&self.conn);
        let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1");
        let row = conn
            .query_row(&sql, [id.as_str()], MemoryRow::from_row)
            .optional()
            .map_err(|e| storage_err("get_memory", e))?;
        Ok(row.map(build_memory_from_row))
    }

    /// Applies a partial update, returning the updated memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] under lock contention, [`Error::Storage`]
    /// otherwise. An unknown id is `Ok(None)`.
    pub fn update(
        &self,
        id: &MemoryId,
        patch: MemoryPatch,
        lock_timeout: Duration,
    ) -> Result<Option<Memory>> {
        let mut db_lock = self.lock_handle(lock_timeout, "update")?;
        let _file_guard = db_lock.exclusive(lock_timeout, "update")?;

        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(content) = patch.content {
            sets.push("content = ?".to_string());
            values.push(Value::from(content.clone()));
            sets.push("content_hash = ?".to_string());
            values.push(Value::from(crate::dedup::ContentHasher::hash(&content)));
        }
        if let Some(importance) = patch.importance {
            sets.push("importance = ?".to_string());
            values.push(Value::from(importance));
        }
        if let Some(confidence) = patch.confidence {
            sets.push("confidence = ?".to_string());
            values.push(Value::from(confidence));
        }
        if let Some(valid_to) = patch.valid_to {
            sets.push("valid_to = ?".to_string());
            values.push(valid_to.map_or(Value::Null, |v| Value::from(v as i64)));
        }
        if let Some(metadata) = patch.metadata {
            sets.push("metadata = ?".to_string());
            values.push(Value::from(
                serde_json::to_string(&metadata).map_err(|e| storage_err("serialize_metadata", e))?,
            ));
        }

        if !sets.is_empty() {
            // Rewrite `?` to numbered placeholders, with the id last.
            let assignments: Vec<String> = sets
                .iter()
                .enumerate()
                .map(|(i, s)| s.replace('?', &format!("?{}", i + 1)))
                .collect();
            let sql = format!(
                "UPDATE memories SET {} WHERE id = ?{}",
                assignments.join(", "),
                sets.len() + 1
            );
            values.push(Value::from(id.as_str().to_string()));

            let conn = acquire_mutex(&self.conn);
            conn.execute(&sql, params_from_iter(values))
                .map_err(|e| storage_err("update_memory", e))?;
        }
        drop(_file_guard);
        drop(db_lock);

        // Mutations can change validity or content; drop the whole cache.
        self.cache.clear();
        self.get(id)
    }

    /// Sets `valid_to`, soft-invalidating the memory from `at` onward.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] under lock contention, [`Error::Storage`]
    /// otherwise.
    pub fn invalidate(&self, id: &MemoryId, at: u64, lock_timeout: Duration) -> Result<bool> {
        let mut db_lock = self.lock_handle(lock_timeout, "invalidate")?;
        let _file_guard = db_lock.exclusive(lock_timeout, "invalidate")?;

        let conn = acquire_mutex(&self.conn);
        let updated = conn
            .execute(
                "UPDATE memories SET valid_to = ?2 WHERE id = ?1",
                params![id.as_str(), at as i64],
            )
            .map_err(|e| storage_err("invalidate_memory", e))?;
        drop(conn);
        drop(_file_guard);
        drop(db_lock);

        self.cache.clear();
        Ok(updated > 0)
    }

    /// Physically deletes a memory and (via cascade) its edges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] under lock contention, [`Error::Storage`]
    /// otherwise.
    pub fn delete(&self, id: &MemoryId, lock_timeout: Duration) -> Result<bool> {
        let mut db_lock = self.lock_handle(lock_timeout, "delete")?;
        let _file_guard = db_lock.exclusive(lock_timeout, "delete")?;

        let conn = acquire_mutex(&self.conn);
        let deleted = conn
            .execute("DELETE FROM memories WHERE id = ?1", [id.as_str()])
            .map_err(|e| storage_err("delete_memory", e))?;
        drop(conn);
        drop(_file_guard);
        drop(db_lock);

        self.cache.clear();
        Ok(deleted > 0)
    }

    /// Adds a RELATES_TO edge. A `"supersedes"` edge also invalidates the
    /// target from now on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] under lock contention, [`Error::Storage`]
    /// otherwise.
    pub fn add_relation(
        &self,
        src: &MemoryId,
        dst: &MemoryId,
        kind: &str,
        lock_timeout: Duration,
    ) -> Result<()> {
        let mut db_lock = self.lock_handle(lock_timeout, "add_relation")?;
        let _file_guard = db_lock.exclusive(lock_timeout, "add_relation")?;

        let now = current_timestamp();
        {
            let mut conn = acquire_mutex(&self.conn);
            let tx = conn
                .transaction()
                .map_err(|e| storage_err("add_relation_begin", e))?;
            tx.execute(
                "INSERT OR IGNORE INTO relates_to (src_id, dst_id, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![src.as_str(), dst.as_str(), kind, now as i64],
            )
            .map_err(|e| storage_err("insert_relation", e))?;

            if kind == "supersedes" {
                tx.execute(
                    "UPDATE memories SET valid_to = ?2 WHERE id = ?1",
                    params![dst.as_str(), now as i64],
                )
                .map_err(|e| storage_err("supersede_invalidate", e))?;
            }
            tx.commit().map_err(|e| storage_err("add_relation_commit", e))?;
        }
        drop(_file_guard);
        drop(db_lock);

        self.cache.clear();
        Ok(())
    }

    /// Returns outgoing relations of a memory as `(kind, dst_id)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn relations_of(&self, id: &MemoryId) -> Result<Vec<(String, MemoryId)>> {
        let conn = acquire_mutex(&self.conn);
        let mut stmt = conn
            .prepare("SELECT kind, dst_id FROM relates_to WHERE src_id = ?1")
            .map_err(|e| storage_err("relations_of", e))?;
        let rows = stmt
            .query_map([id.as_str()], |r| {
                Ok((r.get::<_, String>(0)?, MemoryId::new(r.get::<_, String>(1)?)))
            })
            .map_err(|e| storage_err("relations_of", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| storage_err("relations_of", e))?;
        Ok(rows)
    }

    /// Keyword query: memories whose content contains any keyword,
    /// valid-only by default, ordered by importance then recency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] when the shared lock is contended past the
    /// timeout, [`Error::Storage`] otherwise.
    pub fn query_by_keywords(
        &self,
        keywords: &[String],
        limit: usize,
        filters: &QueryFilters,
        lock_timeout: Duration,
    ) -> Result<Vec<Memory>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let signature =
            QueryCache::signature(QueryKind::Keyword, keywords, &filters.digest());
        if let Some(hit) = self.cache.get(&signature) {
            return Ok(hit.into_iter().take(limit).collect());
        }

        let mut db_lock = self.lock_handle(lock_timeout, "query_by_keywords")?;
        let _file_guard = db_lock.shared(lock_timeout, "query_by_keywords")?;

        let mut values: Vec<Value> = Vec::new();
        let like_clause = keywords
            .iter()
            .map(|kw| {
                values.push(Value::from(format!("%{kw}%")));
                format!("content LIKE ?{}", values.len())
            })
            .collect::<Vec<_>>()
            .join(" OR ");

        let filter_clause = Self::filter_sql(filters, &mut values);
        values.push(Value::from(limit as i64));
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE ({like_clause}) {filter_clause}
             ORDER BY importance DESC, created_at DESC, id ASC
             LIMIT ?{}",
            values.len()
        );

        let memories = self.run_query(&sql, values, "query_by_keywords")?;
        drop(_file_guard);
        drop(db_lock);

        self.cache.put(
            signature,
            QueryKind::Keyword,
            HashSet::new(),
            memories.clone(),
        );
        Ok(memories)
    }

    /// Entity query: memories joined through MENTIONS edges whose entity
    /// name (case-insensitive) is in `names`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] when the shared lock is contended past the
    /// timeout, [`Error::Storage`] otherwise.
    pub fn query_by_entities(
        &self,
        names: &[String],
        limit: usize,
        filters: &QueryFilters,
        lock_timeout: Duration,
    ) -> Result<Vec<Memory>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let signature = QueryCache::signature(QueryKind::Entity, names, &filters.digest());
        if let Some(hit) = self.cache.get(&signature) {
            return Ok(hit.into_iter().take(limit).collect());
        }

        let mut db_lock = self.lock_handle(lock_timeout, "query_by_entities")?;
        let _file_guard = db_lock.shared(lock_timeout, "query_by_entities")?;

        let mut values: Vec<Value> = Vec::new();
        let placeholders = names
            .iter()
            .map(|n| {
                values.push(Value::from(n.to_lowercase()));
                format!("?{}", values.len())
            })
            .collect::<Vec<_>>()
            .join(", ");

        let filter_clause = Self::filter_sql(filters, &mut values);
        values.push(Value::from(limit as i64));
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE id IN (
                 SELECT mn.memory_id FROM mentions mn
                 JOIN entities e ON e.id = mn.entity_id
                 WHERE e.name_lower IN ({placeholders})
             ) {filter_clause}
             ORDER BY importance DESC, created_at DESC, id ASC
             LIMIT ?{}",
            values.len()
        );

        let memories = self.run_query(&sql, values, "query_by_entities")?;
        drop(_file_guard);
        drop(db_lock);

        let deps: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
        self.cache
            .put(signature, QueryKind::Entity, deps, memories.clone());
        Ok(memories)
    }

    /// Recency query: memories created after `since`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] when the shared lock is contended past the
    /// timeout, [`Error::Storage`] otherwise.
    pub fn query_recent(
        &self,
        since: u64,
        limit: usize,
        filters: &QueryFilters,
        lock_timeout: Duration,
    ) -> Result<Vec<Memory>> {
        let signature = QueryCache::signature(
            QueryKind::Recent,
            &[since.to_string()],
            &filters.digest(),
        );
        if let Some(hit) = self.cache.get(&signature) {
            return Ok(hit.into_iter().take(limit).collect());
        }

        let mut db_lock = self.lock_handle(lock_timeout, "query_recent")?;
        let _file_guard = db_lock.shared(lock_timeout, "query_recent")?;

        let mut values: Vec<Value> = vec![Value::from(since as i64)];
        let filter_clause = Self::filter_sql(filters, &mut values);
        values.push(Value::from(limit as i64));
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE created_at > ?1 {filter_clause}
             ORDER BY created_at DESC, id ASC
             LIMIT ?{}",
            values.len()
        );

        let memories = self.run_query(&sql, values, "query_recent")?;
        drop(_file_guard);
        drop(db_lock);

        self.cache.put(
            signature,
            QueryKind::Recent,
            HashSet::new(),
            memories.clone(),
        );
        Ok(memories)
    }

    /// Builds the shared filter suffix, appending parameter values.
    fn filter_sql(filters: &QueryFilters, values: &mut Vec<Value>) -> String {
        let mut clause = String::new();
        if !filters.include_invalid {
            values.push(Value::from(current_timestamp() as i64));
            clause.push_str(&format!(
                " AND (valid_to IS NULL OR valid_to > ?{})",
                values.len()
            ));
        }
        if let Some(user) = &filters.user_id {
            values.push(Value::from(user.clone()));
            clause.push_str(&format!(
                " AND (user_id = ?{} OR user_id IS NULL)",
                values.len()
            ));
        }
        if let Some(ty) = filters.memory_type {
            values.push(Value::from(ty.as_str().to_string()));
            clause.push_str(&format!(" AND memory_type = ?{}", values.len()));
        }
        clause
    }

    fn run_query(
        &self,
        sql: &str,
        values: Vec<Value>,
        operation: &str,
    ) -> Result<Vec<Memory>> {
        let conn = acquire_mutex(&self.conn);
        let mut stmt = conn.prepare(sql).map_err(|e| storage_err(operation, e))?;
        let rows = stmt
            .query_map(params_from_iter(values), MemoryRow::from_row)
            .map_err(|e| storage_err(operation, e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| storage_err(operation, e))?;
        Ok(rows.into_iter().map(build_memory_from_row).collect())
    }

    /// Distinct non-null user ids, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn distinct_users(&self) -> Result<Vec<String>> {
        let conn = acquire_mutex(&self.conn);
        let mut stmt = conn
            .prepare("SELECT DISTINCT user_id FROM memories WHERE user_id IS NOT NULL ORDER BY user_id")
            .map_err(|e| storage_err("distinct_users", e))?;
        let users = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(|e| storage_err("distinct_users", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| storage_err("distinct_users", e))?;
        Ok(users)
    }

    /// Valid memories owned by exactly `user`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn memories_by_user(&self, user: &str, limit: usize) -> Result<Vec<Memory>> {
        let now = current_timestamp();
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE user_id = ?1 AND (valid_to IS NULL OR valid_to > ?2)
             ORDER BY created_at DESC, id ASC
             LIMIT ?3"
        );
        self.run_query(
            &sql,
            vec![
                Value::from(user.to_string()),
                Value::from(now as i64),
                Value::from(limit as i64),
            ],
            "memories_by_user",
        )
    }

    /// Physically deletes memories whose validity ended more than `grace`
    /// ago, plus entities left with no mentions. Returns the number of
    /// memories removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] under lock contention, [`Error::Storage`]
    /// otherwise.
    pub fn prune_expired(&self, grace: Duration, lock_timeout: Duration) -> Result<usize> {
        let mut db_lock = self.lock_handle(lock_timeout, "prune_expired")?;
        let _file_guard = db_lock.exclusive(lock_timeout, "prune_expired")?;

        let cutoff = current_timestamp().saturating_sub(grace.as_secs());
        let removed = {
            let mut conn = acquire_mutex(&self.conn);
            let tx = conn
                .transaction()
                .map_err(|e| storage_err("prune_begin", e))?;
            let removed = tx
                .execute(
                    "DELETE FROM memories WHERE valid_to IS NOT NULL AND valid_to < ?1",
                    params![cutoff as i64],
                )
                .map_err(|e| storage_err("prune_memories", e))?;
            tx.execute(
                "DELETE FROM entities
                 WHERE id NOT IN (SELECT DISTINCT entity_id FROM mentions)",
                [],
            )
            .map_err(|e| storage_err("prune_entities", e))?;
            tx.commit().map_err(|e| storage_err("prune_commit", e))?;
            removed
        };
        drop(_file_guard);
        drop(db_lock);

        if removed > 0 {
            tracing::info!(removed, "pruned expired memories");
            self.cache.clear();
        }
        Ok(removed)
    }

    /// On-disk size of the database including its WAL.
    #[must_use]
    pub fn db_size_bytes(&self) -> u64 {
        let main = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);
        let wal = std::fs::metadata(self.db_path.with_extension("db-wal"))
            .map(|m| m.len())
            .unwrap_or(0);
        main + wal
    }

    /// Aggregate statistics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn stats(&self) -> Result<MemoryStats> {
        let now = current_timestamp();
        let conn = acquire_mutex(&self.conn);

        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))
            .map_err(|e| storage_err("stats", e))?;
        let valid: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE valid_to IS NULL OR valid_to > ?1",
                params![now as i64],
                |r| r.get(0),
            )
            .map_err(|e| storage_err("stats", e))?;
        let entities: i64 = conn
            .query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))
            .map_err(|e| storage_err("stats", e))?;
        let users: i64 = conn
            .query_row(
                "SELECT COUNT(DISTINCT user_id) FROM memories WHERE user_id IS NOT NULL",
                [],
                |r| r.get(0),
            )
            .map_err(|e| storage_err("stats", e))?;

        let mut stmt = conn
            .prepare(
                "SELECT memory_type, COUNT(*) FROM memories
                 WHERE valid_to IS NULL OR valid_to > ?1
                 GROUP BY memory_type",
            )
            .map_err(|e| storage_err("stats", e))?;
        let by_type: BTreeMap<String, u64> = stmt
            .query_map(params![now as i64], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64))
            })
            .map_err(|e| storage_err("stats", e))?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .map_err(|e| storage_err("stats", e))?;
        drop(stmt);
        drop(conn);

        Ok(MemoryStats {
            total_memories: total as u64,
            valid_memories: valid as u64,
            memories_by_type: by_type,
            entity_count: entities as u64,
            user_count: users as u64,
            db_size_bytes: self.db_size_bytes(),
            cache_hit_rate: self.cache.hit_rate(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;

    const FG: Duration = Duration::from_secs(2);

    fn open_store() -> (tempfile::TempDir, GraphStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::open(&dir.path().join("memories.db"), Duration::from_secs(300))
            .unwrap();
        (dir, store)
    }

    fn write(content: &str, ty: MemoryType, entities: &[(&str, EntityType)]) -> MemoryWrite {
        let mut memory = Memory::new(content, ty, current_timestamp());
        memory.entities = entities.iter().map(|(n, _)| (*n).to_string()).collect();
        MemoryWrite {
            memory,
            mentions: entities
                .iter()
                .map(|(n, t)| RecognizedEntity::new(*n, *t, 0.9))
                .collect(),
        }
    }

    #[test]
    fn test_put_and_get_roundtrip() {
        let (_dir, store) = open_store();
        let w = write("we use Postgres", MemoryType::Decision, &[("Postgres", EntityType::Technology)]);
        let expected_id = w.memory.id.clone();

        let ids = store.put_batch(vec![w], FG).unwrap();
        assert_eq!(ids, vec![expected_id.clone()]);

        let fetched = store.get(&expected_id).unwrap().unwrap();
        assert_eq!(fetched.content, "we use Postgres");
        assert_eq!(fetched.memory_type, MemoryType::Decision);
        assert_eq!(fetched.entities, vec!["Postgres"]);
    }

    #[test]
    fn test_get_unknown_is_none() {
        let (_dir, store) = open_store();
        assert!(store.get(&MemoryId::new("ghost")).unwrap().is_none());
    }

    #[test]
    fn test_hash_collision_collapses_to_touch() {
        let (_dir, store) = open_store();
        let first = write("I prefer Python", MemoryType::Preference, &[]);
        let first_id = store.put_batch(vec![first], FG).unwrap()[0].clone();

        // Different surface form, same normalized content.
        let second = write("  i  PREFER python ", MemoryType::Preference, &[]);
        let second_id = store.put_batch(vec![second], FG).unwrap()[0].clone();

        assert_eq!(first_id, second_id);
        let memory = store.get(&first_id).unwrap().unwrap();
        assert_eq!(memory.access_count, 2);

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_memories, 1);
    }

    #[test]
    fn test_keyword_query_valid_only() {
        let (_dir, store) = open_store();
        let live = write("Postgres handles the workload", MemoryType::Decision, &[]);
        let mut dead = write("Postgres was rejected", MemoryType::Decision, &[]);
        dead.memory.valid_to = Some(current_timestamp() - 10);

        store.put_batch(vec![live, dead], FG).unwrap();

        let results = store
            .query_by_keywords(
                &["postgres".to_string()],
                10,
                &QueryFilters::default(),
                FG,
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("workload"));

        let all = store
            .query_by_keywords(
                &["postgres".to_string()],
                10,
                &QueryFilters {
                    include_invalid: true,
                    ..QueryFilters::default()
                },
                FG,
            )
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_entity_query_joins_mentions() {
        let (_dir, store) = open_store();
        let tagged = write(
            "the API uses Redis for sessions",
            MemoryType::Decision,
            &[("Redis", EntityType::Technology)],
        );
        let untagged = write("unrelated note about sessions", MemoryType::Context, &[]);
        store.put_batch(vec![tagged, untagged], FG).unwrap();

        let results = store
            .query_by_entities(&["redis".to_string()], 10, &QueryFilters::default(), FG)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("Redis"));
    }

    #[test]
    fn test_recent_query_ordering() {
        let (_dir, store) = open_store();
        let now = current_timestamp();
        let mut old = write("old memory", MemoryType::Semantic, &[]);
        old.memory.created_at = now - 30 * 86_400;
        let mut fresh = write("fresh memory", MemoryType::Semantic, &[]);
        fresh.memory.created_at = now - 60;
        store.put_batch(vec![old, fresh], FG).unwrap();

        let recent = store
            .query_recent(now - 7 * 86_400, 10, &QueryFilters::default(), FG)
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "fresh memory");
    }

    #[test]
    fn test_touch_batch_monotonic() {
        let (_dir, store) = open_store();
        let w = write("touch me", MemoryType::Semantic, &[]);
        let id = store.put_batch(vec![w], FG).unwrap()[0].clone();

        let before = store.get(&id).unwrap().unwrap();
        store.touch_batch(std::slice::from_ref(&id), FG).unwrap();
        store.touch_batch(std::slice::from_ref(&id), FG).unwrap();
        let after = store.get(&id).unwrap().unwrap();

        assert_eq!(after.access_count, before.access_count + 2);
        assert!(after.accessed_at >= before.accessed_at);
    }

    #[test]
    fn test_update_patch() {
        let (_dir, store) = open_store();
        let w = write("original", MemoryType::Semantic, &[]);
        let id = store.put_batch(vec![w], FG).unwrap()[0].clone();

        let updated = store
            .update(
                &id,
                MemoryPatch {
                    importance: Some(0.9),
                    ..MemoryPatch::default()
                },
                FG,
            )
            .unwrap()
            .unwrap();
        assert!((updated.importance - 0.9).abs() < f64::EPSILON);

        assert!(store
            .update(&MemoryId::new("ghost"), MemoryPatch::default(), FG)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_invalidate_and_delete() {
        let (_dir, store) = open_store();
        let w = write("ephemeral", MemoryType::Semantic, &[]);
        let id = store.put_batch(vec![w], FG).unwrap()[0].clone();

        assert!(store.invalidate(&id, current_timestamp() - 1, FG).unwrap());
        let results = store
            .query_by_keywords(&["ephemeral".to_string()], 10, &QueryFilters::default(), FG)
            .unwrap();
        assert!(results.is_empty());

        assert!(store.delete(&id, FG).unwrap());
        assert!(!store.delete(&id, FG).unwrap());
        assert!(store.get(&id).unwrap().is_none());
    }

    #[test]
    fn test_supersedes_invalidates_target() {
        let (_dir, store) = open_store();
        let old = write("we use MySQL", MemoryType::Decision, &[]);
        let new = write("we use Postgres", MemoryType::Decision, &[]);
        let old_id = old.memory.id.clone();
        let new_id = new.memory.id.clone();
        store.put_batch(vec![old, new], FG).unwrap();

        store.add_relation(&new_id, &old_id, "supersedes", FG).unwrap();

        let old_memory = store.get(&old_id).unwrap().unwrap();
        assert!(old_memory.valid_to.is_some());
        let relations = store.relations_of(&new_id).unwrap();
        assert_eq!(relations, vec![("supersedes".to_string(), old_id)]);
    }

    #[test]
    fn test_user_filtering() {
        let (_dir, store) = open_store();
        let mut alice = write("alice note", MemoryType::Semantic, &[]);
        alice.memory.user_id = Some("alice".to_string());
        let mut bob = write("bob note", MemoryType::Semantic, &[]);
        bob.memory.user_id = Some("bob".to_string());
        let shared = write("shared note", MemoryType::Semantic, &[]);
        store.put_batch(vec![alice, bob, shared], FG).unwrap();

        assert_eq!(store.distinct_users().unwrap(), vec!["alice", "bob"]);
        assert_eq!(store.memories_by_user("alice", 10).unwrap().len(), 1);

        // Scoped queries see own + unowned memories.
        let filtered = store
            .query_by_keywords(
                &["note".to_string()],
                10,
                &QueryFilters {
                    user_id: Some("alice".to_string()),
                    ..QueryFilters::default()
                },
                FG,
            )
            .unwrap();
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_prune_expired() {
        let (_dir, store) = open_store();
        let mut dead = write(
            "long gone",
            MemoryType::Status,
            &[("Ghost", EntityType::Other)],
        );
        dead.memory.valid_to = Some(current_timestamp() - 100_000);
        let live = write("still here", MemoryType::Semantic, &[]);
        store.put_batch(vec![dead, live], FG).unwrap();

        let removed = store.prune_expired(Duration::from_secs(3600), FG).unwrap();
        assert_eq!(removed, 1);

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_memories, 1);
        assert_eq!(stats.entity_count, 0, "orphaned entity must be pruned");
    }

    #[test]
    fn test_zero_timeout_write_fails_fast_when_locked() {
        let (dir, store) = open_store();
        let db = dir.path().join("memories.db");

        // Simulate another process holding the exclusive lock.
        let mut holder = DbLock::new(&db).unwrap();
        let _held = holder.exclusive(Duration::ZERO, "holder").unwrap();

        let w = write("blocked", MemoryType::Semantic, &[]);
        let result = store.put_batch(vec![w], Duration::ZERO);
        assert!(matches!(result, Err(Error::Busy { .. })));
    }

    #[test]
    fn test_stats_counts() {
        let (_dir, store) = open_store();
        store
            .put_batch(
                vec![
                    write("a decision", MemoryType::Decision, &[("X", EntityType::Technology)]),
                    write("a fact", MemoryType::Semantic, &[]),
                ],
                FG,
            )
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.valid_memories, 2);
        assert_eq!(stats.memories_by_type.get("decision"), Some(&1));
        assert_eq!(stats.entity_count, 1);
        assert!(stats.db_size_bytes > 0);
    }

    #[test]
    fn test_cached_query_skips_lock() {
        let (dir, store) = open_store();
        let db = dir.path().join("memories.db");
        store
            .put_batch(vec![write("cache warm Postgres", MemoryType::Decision, &[])], FG)
            .unwrap();

        // Warm the cache.
        let first = store
            .query_by_keywords(&["postgres".to_string()], 10, &QueryFilters::default(), FG)
            .unwrap();
        assert_eq!(first.len(), 1);

        // With the lock held elsewhere, the cached read still succeeds.
        let mut holder = DbLock::new(&db).unwrap();
        let _held = holder.exclusive(Duration::ZERO, "holder").unwrap();
        let second = store
            .query_by_keywords(
                &["postgres".to_string()],
                10,
                &QueryFilters::default(),
                Duration::ZERO,
            )
            .unwrap();
        assert_eq!(second.len(), 1);
    }
}
