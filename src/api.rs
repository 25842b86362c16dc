//! Public API façade.
//!
//! [`KuzuMemory`] wires the extraction pipeline, graph store, recall
//! engine, hook-path dedup cache, and learning queue behind the two-call
//! consumer pattern: `generate_memories` ingests, `attach_memories`
//! recalls.

use crate::config::MemoryConfig;
use crate::dedup::RecentWriteChecker;
use crate::extraction::{EntityRecognizer, ExtractionHints, ExtractionPipeline};
use crate::models::{
    Memory, MemoryContext, MemoryId, MemoryType, PatternGroup, RecallStrategy, TaskId,
    TaskPriority, TaskStatus,
};
use crate::queue::{LearningQueue, QueueConfig, TaskHandler};
use crate::recall::{RecallEngine, RecallOptions};
use crate::storage::{GraphStore, MemoryStats, MemoryWrite, QueryFilters};
use crate::{Error, Result, current_timestamp};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Options for one `generate_memories` call.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Override the owner for these memories.
    pub user_id: Option<String>,
    /// Session scope tag.
    pub session_id: Option<String>,
    /// Agent scope tag.
    pub agent_id: Option<String>,
    /// Extra metadata merged into every stored memory.
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
    /// Type hint for remember-directive matches (the git-commit adapter
    /// passes `Episodic`).
    pub type_hint: Option<MemoryType>,
}

/// Options for one `attach_memories` call.
#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    /// Maximum memories in the bundle; defaults to the configured limit.
    pub limit: Option<usize>,
    /// Strategy; defaults to the configured strategy.
    pub strategy: Option<RecallStrategy>,
    /// Restrict recall to this user's memories (plus unowned ones).
    pub user_id: Option<String>,
    /// Restrict recall to one memory type.
    pub memory_type: Option<MemoryType>,
}

/// Shared internals, referenced by the learning-queue workers.
struct Core {
    store: Arc<GraphStore>,
    recent: RecentWriteChecker,
    config: MemoryConfig,
    user_id: Option<String>,
}

impl Core {
    /// The synchronous write path: extract, dedup, persist, link.
    fn ingest(
        &self,
        text: &str,
        source: &str,
        options: &GenerateOptions,
    ) -> Result<Vec<MemoryId>> {
        let candidates = ExtractionPipeline::extract(
            text,
            ExtractionHints {
                memory_type: options.type_hint,
            },
        );
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let lock_timeout = self.config.lock_timeout();
        let user_id = options.user_id.clone().or_else(|| self.user_id.clone());
        let now = current_timestamp();

        let mut ids: Vec<MemoryId> = Vec::new();
        let mut writes: Vec<MemoryWrite> = Vec::new();
        let mut corrections: Vec<(MemoryId, MemoryType, Vec<String>)> = Vec::new();

        for candidate in candidates {
            // Hook invocations suppress re-writes of just-seen content
            // without touching the store at all (I6); the durable hash
            // index still collapses anything that slips through.
            if self.config.hook_mode {
                if let Some(existing) = self.recent.check(&candidate.content_hash) {
                    ids.push(existing);
                    continue;
                }
            }

            let mut metadata = options.metadata.clone().unwrap_or_default();
            if let Some(sentiment) = candidate.meta.sentiment {
                if let Ok(value) = serde_json::to_value(sentiment) {
                    metadata.insert("sentiment".to_string(), value);
                }
            }
            if !candidate.meta.keywords.is_empty() {
                if let Ok(value) = serde_json::to_value(&candidate.meta.keywords) {
                    metadata.insert("keywords".to_string(), value);
                }
            }
            if let Some(group) = candidate.meta.pattern_group {
                metadata.insert(
                    "pattern_group".to_string(),
                    serde_json::Value::String(group.as_str().to_string()),
                );
            }

            let entity_names: Vec<String> =
                candidate.entities.iter().map(|e| e.name.clone()).collect();
            let memory = Memory {
                id: MemoryId::generate(),
                content: candidate.content,
                content_hash: candidate.content_hash,
                memory_type: candidate.memory_type,
                importance: candidate.importance,
                confidence: candidate.confidence,
                created_at: now,
                valid_from: now,
                valid_to: self
                    .config
                    .effective_ttl(candidate.memory_type)
                    .map(|ttl| now + ttl.as_secs()),
                accessed_at: now,
                access_count: 1,
                source_type: source.to_string(),
                user_id: user_id.clone(),
                session_id: options.session_id.clone(),
                agent_id: options.agent_id.clone(),
                entities: entity_names.clone(),
                metadata,
            };

            if candidate.meta.pattern_group == Some(PatternGroup::Correction) {
                corrections.push((memory.id.clone(), memory.memory_type, entity_names));
            }
            writes.push(MemoryWrite {
                memory,
                mentions: candidate.entities,
            });
        }

        if writes.is_empty() {
            return Ok(ids);
        }

        let written = match self.store.put_batch(writes.clone(), lock_timeout) {
            Ok(written) => written,
            Err(Error::Busy { .. }) if self.config.hook_mode => {
                tracing::debug!("store locked, hook ingest skipped");
                metrics::counter!("ingest_skipped_total").increment(1);
                return Ok(Vec::new());
            },
            Err(e) => return Err(e),
        };

        for (write, id) in writes.iter().zip(&written) {
            self.recent.record(&write.memory.content_hash, id);
        }

        // A correction supersedes the most recent valid memory of the same
        // type that shares an entity with it.
        for (new_id, memory_type, entity_names) in corrections {
            // The id survives dedup collapse only if the row is actually new.
            if !written.contains(&new_id) || entity_names.is_empty() {
                continue;
            }
            if let Some(target) = self.find_supersede_target(memory_type, &entity_names, &written) {
                match self.store.add_relation(&new_id, &target, "supersedes", lock_timeout) {
                    Ok(()) => tracing::debug!(
                        superseded = %target,
                        by = %new_id,
                        "correction superseded an earlier memory"
                    ),
                    // The memory itself landed; a contended supersede edge
                    // is not worth failing a hook over.
                    Err(Error::Busy { .. }) if self.config.hook_mode => {
                        tracing::debug!("store locked, supersede edge elided");
                    },
                    Err(e) => return Err(e),
                }
            }
        }

        ids.extend(written);
        Ok(ids)
    }

    fn find_supersede_target(
        &self,
        memory_type: MemoryType,
        entity_names: &[String],
        exclude: &[MemoryId],
    ) -> Option<MemoryId> {
        let filters = QueryFilters {
            memory_type: Some(memory_type),
            ..QueryFilters::default()
        };
        let candidates = self
            .store
            .query_by_entities(
                entity_names,
                10,
                &filters,
                self.config.lock_timeout(),
            )
            .ok()?;
        candidates
            .into_iter()
            .filter(|m| !exclude.contains(&m.id))
            .max_by_key(|m| m.created_at)
            .map(|m| m.id)
    }
}

/// The embedded memory store handle.
pub struct KuzuMemory {
    core: Arc<Core>,
    recall: RecallEngine,
    queue: LearningQueue,
}

impl KuzuMemory {
    /// Opens the store for a project.
    ///
    /// The database directory resolves as `KUZU_MEMORY_DB` env >
    /// `config.db_path` > `<project>/.kuzu-memory/`. A `config.yaml` in
    /// the store directory is merged over the passed configuration; env
    /// vars win over both.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid configuration,
    /// [`Error::Schema`] for a version mismatch, [`Error::Storage`] for
    /// filesystem failures.
    pub fn open(project_root: &Path, mut config: MemoryConfig) -> Result<Self> {
        crate::observability::init_logging();

        let store_dir = project_root.join(".kuzu-memory");
        let config_file = store_dir.join("config.yaml");
        if config_file.exists() {
            let raw = std::fs::read_to_string(&config_file)
                .map_err(|e| Error::Config(format!("cannot read {}: {e}", config_file.display())))?;
            config.merge_yaml(&raw)?;
        }
        config.apply_env();
        config.validate()?;

        let db_path = resolve_db_file(config.db_path.as_deref(), &store_dir);
        let store = Arc::new(GraphStore::open(&db_path, config.cache_ttl)?);

        let user_id = config.user_id_override.clone().or_else(|| {
            if config.auto_tag_git_user {
                detect_git_user(project_root)
            } else {
                None
            }
        });
        tracing::debug!(user = user_id.as_deref().unwrap_or("-"), "resolved user id");

        let core = Arc::new(Core {
            recent: RecentWriteChecker::with_defaults(&db_path),
            store: Arc::clone(&store),
            config: config.clone(),
            user_id,
        });

        let handler: TaskHandler = {
            let core = Arc::clone(&core);
            Arc::new(move |task| {
                let options = GenerateOptions {
                    user_id: task.user_id.clone(),
                    session_id: task.session_id.clone(),
                    ..GenerateOptions::default()
                };
                core.ingest(&task.text, &task.source, &options)
                    .map(|ids| format!("stored {} memories", ids.len()))
                    .map_err(|e| e.to_string())
            })
        };
        let queue = LearningQueue::new(
            &QueueConfig {
                workers: config.workers,
                max_queue: config.max_queue,
                task_ttl: Duration::from_secs(300),
            },
            handler,
        );

        Ok(Self {
            core,
            recall: RecallEngine::new(store),
            queue,
        })
    }

    /// Extracts and persists memories from free-form text.
    ///
    /// In hook mode a contended store is not an error: the call returns an
    /// empty id list ("skipped").
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] for foreground lock contention,
    /// [`Error::Storage`] for write failures.
    pub fn generate_memories(
        &self,
        text: &str,
        source: &str,
        options: Option<GenerateOptions>,
    ) -> Result<Vec<MemoryId>> {
        self.core
            .ingest(text, source, &options.unwrap_or_default())
    }

    /// Queues text for background ingestion; never blocks.
    pub fn generate_memories_async(
        &self,
        text: impl Into<String>,
        source: impl Into<String>,
        priority: TaskPriority,
    ) -> TaskId {
        self.queue.submit(
            text,
            source,
            priority,
            self.core.user_id.clone(),
            None,
        )
    }

    /// Stores one explicit memory verbatim, bypassing pattern matching.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty content, otherwise the
    /// write-path errors.
    pub fn remember(
        &self,
        content: &str,
        metadata: Option<BTreeMap<String, serde_json::Value>>,
    ) -> Result<MemoryId> {
        if content.trim().is_empty() {
            return Err(Error::InvalidInput("memory content is empty".to_string()));
        }

        let now = current_timestamp();
        let entities = EntityRecognizer::recognize(content);
        let mut memory = Memory::new(content, MemoryType::Semantic, now);
        memory.valid_to = self
            .core
            .config
            .effective_ttl(MemoryType::Semantic)
            .map(|ttl| now + ttl.as_secs());
        memory.importance = 0.9;
        memory.source_type = "explicit".to_string();
        memory.user_id = self.core.user_id.clone();
        memory.entities = entities.iter().map(|e| e.name.clone()).collect();
        if let Some(metadata) = metadata {
            memory.metadata = metadata;
        }
        let hash = memory.content_hash.clone();

        let id = self
            .core
            .store
            .put_memory(memory, &entities, self.core.config.lock_timeout())?;
        self.core.recent.record(&hash, &id);
        Ok(id)
    }

    /// Recalls relevant memories and formats an enhanced prompt.
    ///
    /// Infallible: contention and storage errors degrade to the original
    /// prompt (`skipped` marks hook-path contention).
    #[must_use]
    pub fn attach_memories(&self, prompt: &str, options: AttachOptions) -> MemoryContext {
        let config = &self.core.config;
        let recall_options = RecallOptions {
            limit: options.limit.unwrap_or(config.max_memories),
            strategy: options.strategy.unwrap_or(config.default_strategy),
            filters: QueryFilters {
                user_id: options.user_id.or_else(|| self.core.user_id.clone()),
                memory_type: options.memory_type,
                include_invalid: false,
            },
            lock_timeout: config.lock_timeout(),
        };
        self.recall.recall(prompt, &recall_options)
    }

    /// Most recently created valid memories, newest first.
    ///
    /// # Errors
    ///
    /// Returns the storage-layer errors.
    pub fn get_recent_memories(
        &self,
        limit: usize,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<Memory>> {
        self.core.store.query_recent(
            0,
            limit,
            &QueryFilters {
                memory_type,
                ..QueryFilters::default()
            },
            self.core.config.lock_timeout(),
        )
    }

    /// Valid memories owned by `user`.
    ///
    /// # Errors
    ///
    /// Returns the storage-layer errors.
    pub fn memories_by_user(&self, user: &str, limit: usize) -> Result<Vec<Memory>> {
        self.core.store.memories_by_user(user, limit)
    }

    /// All user ids present in the store.
    ///
    /// # Errors
    ///
    /// Returns the storage-layer errors.
    pub fn distinct_users(&self) -> Result<Vec<String>> {
        self.core.store.distinct_users()
    }

    /// Aggregate statistics.
    ///
    /// # Errors
    ///
    /// Returns the storage-layer errors.
    pub fn stats(&self) -> Result<MemoryStats> {
        self.core.store.stats()
    }

    /// Fetches one memory by id; unknown ids are `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the storage-layer errors.
    pub fn get(&self, id: &MemoryId) -> Result<Option<Memory>> {
        self.core.store.get(id)
    }

    /// Status of a queued learning task.
    #[must_use]
    pub fn task_status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.queue.status(id)
    }

    /// Waits for a learning task to reach a terminal status.
    #[must_use]
    pub fn wait_task(&self, id: &TaskId, timeout: Duration) -> Option<TaskStatus> {
        self.queue.wait(id, timeout)
    }

    /// Cancels a not-yet-started learning task.
    pub fn cancel_task(&self, id: &TaskId) -> bool {
        self.queue.cancel(id)
    }

    /// The resolved user id for this handle.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.core.user_id.as_deref()
    }

    /// Drains the learning queue and closes the handle.
    pub fn close(mut self, drain_timeout: Duration) {
        self.queue.drain(drain_timeout);
    }
}

/// Resolves the database file from an optional override.
///
/// An override with a file extension is used verbatim; a bare directory
/// gets the default `memories.db` file name.
fn resolve_db_file(override_path: Option<&Path>, store_dir: &Path) -> PathBuf {
    match override_path {
        Some(p) if p.extension().is_some() => p.to_path_buf(),
        Some(dir) => dir.join("memories.db"),
        None => store_dir.join("memories.db"),
    }
}

/// Reads the git identity for `user_id` tagging: repository config first,
/// then the global default; email preferred over name.
fn detect_git_user(project_root: &Path) -> Option<String> {
    let config = git2::Repository::discover(project_root)
        .ok()
        .and_then(|repo| repo.config().ok())
        .or_else(|| git2::Config::open_default().ok())?;

    config
        .get_string("user.email")
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| {
            config
                .get_string("user.name")
                .ok()
                .filter(|s| !s.is_empty())
        })
}
