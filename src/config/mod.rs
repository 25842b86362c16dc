//! Configuration management.
//!
//! Recognized keys mirror `config.yaml` in the store directory; unknown
//! keys are rejected at open with a clear error rather than silently
//! ignored. Environment variables `KUZU_MEMORY_DB` and `KUZU_MEMORY_MODE`
//! override file settings.

use crate::models::{MemoryType, RecallStrategy};
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the database directory.
pub const DB_ENV: &str = "KUZU_MEMORY_DB";

/// Environment variable hinting the invocation mode ("mcp", "cli", "hook").
pub const MODE_ENV: &str = "KUZU_MEMORY_MODE";

const SECS_PER_DAY: u64 = 86_400;

/// Runtime configuration for a memory store.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Database file location override.
    pub db_path: Option<PathBuf>,
    /// Auto-detect `user_id` from git config.
    pub auto_tag_git_user: bool,
    /// Forced `user_id`, taking precedence over git detection.
    pub user_id_override: Option<String>,
    /// Default recall strategy.
    pub default_strategy: RecallStrategy,
    /// Default limit for `attach_memories`.
    pub max_memories: usize,
    /// Learning-queue worker count.
    pub workers: usize,
    /// Learning-queue bounded depth.
    pub max_queue: usize,
    /// Query-result cache TTL.
    pub cache_ttl: Duration,
    /// Lock timeout for foreground calls.
    pub foreground_lock_timeout: Duration,
    /// Hook mode: zero-timeout lock discipline, skip on contention.
    pub hook_mode: bool,
    /// Per-type TTL overrides in days; 0 means never expire.
    pub retention_ttl_days: BTreeMap<MemoryType, u64>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            auto_tag_git_user: true,
            user_id_override: None,
            default_strategy: RecallStrategy::Hybrid,
            max_memories: 10,
            workers: 2,
            max_queue: 256,
            cache_ttl: Duration::from_secs(300),
            foreground_lock_timeout: Duration::from_secs(2),
            hook_mode: false,
            retention_ttl_days: BTreeMap::new(),
        }
    }
}

impl MemoryConfig {
    /// Loads configuration for a store directory: defaults, overlaid with
    /// `config.yaml` if present, overlaid with environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unknown keys, unparseable values, or
    /// out-of-range settings.
    pub fn load(store_dir: &Path) -> Result<Self> {
        let mut config = Self::default();

        let config_path = store_dir.join("config.yaml");
        if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path).map_err(|e| {
                Error::Config(format!("cannot read {}: {e}", config_path.display()))
            })?;
            config.merge_yaml(&raw)?;
            tracing::debug!(path = %config_path.display(), "loaded config file");
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Merges a YAML document over this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unknown keys or invalid values.
    pub fn merge_yaml(&mut self, raw: &str) -> Result<()> {
        let file: ConfigFile = serde_yaml_ng::from_str(raw)
            .map_err(|e| Error::Config(e.to_string()))?;

        if let Some(db_path) = file.db_path {
            self.db_path = Some(db_path);
        }
        if let Some(memory) = file.memory {
            if let Some(auto) = memory.auto_tag_git_user {
                self.auto_tag_git_user = auto;
            }
            if memory.user_id_override.is_some() {
                self.user_id_override = memory.user_id_override;
            }
        }
        if let Some(recall) = file.recall {
            if let Some(strategy) = recall.default_strategy {
                self.default_strategy = RecallStrategy::parse(&strategy).ok_or_else(|| {
                    Error::Config(format!("unknown recall.default_strategy `{strategy}`"))
                })?;
            }
            if let Some(max) = recall.max_memories {
                self.max_memories = max;
            }
        }
        if let Some(async_section) = file.r#async {
            if let Some(workers) = async_section.workers {
                self.workers = workers;
            }
            if let Some(max_queue) = async_section.max_queue {
                self.max_queue = max_queue;
            }
        }
        if let Some(storage) = file.storage {
            if let Some(ttl) = storage.cache_ttl_sec {
                self.cache_ttl = Duration::from_secs(ttl);
            }
        }
        if let Some(locks) = file.locks {
            if let Some(timeout) = locks.foreground_timeout_sec {
                self.foreground_lock_timeout = Duration::from_secs_f64(timeout);
            }
            if let Some(hook_timeout) = locks.hook_timeout_sec {
                if hook_timeout != 0.0 {
                    return Err(Error::Config(
                        "locks.hook_timeout_sec must be 0; hooks never block".to_string(),
                    ));
                }
            }
        }
        if let Some(retention) = file.retention {
            for (type_name, section) in retention {
                let memory_type = MemoryType::parse(&type_name).ok_or_else(|| {
                    Error::Config(format!("unknown memory type in retention.`{type_name}`"))
                })?;
                if let Some(days) = section.ttl_days {
                    self.retention_ttl_days.insert(memory_type, days);
                }
            }
        }
        Ok(())
    }

    /// Applies environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(db) = std::env::var(DB_ENV) {
            if !db.is_empty() {
                self.db_path = Some(PathBuf::from(db));
            }
        }
        if let Ok(mode) = std::env::var(MODE_ENV) {
            if mode.eq_ignore_ascii_case("hook") {
                self.hook_mode = true;
            }
        }
    }

    /// Rejects out-of-range settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.max_memories == 0 {
            return Err(Error::Config("recall.max_memories must be > 0".to_string()));
        }
        if self.workers == 0 {
            return Err(Error::Config("async.workers must be > 0".to_string()));
        }
        if self.max_queue == 0 {
            return Err(Error::Config("async.max_queue must be > 0".to_string()));
        }
        if self.foreground_lock_timeout > Duration::from_secs(30) {
            return Err(Error::Config(
                "locks.foreground_timeout_sec must be at most 30".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective TTL for a memory type, honoring overrides; `None` means
    /// never expires.
    #[must_use]
    pub fn effective_ttl(&self, memory_type: MemoryType) -> Option<Duration> {
        match self.retention_ttl_days.get(&memory_type) {
            Some(0) => None,
            Some(days) => Some(Duration::from_secs(days * SECS_PER_DAY)),
            None => memory_type.ttl(),
        }
    }

    /// Lock timeout for the current mode: zero in hook mode.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        if self.hook_mode {
            Duration::ZERO
        } else {
            self.foreground_lock_timeout
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    db_path: Option<PathBuf>,
    memory: Option<MemorySection>,
    recall: Option<RecallSection>,
    r#async: Option<AsyncSection>,
    storage: Option<StorageSection>,
    locks: Option<LocksSection>,
    retention: Option<BTreeMap<String, RetentionSection>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemorySection {
    auto_tag_git_user: Option<bool>,
    user_id_override: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecallSection {
    default_strategy: Option<String>,
    max_memories: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AsyncSection {
    workers: Option<usize>,
    max_queue: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StorageSection {
    cache_ttl_sec: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocksSection {
    foreground_timeout_sec: Option<f64>,
    hook_timeout_sec: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetentionSection {
    ttl_days: Option<u64>,
}
