//! # `KuzuMemory`
//!
//! An embedded, project-local memory store for AI agents.
//!
//! Agents submit free-form text (conversation turns, prompts, commit
//! messages) and the system extracts discrete typed memories, persists them
//! in a local graph-shaped store, and recalls the most relevant memories for
//! a prompt in single-digit milliseconds with no LLM call anywhere on the
//! hot path.
//!
//! ## Features
//!
//! - Pattern + entity extraction with confidence and importance scoring
//! - Typed memories with retention policies, validity windows, and
//!   decay-on-read importance
//! - Multi-strategy recall (keyword, entity, temporal, hybrid) with ranking
//!   and a query-result LRU cache
//! - Cross-process advisory file locking with fail-fast hook discipline
//! - Non-blocking async learning queue with a bounded worker pool
//!
//! ## Example
//!
//! ```rust,ignore
//! use kuzu_memory::{KuzuMemory, AttachOptions, MemoryConfig};
//!
//! let memory = KuzuMemory::open(project_root, MemoryConfig::default())?;
//! memory.generate_memories("I prefer Python over JavaScript.", "conversation", None)?;
//! let ctx = memory.attach_memories("What language should I use?", AttachOptions::default());
//! println!("{}", ctx.enhanced_prompt);
//! ```

#![forbid(unsafe_code)]

use std::path::PathBuf;
use thiserror::Error as ThisError;

// Module declarations
pub mod api;
pub mod config;
pub mod dedup;
pub mod extraction;
pub mod models;
pub mod observability;
pub mod queue;
pub mod recall;
pub mod storage;

// Re-exports for convenience
pub use api::{AttachOptions, GenerateOptions, KuzuMemory};
pub use config::MemoryConfig;
pub use extraction::ExtractionPipeline;
pub use models::{
    Entity, EntityId, EntityType, Memory, MemoryCandidate, MemoryContext, MemoryId, MemoryType,
    RecallStrategy, TaskId, TaskPriority, TaskStatus,
};
pub use queue::LearningQueue;
pub use recall::RecallEngine;
pub use storage::{GraphStore, MemoryStats, QueryFilters};

/// Error type for memory-store operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait
/// implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Busy` | Advisory file lock contended within the timeout |
/// | `Schema` | On-disk schema version mismatch at open |
/// | `Storage` | `SQLite` or filesystem failures |
/// | `Config` | Unknown config keys, invalid values at open |
/// | `InvalidInput` | Empty content for `remember`, malformed arguments |
///
/// Absence is never an error: lookups of unknown ids return `Ok(None)`, and
/// duplicate content collapses to a touch of the existing row. Hooks treat
/// `Busy` as normal flow control, not a failure.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The database lock is held elsewhere and was not released in time.
    #[error("database busy: '{operation}' could not acquire lock on {path}")]
    Busy {
        /// The operation that wanted the lock.
        operation: String,
        /// The lock file path.
        path: PathBuf,
    },

    /// The on-disk schema version does not match this build.
    ///
    /// Fatal at open. The store refuses to run against a mismatched schema
    /// rather than silently upgrading it.
    #[error("schema version mismatch: found {found}, expected {expected}")]
    Schema {
        /// Version recorded in the store.
        found: i64,
        /// Version this build requires.
        expected: i64,
    },

    /// A storage operation failed.
    #[error("storage operation '{operation}' failed: {cause}")]
    Storage {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Configuration was rejected at open.
    ///
    /// Raised for unknown keys (never silently ignored) and out-of-range
    /// values.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for memory-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Centralized so every module measures time the same way. Falls back to 0
/// if the system clock reads before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
