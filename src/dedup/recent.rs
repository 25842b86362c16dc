//! Recent-write deduplication for hook paths.
//!
//! Tracks recently written content hashes in an in-memory LRU with TTL
//! expiration, scoped by database path so two stores in one process never
//! cross-suppress. This is the fast, in-process half of deduplication; the
//! `content_hash` unique index in storage is the durable arbiter.

use crate::models::MemoryId;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Entry in the recent-write cache.
#[derive(Debug, Clone)]
struct CacheEntry {
    memory_id: MemoryId,
    written_at: Instant,
}

/// Checker for recently written content.
///
/// # How it works
///
/// 1. Maintains an LRU cache mapping `scope:content_hash` to the write info
/// 2. `check` looks the hash up and returns the hit if within the TTL window
/// 3. Expired entries are evicted lazily by LRU pressure
///
/// # Lock poisoning
///
/// Handled with fail-open semantics: a poisoned lock makes `check` return
/// `None` and `record` a no-op. Failing to suppress a duplicate only means
/// the durable hash index collapses it instead; blocking hook writes on a
/// transient panic would be worse.
pub struct RecentWriteChecker {
    cache: RwLock<LruCache<String, CacheEntry>>,
    ttl: Duration,
    scope: String,
}

impl RecentWriteChecker {
    /// Default TTL for hook-path dedup.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    /// Creates a checker scoped to a database path.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(db_path: &Path, capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).expect("capacity must be > 0");
        Self {
            cache: RwLock::new(LruCache::new(cap)),
            ttl,
            scope: db_path.to_string_lossy().into_owned(),
        }
    }

    /// Creates a checker with default settings: 1000 entries, 5 minute TTL.
    #[must_use]
    pub fn with_defaults(db_path: &Path) -> Self {
        Self::new(db_path, 1000, Self::DEFAULT_TTL)
    }

    fn key(&self, content_hash: &str) -> String {
        format!("{}:{content_hash}", self.scope)
    }

    /// Returns the memory id previously written for this hash, if the write
    /// happened within the TTL window.
    pub fn check(&self, content_hash: &str) -> Option<MemoryId> {
        let key = self.key(content_hash);
        let entry = {
            let cache = self.cache.read().ok()?;
            cache.peek(&key).cloned()
        }?;

        if entry.written_at.elapsed() <= self.ttl {
            tracing::debug!(
                memory_id = %entry.memory_id,
                age_ms = %entry.written_at.elapsed().as_millis(),
                "recent write found, suppressing duplicate"
            );
            metrics::counter!("dedup_recent_hits_total").increment(1);
            return Some(entry.memory_id);
        }
        None
    }

    /// Records a successful write for future duplicate suppression.
    pub fn record(&self, content_hash: &str, memory_id: &MemoryId) {
        let key = self.key(content_hash);
        if let Ok(mut cache) = self.cache.write() {
            cache.put(
                key,
                CacheEntry {
                    memory_id: memory_id.clone(),
                    written_at: Instant::now(),
                },
            );
            metrics::gauge!("dedup_recent_cache_size").set(cache.len() as f64);
        }
    }

    /// Current number of entries, including not-yet-evicted expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    /// True when the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::thread;

    fn checker(ttl: Duration) -> RecentWriteChecker {
        RecentWriteChecker::new(&PathBuf::from("/tmp/test.db"), 100, ttl)
    }

    #[test]
    fn test_record_and_check() {
        let c = checker(Duration::from_secs(60));
        let id = MemoryId::new("mem-1");
        c.record("hash-a", &id);

        assert_eq!(c.check("hash-a"), Some(id));
        assert_eq!(c.check("hash-b"), None);
    }

    #[test]
    fn test_expiry() {
        let c = checker(Duration::from_millis(30));
        c.record("hash-a", &MemoryId::new("mem-1"));
        thread::sleep(Duration::from_millis(60));
        assert_eq!(c.check("hash-a"), None);
    }

    #[test]
    fn test_scoped_by_db_path() {
        let a = RecentWriteChecker::with_defaults(&PathBuf::from("/tmp/a.db"));
        let b = RecentWriteChecker::with_defaults(&PathBuf::from("/tmp/b.db"));
        a.record("hash-x", &MemoryId::new("mem-1"));
        // Separate store, separate scope: no cross-suppression.
        assert_eq!(b.check("hash-x"), None);
    }

    #[test]
    fn test_lru_eviction() {
        let c = RecentWriteChecker::new(&PathBuf::from("/tmp/t.db"), 2, Duration::from_secs(60));
        c.record("h1", &MemoryId::new("m1"));
        c.record("h2", &MemoryId::new("m2"));
        c.record("h3", &MemoryId::new("m3"));

        assert_eq!(c.len(), 2);
        assert_eq!(c.check("h1"), None);
        assert!(c.check("h3").is_some());
    }

    #[test]
    fn test_rerecord_updates_id() {
        let c = checker(Duration::from_secs(60));
        c.record("h", &MemoryId::new("old"));
        c.record("h", &MemoryId::new("new"));
        assert_eq!(c.len(), 1);
        assert_eq!(c.check("h"), Some(MemoryId::new("new")));
    }

    #[test]
    fn test_concurrent_use() {
        use std::sync::Arc;
        let c = Arc::new(checker(Duration::from_secs(60)));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for i in 0..25 {
                        c.record(&format!("h-{t}-{i}"), &MemoryId::new(format!("m-{t}-{i}")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.len(), 100);
    }
}
