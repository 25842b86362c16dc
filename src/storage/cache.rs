//! Query-result LRU cache.
//!
//! Keyed by a query signature (query kind + normalized arguments + filter
//! digest) with TTL expiration. Writers invalidate affected signatures:
//! entity-scoped entries only when an entity name intersects, everything
//! else conservatively on any write.

use crate::models::Memory;
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Maximum cached query signatures.
const MAX_ENTRIES: usize = 1000;

/// The kind of query a signature belongs to, driving invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Content-keyword scan; any write may affect it.
    Keyword,
    /// Entity-joined query; only writes mentioning those entities affect it.
    Entity,
    /// Recent-window query; any write may affect it.
    Recent,
}

impl QueryKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Entity => "entity",
            Self::Recent => "recent",
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    memories: Vec<Memory>,
    kind: QueryKind,
    /// Lowercased entity names the signature depends on (Entity kind only).
    entities: HashSet<String>,
    inserted_at: Instant,
}

/// In-process LRU over query results.
///
/// Internally synchronized; lock poisoning fails open (a poisoned cache
/// behaves as permanently cold).
pub struct QueryCache {
    inner: RwLock<LruCache<String, CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    /// Creates a cache with the given TTL.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(MAX_ENTRIES).expect("MAX_ENTRIES is non-zero");
        Self {
            inner: RwLock::new(LruCache::new(cap)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Builds a signature string for a query.
    ///
    /// `args` are normalized (lowercased, sorted) so argument order never
    /// splits the cache; the filter digest is appended by the caller.
    #[must_use]
    pub fn signature(kind: QueryKind, args: &[String], filter_digest: &str) -> String {
        let mut normalized: Vec<String> = args.iter().map(|a| a.to_lowercase()).collect();
        normalized.sort();
        format!("{}|{}|{}", kind.as_str(), normalized.join(","), filter_digest)
    }

    /// Looks up a signature, honoring TTL.
    pub fn get(&self, signature: &str) -> Option<Vec<Memory>> {
        let result = {
            let cache = self.inner.read().ok()?;
            cache
                .peek(signature)
                .filter(|entry| entry.inserted_at.elapsed() <= self.ttl)
                .map(|entry| entry.memories.clone())
        };

        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("query_cache_hits_total").increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("query_cache_misses_total").increment(1);
        }
        result
    }

    /// Stores a query result.
    pub fn put(
        &self,
        signature: String,
        kind: QueryKind,
        entities: HashSet<String>,
        memories: Vec<Memory>,
    ) {
        if let Ok(mut cache) = self.inner.write() {
            cache.put(
                signature,
                CacheEntry {
                    memories,
                    kind,
                    entities,
                    inserted_at: Instant::now(),
                },
            );
            metrics::gauge!("query_cache_size").set(cache.len() as f64);
        }
    }

    /// Invalidates signatures affected by a write that mentioned
    /// `entity_names`.
    ///
    /// Keyword and recent entries go unconditionally (the new memory's
    /// content can match any keyword); entity entries only when a name
    /// intersects.
    pub fn invalidate_for_write(&self, entity_names: &[String]) {
        let lowered: HashSet<String> = entity_names.iter().map(|n| n.to_lowercase()).collect();
        if let Ok(mut cache) = self.inner.write() {
            let stale: Vec<String> = cache
                .iter()
                .filter(|(_, entry)| match entry.kind {
                    QueryKind::Keyword | QueryKind::Recent => true,
                    QueryKind::Entity => !entry.entities.is_disjoint(&lowered),
                })
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                cache.pop(&key);
            }
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.inner.write() {
            cache.clear();
        }
    }

    /// Hit rate in [0, 1] since construction; 0 when unused.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
