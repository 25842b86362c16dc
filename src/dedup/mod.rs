//! Deduplication: content hashing and the hook-path recent-write cache.
//!
//! Two complementary layers prevent duplicate memories:
//!
//! 1. [`RecentWriteChecker`] — a per-process, TTL-bounded LRU that lets hook
//!    invocations suppress a re-write of just-seen content without touching
//!    the database at all.
//! 2. The `content_hash` unique index in storage — the durable arbiter that
//!    collapses any duplicate that slips past the cache into a touch of the
//!    existing row.

mod hasher;
mod recent;

pub use hasher::ContentHasher;
pub use recent::RecentWriteChecker;
