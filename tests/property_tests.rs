//! Property-style checks for the quantified invariants.

use kuzu_memory::config::MemoryConfig;
use kuzu_memory::models::{Memory, MemoryType};
use kuzu_memory::storage::{GraphStore, MemoryWrite, QueryFilters};
use kuzu_memory::{KuzuMemory, current_timestamp};
use proptest::prelude::*;
use std::time::Duration;

const FG: Duration = Duration::from_secs(2);

fn open_memory() -> (tempfile::TempDir, KuzuMemory) {
    let dir = tempfile::tempdir().unwrap();
    let memory = KuzuMemory::open(
        dir.path(),
        MemoryConfig {
            user_id_override: Some("tester@example.com".to_string()),
            ..MemoryConfig::default()
        },
    )
    .unwrap();
    (dir, memory)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Decayed importance is monotonically non-increasing in time.
    #[test]
    fn prop_decay_monotone(
        importance in 0.0_f64..=1.0,
        type_idx in 0_usize..10,
        age_a in 0_u64..100_000_000,
        age_b in 0_u64..100_000_000,
    ) {
        let now = 1_700_000_000_u64;
        let memory_type = MemoryType::all()[type_idx];
        let mut memory = Memory::new("decay subject", memory_type, now);
        memory.importance = importance;

        let (early, late) = if age_a <= age_b { (age_a, age_b) } else { (age_b, age_a) };
        let at_early = memory.decayed_importance(now + early);
        let at_late = memory.decayed_importance(now + late);
        prop_assert!(at_late <= at_early + 1e-12);
        prop_assert!(at_late >= 0.0);
    }

    /// Retention TTLs place `valid_to` exactly at creation + TTL.
    #[test]
    fn prop_retention_applied(type_idx in 0_usize..10, now in 1_000_000_u64..2_000_000_000) {
        let memory_type = MemoryType::all()[type_idx];
        let memory = Memory::new("retention subject", memory_type, now);
        match memory_type.ttl() {
            None => prop_assert!(memory.valid_to.is_none()),
            Some(ttl) => prop_assert_eq!(memory.valid_to, Some(now + ttl.as_secs())),
        }
    }
}

/// P1: at most one row per normalized content, with the access count
/// reflecting every submission.
#[test]
fn dedup_uniqueness_across_variants() {
    let dir = tempfile::tempdir().unwrap();
    let store =
        GraphStore::open(&dir.path().join("memories.db"), Duration::from_secs(300)).unwrap();
    let now = current_timestamp();

    let variants = [
        "We deploy on Fridays",
        "we deploy on fridays",
        "  We   deploy\ton Fridays  ",
        "WE DEPLOY ON FRIDAYS",
    ];
    let mut ids = Vec::new();
    for v in variants {
        let memory = Memory::new(v, MemoryType::Semantic, now);
        ids.push(store.put_memory(memory, &[], FG).unwrap());
    }

    assert!(ids.windows(2).all(|w| w[0] == w[1]), "all variants share one row");
    let stored = store.get(&ids[0]).unwrap().unwrap();
    assert_eq!(stored.access_count, variants.len() as u64);

    let stats = store.stats().unwrap();
    assert_eq!(stats.total_memories, 1);
}

/// P4: remember/get round-trip preserves content and id.
#[test]
fn remember_roundtrip() {
    let (_dir, memory) = open_memory();

    for content in [
        "plain fact",
        "fact with Python and Redis names",
        "fact with punctuation: semicolons; and, commas",
    ] {
        let id = memory.remember(content, None).unwrap();
        let fetched = memory.get(&id).unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.content, content);
    }
}

/// P8: `access_count` and `accessed_at` never decrease, under interleaved
/// touches and re-ingests.
#[test]
fn touch_monotonicity() {
    let dir = tempfile::tempdir().unwrap();
    let store =
        GraphStore::open(&dir.path().join("memories.db"), Duration::from_secs(300)).unwrap();
    let now = current_timestamp();

    let id = store
        .put_memory(Memory::new("touch subject", MemoryType::Semantic, now), &[], FG)
        .unwrap();

    let mut last_count = 0;
    let mut last_accessed = 0;
    for i in 0..10 {
        if i % 2 == 0 {
            store.touch_batch(std::slice::from_ref(&id), FG).unwrap();
        } else {
            let dup = Memory::new("touch subject", MemoryType::Semantic, now);
            store.put_memory(dup, &[], FG).unwrap();
        }
        let m = store.get(&id).unwrap().unwrap();
        assert!(m.access_count > last_count);
        assert!(m.accessed_at >= last_accessed);
        last_count = m.access_count;
        last_accessed = m.accessed_at;
    }
}

/// P2: default-filter queries only ever return currently-valid memories.
#[test]
fn queries_are_valid_only() {
    let dir = tempfile::tempdir().unwrap();
    let store =
        GraphStore::open(&dir.path().join("memories.db"), Duration::from_secs(300)).unwrap();
    let now = current_timestamp();

    let writes: Vec<MemoryWrite> = (0..20)
        .map(|i| {
            let mut memory =
                Memory::new(format!("validity subject {i}"), MemoryType::Semantic, now);
            // Half already expired, half open-ended.
            memory.valid_to = if i % 2 == 0 { Some(now - 1) } else { None };
            MemoryWrite {
                memory,
                mentions: Vec::new(),
            }
        })
        .collect();
    store.put_batch(writes, FG).unwrap();

    let results = store
        .query_by_keywords(&["validity".to_string()], 50, &QueryFilters::default(), FG)
        .unwrap();
    assert_eq!(results.len(), 10);
    for m in &results {
        assert!(m.valid_to.is_none_or(|v| v > now));
    }

    let recent = store
        .query_recent(0, 50, &QueryFilters::default(), FG)
        .unwrap();
    assert_eq!(recent.len(), 10);
}

/// P6-adjacent: a burst of 100 submissions never blocks the submitter.
#[test]
fn async_submit_burst_is_nonblocking() {
    let (_dir, memory) = open_memory();

    let start = std::time::Instant::now();
    let tasks: Vec<_> = (0..100)
        .map(|i| {
            memory.generate_memories_async(
                format!("Remember that item {i} exists in the backlog."),
                "burst",
                kuzu_memory::TaskPriority::Normal,
            )
        })
        .collect();
    let elapsed = start.elapsed();

    // 100 submissions, amortized well under a millisecond each.
    assert!(elapsed < Duration::from_millis(200), "burst took {elapsed:?}");

    for task in &tasks {
        let status = memory.wait_task(task, Duration::from_secs(30));
        assert!(status.is_some());
    }
}
