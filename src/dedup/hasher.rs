//! Content hashing for deduplication.
//!
//! Content is normalized (trimmed, lowercased, whitespace collapsed) before
//! hashing so formatting differences collapse to the same memory.

use sha2::{Digest, Sha256};

/// SHA-256 content hasher over normalized text.
///
/// The resulting hex digest is the durable deduplication key: equality of
/// hashes means "same memory" across every ingestion path.
pub struct ContentHasher;

impl ContentHasher {
    /// Computes the SHA-256 hash of normalized content.
    ///
    /// Returns the lowercase hex digest (64 characters).
    #[must_use]
    pub fn hash(content: &str) -> String {
        let normalized = Self::normalize(content);
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Normalizes content for hashing and in-call deduplication.
    ///
    /// Trim, lowercase, collapse runs of whitespace to single spaces.
    #[must_use]
    pub fn normalize(content: &str) -> String {
        content
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_64_hex_chars() {
        let hash = ContentHasher::hash("we decided to use Postgres");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_whitespace_and_case_invariant() {
        let a = ContentHasher::hash("I prefer Python");
        let b = ContentHasher::hash("  i  PREFER\npython  ");
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_content_distinct_hash() {
        assert_ne!(
            ContentHasher::hash("we use MySQL"),
            ContentHasher::hash("we use Postgres")
        );
    }

    #[test]
    fn test_empty_content_hashes() {
        assert_eq!(ContentHasher::hash("").len(), 64);
        assert_eq!(ContentHasher::hash(""), ContentHasher::hash("   "));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(ContentHasher::normalize("  A  b\tC "), "a b c");
        assert_eq!(ContentHasher::normalize("one\ntwo"), "one two");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Hashing is deterministic.
            #[test]
            fn prop_hash_deterministic(content in any::<String>()) {
                prop_assert_eq!(ContentHasher::hash(&content), ContentHasher::hash(&content));
            }

            /// Normalization is idempotent.
            #[test]
            fn prop_normalize_idempotent(content in any::<String>()) {
                let once = ContentHasher::normalize(&content);
                let twice = ContentHasher::normalize(&once);
                prop_assert_eq!(once, twice);
            }

            /// Surrounding whitespace never changes the hash.
            #[test]
            fn prop_whitespace_invariant(content in "[a-z0-9 ]{1,40}") {
                let padded = format!("  {content}\t");
                prop_assert_eq!(ContentHasher::hash(&content), ContentHasher::hash(&padded));
            }
        }
    }
}
