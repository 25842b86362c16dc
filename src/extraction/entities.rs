//! Pattern-based entity recognition.
//!
//! Pure regex and vocabulary matching, no ML. Recognized entities are
//! deduplicated by `(lowercased name, type)` with the first (case-preserved)
//! surface form winning.
// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]

use crate::models::{EntityType, RecognizedEntity};
use regex::Regex;
use std::sync::LazyLock;

use super::patterns::STOP_WORDS;

/// Closed technology vocabulary, organized by category.
///
/// Terms match case-insensitively against word boundaries; the canonical
/// casing listed here is what gets stored. The category term itself is also
/// attached as a companion entity, which is what lets a prompt like "which
/// database?" reach memories that only name a concrete engine.
static TECH_VOCABULARY: &[(&str, &[&str])] = &[
    (
        "language",
        &[
            "Python",
            "JavaScript",
            "TypeScript",
            "Rust",
            "Go",
            "Java",
            "Kotlin",
            "Swift",
            "Ruby",
            "PHP",
            "C++",
            "C#",
            "Scala",
            "Elixir",
            "Haskell",
            "Zig",
        ],
    ),
    (
        "database",
        &[
            "PostgreSQL",
            "Postgres",
            "MySQL",
            "SQLite",
            "Redis",
            "MongoDB",
            "Cassandra",
            "DynamoDB",
            "ClickHouse",
            "Elasticsearch",
            "Neo4j",
            "DuckDB",
            "Kuzu",
        ],
    ),
    (
        "framework",
        &[
            "React",
            "Vue",
            "Angular",
            "Svelte",
            "Next.js",
            "Django",
            "Flask",
            "FastAPI",
            "Rails",
            "Spring",
            "Laravel",
            "Express",
            "Actix",
            "Axum",
            "Tokio",
        ],
    ),
    (
        "infrastructure",
        &[
            "Docker",
            "Kubernetes",
            "Terraform",
            "Ansible",
            "Prometheus",
            "Grafana",
            "Nginx",
            "AWS",
            "Azure",
            "GCP",
            "Cloudflare",
            "Vercel",
        ],
    ),
    ("queue", &["Kafka", "RabbitMQ", "NATS", "SQS"]),
    (
        "tooling",
        &[
            "Git",
            "GitHub",
            "GitLab",
            "Cargo",
            "npm",
            "yarn",
            "pnpm",
            "Webpack",
            "Vite",
            "Node.js",
            "Deno",
            "Bun",
        ],
    ),
    (
        "protocol",
        &["REST", "GraphQL", "gRPC", "WebSocket", "HTTP", "MQTT"],
    ),
];

static PROJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:project|app|application|service|repo|repository)\s+((?-i:[A-Z][\w-]+))")
        .expect("static regex: project")
});

static PERSON_VERB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][a-z]+)\s+(?:said|says|wants|wanted|prefers|preferred|suggested|mentioned|asked|thinks|works|wrote|reported)\b",
    )
    .expect("static regex: person+verb")
});

static PERSON_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bmy\s+name\s+is\s+((?-i:[A-Z]\w*))").expect("static regex: person name")
});

static EMPLOYER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:work(?:s|ing)?\s+(?:at|for)|employed\s+(?:at|by))\s+((?-i:[A-Z][\w&-]*))")
        .expect("static regex: employer")
});

static FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b[\w./-]+\.(?:rs|py|js|ts|tsx|jsx|java|go|rb|c|cc|cpp|h|hpp|md|txt|yaml|yml|toml|json|sql|sh|css|html|lock)\b",
    )
    .expect("static regex: file")
});

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'),;]+"#).expect("static regex: url"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[\w.+-]+@[\w-]+\.[\w.-]+\b").expect("static regex: email")
});

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bv?\d+\.\d+(?:\.\d+)?(?:-[\w.]+)?\b").expect("static regex: version")
});

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:\d{4}-\d{2}-\d{2}|(?:january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{1,2},?\s+\d{4})\b",
    )
    .expect("static regex: date")
});

/// Pattern-based entity recognizer.
pub struct EntityRecognizer;

impl EntityRecognizer {
    /// Recognizes entities in `text`.
    ///
    /// Output is deduplicated by `(name_lower, entity_type)` preserving the
    /// first surface form; stopwords never become entities. Total: never
    /// fails, unmatched text yields an empty vector.
    #[must_use]
    pub fn recognize(text: &str) -> Vec<RecognizedEntity> {
        let mut found: Vec<RecognizedEntity> = Vec::new();

        // Closed technology vocabulary first; canonical casing wins. Every
        // vocabulary hit also attaches its category term so category-level
        // prompts join to concrete-technology memories.
        let lower = text.to_lowercase();
        for (category, terms) in TECH_VOCABULARY {
            let mut category_hit = contains_word(&lower, category);
            for tech in *terms {
                if contains_word(&lower, &tech.to_lowercase()) {
                    push_unique(
                        &mut found,
                        RecognizedEntity::new(*tech, EntityType::Technology, 0.90),
                    );
                    category_hit = true;
                }
            }
            if category_hit {
                push_unique(
                    &mut found,
                    RecognizedEntity::new(*category, EntityType::Other, 0.60),
                );
            }
        }

        for caps in PROJECT_RE.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                push_filtered(&mut found, name.as_str(), EntityType::Project, 0.85);
            }
        }
        for caps in PERSON_VERB_RE.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                push_filtered(&mut found, name.as_str(), EntityType::Person, 0.80);
            }
        }
        for caps in PERSON_NAME_RE.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                push_filtered(&mut found, name.as_str(), EntityType::Person, 0.95);
            }
        }
        for caps in EMPLOYER_RE.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                push_filtered(&mut found, name.as_str(), EntityType::Other, 0.80);
            }
        }
        for m in FILE_RE.find_iter(text) {
            push_unique(
                &mut found,
                RecognizedEntity::new(m.as_str(), EntityType::File, 0.90),
            );
        }
        for m in URL_RE.find_iter(text) {
            push_unique(
                &mut found,
                RecognizedEntity::new(m.as_str(), EntityType::Url, 0.95),
            );
        }
        for m in EMAIL_RE.find_iter(text) {
            push_unique(
                &mut found,
                RecognizedEntity::new(m.as_str(), EntityType::Email, 0.95),
            );
        }
        for m in VERSION_RE.find_iter(text) {
            // Bare "1.2" inside dates or filenames is already claimed above.
            if found.iter().any(|e| e.name.contains(m.as_str())) {
                continue;
            }
            push_unique(
                &mut found,
                RecognizedEntity::new(m.as_str(), EntityType::Version, 0.75),
            );
        }
        for m in DATE_RE.find_iter(text) {
            push_unique(
                &mut found,
                RecognizedEntity::new(m.as_str(), EntityType::Date, 0.85),
            );
        }

        found
    }
}

fn contains_word(haystack_lower: &str, needle_lower: &str) -> bool {
    haystack_lower
        .match_indices(needle_lower)
        .any(|(idx, matched)| {
            let before_ok = idx == 0
                || !haystack_lower[..idx]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_alphanumeric());
            let end = idx + matched.len();
            let after_ok = end == haystack_lower.len()
                || !haystack_lower[end..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_alphanumeric());
            before_ok && after_ok
        })
}

fn push_filtered(found: &mut Vec<RecognizedEntity>, name: &str, ty: EntityType, confidence: f64) {
    if STOP_WORDS.contains(name.to_lowercase().as_str()) {
        return;
    }
    push_unique(found, RecognizedEntity::new(name, ty, confidence));
}

fn push_unique(found: &mut Vec<RecognizedEntity>, entity: RecognizedEntity) {
    let key = entity.dedup_key();
    if !found.iter().any(|e| e.dedup_key() == key) {
        found.push(entity);
    }
}
