//! Text complexity and criticality scoring.
//!
//! Deterministic over the query text and the supplied episode history, so
//! routing built on top of it stays a pure function.

use backends::Episode;

/// Keywords indicating a code or engineering task; these push a query
/// toward the local reasoner.
pub const TASK_KEYWORDS: &[&str] = &[
    "implement", "build", "create", "develop", "code", "script", "function",
    "class", "api", "endpoint", "database", "algorithm", "refactor", "debug",
    "compile", "deploy",
];

/// Keywords indicating an operation with real-world blast radius; these
/// raise criticality and can trip the consensus gate.
const RISK_KEYWORDS: &[&str] = &[
    "deploy", "delete", "drop", "migrate", "migration", "production", "shutdown",
    "truncate", "credentials", "secret", "rollback", "irreversible",
];

/// Words hinting the answer needs retrieved context rather than chat.
pub const RETRIEVAL_KEYWORDS: &[&str] = &[
    "explain", "compare", "summarize", "research", "analyze", "why", "how",
    "derive", "prove",
];

/// Lowercased words of at least four characters, deduplicated in order.
pub fn significant_words(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if word.len() >= 4 && !seen.iter().any(|w| w == word) {
            seen.push(word.to_string());
        }
    }
    seen
}

/// Whether two queries share enough vocabulary to count as similar.
pub fn is_similar(a: &str, b: &str) -> bool {
    let words_a = significant_words(a);
    let words_b = significant_words(b);
    let shared = words_a.iter().filter(|w| words_b.contains(w)).count();
    shared >= 2
}

pub fn has_task_keywords(text: &str) -> bool {
    let lower = text.to_lowercase();
    TASK_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub fn has_retrieval_keywords(text: &str) -> bool {
    let lower = text.to_lowercase();
    RETRIEVAL_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Complexity in [0, 1] from three signals: token-length bucket, the
/// engineering keyword set, and the hit rate of similar prior episodes
/// (familiar ground lowers effective complexity).
pub fn complexity_score(text: &str, episodes: &[Episode]) -> f64 {
    let words = text.split_whitespace().count();
    let mut score: f64 = match words {
        0..=7 => 0.25,
        8..=24 => 0.45,
        25..=59 => 0.65,
        _ => 0.8,
    };

    if has_task_keywords(text) {
        score += 0.3;
    }
    if has_retrieval_keywords(text) {
        score += 0.25;
    }

    let similar: Vec<&Episode> = episodes
        .iter()
        .filter(|e| is_similar(&e.query_text, text))
        .collect();
    if !similar.is_empty() {
        let hit_rate =
            similar.iter().filter(|e| e.succeeded()).count() as f64 / similar.len() as f64;
        score -= 0.15 * hit_rate;
    }

    score.clamp(0.0, 1.0)
}

/// Criticality in [0, 1]: complexity raised by risk keywords.
pub fn criticality_score(text: &str, complexity: f64) -> f64 {
    let lower = text.to_lowercase();
    let risk_hits = RISK_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();
    (complexity + 0.25 * risk_hits as f64).clamp(0.0, 1.0)
}
