//! Rule-based answer scoring.
//!
//! Pure with respect to its inputs: no clock, no state, no backend calls.
//! The issues list doubles as the critique appended to refinement prompts.

use super::classify::significant_words;
use super::QualityReport;

/// Score a candidate answer against the query in [0, 1].
pub fn evaluate(query_text: &str, answer: &str) -> QualityReport {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return QualityReport {
            score: 0.0,
            issues: vec!["empty response".to_string()],
        };
    }

    let mut score: f64 = 0.5;
    let mut issues = Vec::new();

    match trimmed.len() {
        0..=49 => {
            score -= 0.2;
            issues.push("response too short".to_string());
        }
        50..=5000 => score += 0.1,
        _ => {
            score -= 0.1;
            issues.push("response may be too verbose".to_string());
        }
    }

    let sentences = trimmed
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count();
    if sentences > 2 {
        score += 0.1;
    }

    let query_terms = significant_words(query_text);
    if query_terms.is_empty() {
        score += 0.3;
    } else {
        let answer_lower = trimmed.to_lowercase();
        let covered = query_terms
            .iter()
            .filter(|t| answer_lower.contains(t.as_str()))
            .count();
        let ratio = covered as f64 / query_terms.len() as f64;
        score += 0.3 * ratio;
        if ratio < 0.5 {
            issues.push(format!(
                "addresses only {covered} of {} query terms",
                query_terms.len()
            ));
        }
    }

    QualityReport {
        score: score.clamp(0.0, 1.0),
        issues,
    }
}
