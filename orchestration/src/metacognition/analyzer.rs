//! Query analysis: ignorance assessment, self-doubt, and narrative.

use tracing::debug;

use backends::{Capability, Episode};

use crate::error::{CoreError, CoreResult};
use crate::query::{Modality, Query};
use crate::registry::BackendSummary;

use super::classify;
use super::{
    AnalysisContext, DecisionStrategy, IgnoranceKind, IgnoranceScore, Introspector, MetaState,
    SelfDoubt,
};

pub fn analyze(
    introspector: &Introspector,
    query: &Query,
    context: &AnalysisContext,
) -> CoreResult<MetaState> {
    if query.text.trim().is_empty() {
        return Err(CoreError::invalid_input("query text is empty"));
    }

    let modality = query.modality();
    let complexity = classify::complexity_score(&query.text, &context.episodes);
    let criticality = classify::criticality_score(&query.text, complexity);

    let ignorance = assess_ignorance(query, modality, &context.episodes, &context.backends);
    let self_doubt = self_doubt(query, &ignorance, context);
    let composite = self_doubt.composite();

    let strategy = query
        .options
        .strategy_hint
        .as_deref()
        .and_then(DecisionStrategy::from_name)
        .unwrap_or(introspector.default_strategy);
    let resolved_strategy = resolve_strategy(strategy, &context.episodes);

    let narrative = build_narrative(&context.episodes, introspector.narrative_window);

    debug!(
        composite,
        complexity,
        criticality,
        strategy = %resolved_strategy,
        gaps = ignorance.gaps.len(),
        "query analyzed"
    );

    Ok(MetaState {
        ignorance,
        self_doubt,
        composite,
        narrative,
        temporal: context.temporal.clone(),
        strategy,
        resolved_strategy,
        modality,
        complexity,
        criticality,
        diagnostics: Vec::new(),
    })
}

/// Capabilities this query needs to be answered well.
fn required_capabilities(query: &Query, modality: Modality) -> Vec<Capability> {
    let mut required = vec![Capability::ConversationalResponder];

    match modality {
        Modality::Image => required.push(Capability::ImageAnalyzer),
        Modality::Audio => required.push(Capability::AudioTranscriber),
        Modality::Mixed => {
            required.push(Capability::ImageAnalyzer);
            required.push(Capability::AudioTranscriber);
        }
        Modality::Text => {}
    }

    if classify::has_retrieval_keywords(&query.text) {
        required.push(Capability::Retriever);
        required.push(Capability::Synthesize);
    }

    required
}

fn assess_ignorance(
    query: &Query,
    modality: Modality,
    episodes: &[Episode],
    backends: &[BackendSummary],
) -> IgnoranceScore {
    let required = required_capabilities(query, modality);
    let mut gaps = Vec::new();
    let mut sources = Vec::new();

    let present = required
        .iter()
        .filter(|cap| {
            let available = backends.iter().any(|b| b.available && b.advertises(cap));
            if !available {
                gaps.push(format!("missing capability: {cap}"));
            }
            available
        })
        .count();

    let score = if required.is_empty() {
        0.0
    } else {
        (1.0 - present as f64 / required.len() as f64).clamp(0.0, 1.0)
    };

    if !gaps.is_empty() {
        sources.push("tool_limitation".to_string());
    }
    if episodes.is_empty() {
        gaps.push("no session history".to_string());
        sources.push("cold_start".to_string());
    }

    let conflicting = has_conflicting_evidence(&query.text, episodes);
    if conflicting {
        sources.push("conflicting_evidence".to_string());
    }

    let (kind, assessment_confidence) = if score > 0.0 {
        (IgnoranceKind::KnownUnknowns, 0.8)
    } else if episodes.is_empty() {
        (IgnoranceKind::UnknownUnknowns, 0.3)
    } else if conflicting {
        (IgnoranceKind::Epistemic, 0.6)
    } else {
        // Generative backends are stochastic even on familiar ground.
        (IgnoranceKind::Aleatory, 0.5)
    };

    IgnoranceScore {
        kind,
        score,
        gaps,
        sources,
        assessment_confidence,
    }
}

/// Similar prior queries with both clear successes and clear failures.
fn has_conflicting_evidence(text: &str, episodes: &[Episode]) -> bool {
    let similar: Vec<&Episode> = episodes
        .iter()
        .filter(|e| classify::is_similar(&e.query_text, text))
        .collect();
    let succeeded = similar.iter().any(|e| e.quality >= 0.7);
    let failed = similar.iter().any(|e| e.quality < 0.4);
    succeeded && failed
}

fn self_doubt(query: &Query, ignorance: &IgnoranceScore, context: &AnalysisContext) -> SelfDoubt {
    let confidence = (1.0 - 0.15 * ignorance.gaps.len() as f64).max(0.2);

    let words = query.text.split_whitespace().count() as f64;
    let reasoning_clarity = (0.5 + words / 100.0).min(1.0);

    let mut evidence_strength: f64 = 0.5;
    let has_user_history = query
        .user_id
        .as_deref()
        .map(|uid| {
            context
                .episodes
                .iter()
                .any(|e| e.user_id.as_deref() == Some(uid))
        })
        .unwrap_or(false);
    if has_user_history {
        evidence_strength += 0.3;
    }
    if !context.episodes.is_empty() {
        evidence_strength += 0.2;
    }

    let alternatives_count = context.backends.iter().filter(|b| b.available).count();
    let uncertainty = 1.0 - ignorance.assessment_confidence;

    SelfDoubt {
        confidence,
        reasoning_clarity,
        evidence_strength: evidence_strength.min(1.0),
        alternatives_count,
        uncertainty,
    }
}

/// For the adaptive strategy, pick the arm whose prior episodes in this
/// session scored best on average; ties and cold sessions break to balanced.
fn resolve_strategy(strategy: DecisionStrategy, episodes: &[Episode]) -> DecisionStrategy {
    if strategy != DecisionStrategy::Adaptive {
        return strategy;
    }

    let arms = [
        DecisionStrategy::Conservative,
        DecisionStrategy::Exploratory,
        DecisionStrategy::Balanced,
    ];

    let mut best = DecisionStrategy::Balanced;
    let mut best_mean = f64::NEG_INFINITY;

    for arm in arms {
        let scores: Vec<f64> = episodes
            .iter()
            .filter(|e| e.metadata.get("strategy").map(String::as_str) == Some(arm.name()))
            .map(|e| e.quality)
            .collect();
        if scores.is_empty() {
            continue;
        }
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        if mean > best_mean {
            best_mean = mean;
            best = arm;
        } else if (mean - best_mean).abs() < 1e-9 {
            best = DecisionStrategy::Balanced;
        }
    }

    best
}

/// Deterministic learning-trajectory summary of the most recent episodes.
/// Explainability only; never consulted by routing.
fn build_narrative(episodes: &[Episode], window: usize) -> String {
    if episodes.is_empty() {
        return "first interaction, no context yet".to_string();
    }

    let lines: Vec<String> = episodes
        .iter()
        .take(window)
        .map(|e| {
            let mark = if e.succeeded() { '✓' } else { '✗' };
            let preview: String = e.query_text.chars().take(60).collect();
            format!("{mark} {preview}")
        })
        .collect();

    format!("recent trajectory:\n{}", lines.join("\n"))
}
