//! Meta-cognitive layer: query analysis, routing, and answer scoring.
//!
//! The engine asks this layer three questions per request: what do we know
//! about this query (`analyze`), where should it go (`route`), and how good
//! is a candidate answer (`evaluate`). `route` is deterministic over its
//! inputs and `evaluate` is pure, which the test suite relies on.

pub mod analyzer;
pub mod classify;
pub mod evaluator;
pub mod router;

use serde::{Deserialize, Serialize};

use backends::Episode;

use crate::error::CoreResult;
use crate::query::{Modality, Query, QueryOptions};
use crate::registry::{BackendId, BackendSummary};

/// Decision strategies for routing under uncertainty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStrategy {
    /// Prefer known-good paths
    Conservative,
    /// Prefer the local reasoner while confidence holds
    Exploratory,
    /// Complexity-banded mix
    Balanced,
    /// Pick whichever strategy has worked best in this session
    Adaptive,
}

impl DecisionStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "conservative" => Some(Self::Conservative),
            "exploratory" => Some(Self::Exploratory),
            "balanced" => Some(Self::Balanced),
            "adaptive" => Some(Self::Adaptive),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Exploratory => "exploratory",
            Self::Balanced => "balanced",
            Self::Adaptive => "adaptive",
        }
    }
}

impl std::fmt::Display for DecisionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What kind of not-knowing the system is facing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoranceKind {
    /// A named gap: a capability the query needs is missing
    KnownUnknowns,
    /// No session history to even locate the gaps
    UnknownUnknowns,
    /// Prior evidence exists but conflicts
    Epistemic,
    /// Backends themselves are stochastic
    Aleatory,
}

/// Quantified ignorance for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoranceScore {
    pub kind: IgnoranceKind,
    /// `1 − fraction of required capabilities present`, clipped to [0, 1]
    pub score: f64,
    pub gaps: Vec<String>,
    pub sources: Vec<String>,
    /// How sure the assessment itself is
    pub assessment_confidence: f64,
}

/// Self-doubt dimensions; `composite` is the scalar the router consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfDoubt {
    pub confidence: f64,
    pub reasoning_clarity: f64,
    pub evidence_strength: f64,
    pub alternatives_count: usize,
    pub uncertainty: f64,
}

impl SelfDoubt {
    /// Weighted composite, clipped to [0, 1]:
    /// `0.35·conf + 0.25·clarity + 0.25·evidence + 0.15·(1−uncertainty) − 0.05·alternatives`
    pub fn composite(&self) -> f64 {
        let raw = 0.35 * self.confidence
            + 0.25 * self.reasoning_clarity
            + 0.25 * self.evidence_strength
            + 0.15 * (1.0 - self.uncertainty)
            - 0.05 * self.alternatives_count as f64;
        raw.clamp(0.0, 1.0)
    }
}

/// Temporal view of the session at analysis time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemporalSnapshot {
    pub session_age_s: u64,
    /// 1.0 immediately after activity, decaying toward 0 when stale
    pub context_freshness: f64,
    pub interactions: u32,
}

impl TemporalSnapshot {
    /// Exponential decay with a ten-minute constant.
    pub fn freshness_for(seconds_since_update: u64) -> f64 {
        (-(seconds_since_update as f64) / 600.0).exp()
    }
}

/// Per-query scratchpad produced by `analyze` and discarded after the
/// episode is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaState {
    pub ignorance: IgnoranceScore,
    pub self_doubt: SelfDoubt,
    pub composite: f64,
    pub narrative: String,
    pub temporal: TemporalSnapshot,
    pub strategy: DecisionStrategy,
    /// The arm actually applied when `strategy` is adaptive
    pub resolved_strategy: DecisionStrategy,
    pub modality: Modality,
    pub complexity: f64,
    pub criticality: f64,
    pub diagnostics: Vec<String>,
}

impl MetaState {
    /// Floor state returned instead of panicking when analysis goes wrong.
    pub fn degraded(reason: &str) -> Self {
        Self {
            ignorance: IgnoranceScore {
                kind: IgnoranceKind::UnknownUnknowns,
                score: 1.0,
                gaps: vec![reason.to_string()],
                sources: vec!["internal_error".to_string()],
                assessment_confidence: 0.0,
            },
            self_doubt: SelfDoubt {
                confidence: 0.0,
                reasoning_clarity: 0.0,
                evidence_strength: 0.0,
                alternatives_count: 0,
                uncertainty: 1.0,
            },
            composite: 0.0,
            narrative: String::new(),
            temporal: TemporalSnapshot::default(),
            strategy: DecisionStrategy::Conservative,
            resolved_strategy: DecisionStrategy::Conservative,
            modality: Modality::Text,
            complexity: 0.5,
            criticality: 0.0,
            diagnostics: vec![format!("analysis degraded: {reason}")],
        }
    }
}

/// Context handed to `analyze`: recent episodes most-recent-first, the
/// available backends with their capability tags, and the temporal snapshot.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub episodes: Vec<Episode>,
    pub backends: Vec<BackendSummary>,
    pub temporal: TemporalSnapshot,
}

/// Routing recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub primary: BackendId,
    pub use_ensemble: bool,
    pub rationale: Vec<String>,
}

/// Post-hoc score for a candidate answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: f64,
    pub issues: Vec<String>,
}

/// The meta-cognitive capability set. One default realization exists
/// ([`Introspector`]); tests may substitute their own.
pub trait MetaCognition: Send + Sync {
    fn analyze(&self, query: &Query, context: &AnalysisContext) -> CoreResult<MetaState>;

    fn route(
        &self,
        state: &MetaState,
        backends: &[BackendSummary],
        options: &QueryOptions,
    ) -> RouteDecision;

    fn evaluate(&self, query_text: &str, answer: &str) -> QualityReport;
}

/// Default realization of [`MetaCognition`]
#[derive(Debug, Clone)]
pub struct Introspector {
    pub default_strategy: DecisionStrategy,
    /// Episodes considered when building the narrative
    pub narrative_window: usize,
}

impl Introspector {
    pub fn new(default_strategy: DecisionStrategy) -> Self {
        Self {
            default_strategy,
            narrative_window: 5,
        }
    }
}

impl Default for Introspector {
    fn default() -> Self {
        Self::new(DecisionStrategy::Adaptive)
    }
}

impl MetaCognition for Introspector {
    fn analyze(&self, query: &Query, context: &AnalysisContext) -> CoreResult<MetaState> {
        analyzer::analyze(self, query, context)
    }

    fn route(
        &self,
        state: &MetaState,
        backends: &[BackendSummary],
        options: &QueryOptions,
    ) -> RouteDecision {
        router::route(state, backends, options)
    }

    fn evaluate(&self, query_text: &str, answer: &str) -> QualityReport {
        evaluator::evaluate(query_text, answer)
    }
}
