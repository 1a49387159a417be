//! End-to-end request handling: classify, analyze, gate, dispatch, refine,
//! persist.

pub mod engine;

use serde::{Deserialize, Serialize};

use crate::consensus::DecisionStatus;

pub use engine::{Orchestrator, OrchestratorSettings};

/// Per-request state machine. Terminal failures jump to `Error` from any
/// phase and still attempt best-effort persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPhase {
    Classified,
    Analyzed,
    ConsensusPending,
    ConsensusApproved,
    ConsensusRejected,
    Dispatched,
    Evaluated,
    Refining,
    Persisted,
    Done,
    Error,
}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Classified => "classified",
            Self::Analyzed => "analyzed",
            Self::ConsensusPending => "consensus_pending",
            Self::ConsensusApproved => "consensus_approved",
            Self::ConsensusRejected => "consensus_rejected",
            Self::Dispatched => "dispatched",
            Self::Evaluated => "evaluated",
            Self::Refining => "refining",
            Self::Persisted => "persisted",
            Self::Done => "done",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Workflow families the orchestrator can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// Single conversational tool call
    Simple,
    /// Retrieval then synthesis over remote tools
    Complex,
    /// Media analysis then synthesis
    Multimodal,
    /// Local generative reasoner
    Local,
    /// Local and complex concurrently, combined
    Ensemble,
}

impl WorkflowKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Complex => "complex",
            Self::Multimodal => "multimodal",
            Self::Local => "local",
            Self::Ensemble => "ensemble",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One backend invocation, kept for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub latency_ms: u64,
    pub success: bool,
}

/// Consensus outcome attached to a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusTrace {
    pub decision_id: String,
    pub status: DecisionStatus,
    pub rationale: String,
}

/// Request diagnostics surfaced to operators (and, trimmed, to callers)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub tool_calls: Vec<ToolCallRecord>,
    pub quality_history: Vec<f64>,
    pub warnings: Vec<String>,
    pub phases: Vec<String>,
    pub routing_rationale: Vec<String>,
    pub consensus: Option<ConsensusTrace>,
}

impl Diagnostics {
    pub fn enter(&mut self, phase: RequestPhase) {
        self.phases.push(phase.to_string());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn record_call(&mut self, tool: &str, latency_ms: u64, success: bool) {
        self.tool_calls.push(ToolCallRecord {
            tool: tool.to_string(),
            latency_ms,
            success,
        });
    }
}

/// Public result of processing one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorResponse {
    pub answer: String,
    pub quality: f64,
    pub strategy_used: String,
    pub iterations: u32,
    pub latency_ms: u64,
    pub diagnostics: Diagnostics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_labels() {
        assert_eq!(WorkflowKind::Simple.label(), "simple");
        assert_eq!(WorkflowKind::Ensemble.label(), "ensemble");
    }

    #[test]
    fn test_phase_trace() {
        let mut diag = Diagnostics::default();
        diag.enter(RequestPhase::Classified);
        diag.enter(RequestPhase::Analyzed);
        diag.enter(RequestPhase::Done);
        assert_eq!(diag.phases, vec!["classified", "analyzed", "done"]);
    }
}
