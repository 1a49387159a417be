//! Orchestration engine for a pool of heterogeneous backends.
//!
//! For each query the engine decides which backend(s) to invoke, optionally
//! gates the action behind weighted multi-party consensus, drives a bounded
//! refine-until-good-enough loop, and records the episode so future routing
//! improves.
//!
//! # Subsystems
//!
//! - [`metacognition`]: query analysis, routing recommendation, quality
//!   scoring
//! - [`consensus`]: participants, weighted decisions, pluggable tally rules
//! - [`planning`]: goal graph, plan decomposition and execution, scenarios
//!   and hypotheses
//! - [`orchestrator`]: workflow selection and the refinement loop
//! - [`gateway`]: the JSON/HTTP surface
//!
//! External collaborators (tool server, local reasoner, memory store) live
//! behind the trait contracts of the `backends` crate.

pub mod config;
pub mod consensus;
pub mod error;
pub mod events;
pub mod gateway;
pub mod metacognition;
pub mod orchestrator;
pub mod persist;
pub mod planning;
pub mod query;
pub mod registry;
pub mod rollout;

// Re-export the key engine types
pub use config::Config;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use query::{Attachment, AttachmentKind, Modality, Query, QueryOptions};

pub use metacognition::{
    AnalysisContext, DecisionStrategy, IgnoranceKind, IgnoranceScore, Introspector, MetaCognition,
    MetaState, QualityReport, RouteDecision, SelfDoubt, TemporalSnapshot,
};

pub use consensus::{
    ConsensusEngine, ConsensusRule, ConsensusStats, Decision, DecisionStatus, NewDecision,
    Participant, Role, RoleWeights, TallyOutcome, Vote, VoteChoice,
};

pub use planning::{
    ExecutionSummary, Goal, GoalPriority, GoalStatus, Hypothesis, HypothesisOutcome,
    HypothesisRunner, Milestone, NewGoal, Plan, PlanStatus, PlanStrategy, Scenario,
    ScenarioAssumptions, Step, StepExecutor, StepStatus, StrategicPlanner,
};

pub use orchestrator::{
    Diagnostics, Orchestrator, OrchestratorResponse, OrchestratorSettings, RequestPhase,
    WorkflowKind,
};

pub use events::{EventBus, OrchestratorEvent, SharedEventBus};
pub use gateway::{build_router, AppState, RateLimiter};
pub use registry::{BackendEntry, BackendId, BackendRegistry, BackendSummary};
pub use rollout::{FeatureFlag, FlagStore, RolloutRule};
