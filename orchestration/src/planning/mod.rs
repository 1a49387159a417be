//! Strategic planning: goal graph, plans, milestones, scenarios, hypotheses.
//!
//! Goals, plans, steps, and milestones live in index-addressed tables and
//! reference each other by id only; there are no back-pointers. The
//! [`StrategicPlanner`] facade in [`planner`] owns the tables and enforces
//! the dependency and concurrency rules during execution.

pub mod goals;
pub mod planner;
pub mod plans;
pub mod scenario;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use goals::GoalArena;
pub use planner::{PlannerSnapshot, StrategicPlanner};
pub use plans::{ExecutionSummary, PlanProgress};
pub use scenario::{simulate_assumptions, SimulationResult};

/// Goal priority, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl GoalPriority {
    /// Sort key: lower ranks first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

/// Goal lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl GoalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A node in the goal hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: GoalPriority,
    pub status: GoalStatus,
    pub parent_id: Option<String>,
    pub dependency_ids: Vec<String>,
    pub success_criteria: Vec<String>,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGoal {
    pub title: String,
    pub description: String,
    pub priority: GoalPriority,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub dependency_ids: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

/// Plan decomposition strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    /// One step per success criterion, chained in order
    Sequential,
    /// One step per criterion, no inter-step dependencies
    Parallel,
    /// Criteria sharing a resource tag become sequential; the rest parallel
    Hybrid,
}

/// Plan lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Step lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled)
    }
}

/// One executable unit inside a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub description: String,
    pub required_tools: Vec<String>,
    pub depends_on_step_ids: Vec<String>,
    pub status: StepStatus,
    pub attempts: u32,
    pub estimated_minutes: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Step {
    pub fn new(description: &str, required_tools: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.to_string(),
            required_tools,
            depends_on_step_ids: Vec::new(),
            status: StepStatus::Pending,
            attempts: 0,
            estimated_minutes: 30.0,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

/// A plan derived from a goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal_id: String,
    pub strategy: PlanStrategy,
    pub steps: Vec<Step>,
    pub status: PlanStatus,
    pub total_estimated_minutes: f64,
    pub created_at: DateTime<Utc>,
}

/// A dated checkpoint for a goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub goal_id: String,
    pub title: String,
    pub target_date: DateTime<Utc>,
    pub criteria: Vec<String>,
    pub achieved: bool,
    pub achieved_at: Option<DateTime<Utc>>,
}

/// Assumptions a scenario is simulated under
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioAssumptions {
    /// low | medium | high
    #[serde(default)]
    pub complexity: String,
    #[serde(default)]
    pub available_resources: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// A what-if scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    pub assumptions: ScenarioAssumptions,
    pub simulated_success_probability: Option<f64>,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of testing a hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisOutcome {
    Untested,
    Confirmed,
    Refuted,
    Inconclusive,
}

/// A testable hypothesis with prior and posterior confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub statement: String,
    pub rationale: String,
    pub procedure: Vec<String>,
    pub criteria: Vec<String>,
    pub prior_confidence: f64,
    pub posterior_confidence: f64,
    pub outcome: HypothesisOutcome,
    pub evidence: Vec<String>,
    pub tested_at: Option<DateTime<Utc>>,
}

/// Caller-supplied executor invoked once per step attempt.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Returns the step result, or a failure message the planner records
    /// before retrying.
    async fn execute(&self, step: &Step) -> Result<serde_json::Value, String>;
}

/// Caller-supplied runner for hypothesis test procedures.
#[async_trait]
pub trait HypothesisRunner: Send + Sync {
    /// Runs the procedure and returns its observable output.
    async fn run(&self, procedure: &[String]) -> Result<String, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(GoalPriority::Critical.rank() < GoalPriority::High.rank());
        assert!(GoalPriority::High.rank() < GoalPriority::Medium.rank());
        assert!(GoalPriority::Medium.rank() < GoalPriority::Low.rank());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(GoalStatus::Completed.is_terminal());
        assert!(GoalStatus::Failed.is_terminal());
        assert!(GoalStatus::Cancelled.is_terminal());
        assert!(!GoalStatus::Paused.is_terminal());
        assert!(!GoalStatus::Pending.is_terminal());
        assert!(!GoalStatus::InProgress.is_terminal());

        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::InProgress.is_terminal());
    }
}
