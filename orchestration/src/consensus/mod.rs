//! Multi-stakeholder consensus: participants, decisions, weighted voting.
//!
//! Critical actions pass through here before the orchestrator acts on them.
//! Participants carry role-based voting weights; decisions close when a
//! pluggable rule passes, the deadline arrives, or conflict resolution
//! adopts a senior vote.

pub mod engine;
pub mod tally;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RoleWeightConfig;

pub use engine::{ConsensusEngine, ConsensusStats};
pub use tally::{effective_rule, TallyOutcome};

/// Stakeholder role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    PrimaryUser,
    Administrator,
    AutonomousAgent,
    /// Observers see decisions but carry no voting weight
    Observer,
}

impl Role {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "primary_user" => Some(Self::PrimaryUser),
            "administrator" => Some(Self::Administrator),
            "autonomous_agent" => Some(Self::AutonomousAgent),
            "observer" => Some(Self::Observer),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PrimaryUser => "primary_user",
            Self::Administrator => "administrator",
            Self::AutonomousAgent => "autonomous_agent",
            Self::Observer => "observer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A vote option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Approve,
    Reject,
    Abstain,
}

/// Consensus rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusRule {
    Weighted,
    SimpleMajority,
    Supermajority,
    Unanimous,
    /// Rule picked from decision criticality at tally time
    Adaptive,
}

impl ConsensusRule {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "weighted" => Some(Self::Weighted),
            "simple_majority" => Some(Self::SimpleMajority),
            "supermajority" => Some(Self::Supermajority),
            "unanimous" => Some(Self::Unanimous),
            "adaptive" => Some(Self::Adaptive),
            _ => None,
        }
    }
}

/// Lifecycle of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Open,
    Approved,
    Rejected,
    Expired,
    Deferred,
}

impl DecisionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Voting weights by role; the tally renormalizes over present voters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoleWeights {
    pub primary_user: f64,
    pub administrator: f64,
    pub autonomous_agent: f64,
    pub observer: f64,
}

impl Default for RoleWeights {
    fn default() -> Self {
        Self {
            primary_user: 0.60,
            administrator: 0.30,
            autonomous_agent: 0.10,
            observer: 0.0,
        }
    }
}

impl From<RoleWeightConfig> for RoleWeights {
    fn from(cfg: RoleWeightConfig) -> Self {
        Self {
            primary_user: cfg.primary_user,
            administrator: cfg.administrator,
            autonomous_agent: cfg.autonomous_agent,
            observer: cfg.observer,
        }
    }
}

impl RoleWeights {
    pub fn weight_for(&self, role: Role) -> f64 {
        match role {
            Role::PrimaryUser => self.primary_user,
            Role::Administrator => self.administrator,
            Role::AutonomousAgent => self.autonomous_agent,
            Role::Observer => self.observer,
        }
    }
}

/// A registered stakeholder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub verified: bool,
    pub weight: f64,
    pub registered_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub vote_count: u32,
    /// Exponential moving average of agreement with final outcomes
    pub agreement_rate: f64,
}

impl Participant {
    pub fn new(name: &str, role: Role, verified: bool, weight: f64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            role,
            verified,
            weight,
            registered_at: now,
            last_active: now,
            vote_count: 0,
            agreement_rate: 1.0,
        }
    }

    /// EMA update with α = 0.1.
    pub fn record_agreement(&mut self, agreed: bool) {
        let alpha = 0.1;
        let signal = if agreed { 1.0 } else { 0.0 };
        self.agreement_rate = alpha * signal + (1.0 - alpha) * self.agreement_rate;
    }
}

/// One counted vote; at most one per participant per decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub participant_id: String,
    pub choice: VoteChoice,
    pub rationale: Option<String>,
    pub cast_at: DateTime<Utc>,
}

/// Parameters for opening a decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDecision {
    pub title: String,
    pub description: String,
    pub decision_type: String,
    pub criticality: f64,
    pub recommended_option: Option<String>,
    #[serde(default)]
    pub required_roles: Vec<Role>,
    pub rule: ConsensusRule,
    pub deadline: DateTime<Utc>,
    /// When set, unverified participants get `UNAUTHORIZED` on vote
    #[serde(default)]
    pub require_verified: bool,
}

/// A decision held open for votes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub title: String,
    pub description: String,
    pub decision_type: String,
    pub criticality: f64,
    pub recommended_option: Option<String>,
    pub required_roles: Vec<Role>,
    pub rule: ConsensusRule,
    pub deadline: DateTime<Utc>,
    pub require_verified: bool,
    pub votes: Vec<Vote>,
    pub status: DecisionStatus,
    pub outcome_rationale: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl Decision {
    pub fn from_request(request: NewDecision) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: request.title,
            description: request.description,
            decision_type: request.decision_type,
            criticality: request.criticality,
            recommended_option: request.recommended_option,
            required_roles: request.required_roles,
            rule: request.rule,
            deadline: request.deadline,
            require_verified: request.require_verified,
            votes: Vec::new(),
            status: DecisionStatus::Open,
            outcome_rationale: None,
            opened_at: Utc::now(),
        }
    }

    /// Replace any prior vote from the same participant (last write wins).
    pub fn record_vote(&mut self, vote: Vote) {
        self.votes
            .retain(|v| v.participant_id != vote.participant_id);
        self.votes.push(vote);
    }
}
