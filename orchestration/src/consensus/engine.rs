//! The consensus engine: registration, open decisions, votes, tallies.
//!
//! Participant and decision tables are process-wide behind reader-writer
//! locks (reads dominate). Vote casting is serialized per decision by the
//! write lock, so last-write-wins is well defined. The participant registry
//! is the one piece of durable state here, persisted as a small JSON file.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{info, warn};

use crate::config::ConsensusDefaults;
use crate::error::{CoreError, CoreResult};
use crate::events::{OrchestratorEvent, SharedEventBus};
use crate::persist;

use super::tally::{tally, TallyOutcome};
use super::{
    ConsensusRule, Decision, DecisionStatus, NewDecision, Participant, Role, RoleWeights, Vote,
    VoteChoice,
};

/// Aggregate counters for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusStats {
    pub participants: usize,
    pub participants_by_role: HashMap<String, usize>,
    pub decisions: usize,
    pub approved: usize,
    pub rejected: usize,
    pub open: usize,
}

pub struct ConsensusEngine {
    participants: RwLock<HashMap<String, Participant>>,
    decisions: RwLock<HashMap<String, Decision>>,
    weights: RoleWeights,
    auto_vote_agents: bool,
    agent_risk_threshold: f64,
    default_rule: ConsensusRule,
    default_deadline_ms: u64,
    persist_path: Option<PathBuf>,
    events: Option<SharedEventBus>,
}

impl ConsensusEngine {
    pub fn new(
        defaults: &ConsensusDefaults,
        persist_path: Option<PathBuf>,
        events: Option<SharedEventBus>,
    ) -> CoreResult<Self> {
        let mut participants = HashMap::new();
        if let Some(ref path) = persist_path {
            if let Some(saved) = persist::load_json::<Vec<Participant>>(path)? {
                for p in saved {
                    participants.insert(p.id.clone(), p);
                }
                info!(count = participants.len(), "participant registry restored");
            }
        }

        let default_rule = ConsensusRule::from_name(&defaults.r#type)
            .ok_or_else(|| CoreError::invalid_input(format!(
                "unknown consensus type '{}'",
                defaults.r#type
            )))?;

        Ok(Self {
            participants: RwLock::new(participants),
            decisions: RwLock::new(HashMap::new()),
            weights: defaults.role_weights.into(),
            auto_vote_agents: defaults.auto_vote_agents,
            agent_risk_threshold: defaults.agent_risk_threshold,
            default_rule,
            default_deadline_ms: defaults.deadline_ms,
            persist_path,
            events,
        })
    }

    /// Memory-only engine with built-in defaults, used by tests. Skips the
    /// fallible rule-name parse and persistence load entirely.
    pub fn ephemeral() -> Self {
        let defaults = ConsensusDefaults::default();
        Self {
            participants: RwLock::new(HashMap::new()),
            decisions: RwLock::new(HashMap::new()),
            weights: defaults.role_weights.into(),
            auto_vote_agents: defaults.auto_vote_agents,
            agent_risk_threshold: defaults.agent_risk_threshold,
            default_rule: ConsensusRule::Adaptive,
            default_deadline_ms: defaults.deadline_ms,
            persist_path: None,
            events: None,
        }
    }

    pub fn default_rule(&self) -> ConsensusRule {
        self.default_rule
    }

    pub fn default_deadline_ms(&self) -> u64 {
        self.default_deadline_ms
    }

    pub fn register_participant(
        &self,
        name: &str,
        role: Role,
        verified: bool,
    ) -> CoreResult<String> {
        let participant = Participant::new(name, role, verified, self.weights.weight_for(role));
        let id = participant.id.clone();
        {
            let mut table = self.participants.write().unwrap_or_else(|p| p.into_inner());
            table.insert(id.clone(), participant);
        }
        info!(participant = name, role = %role, verified, "participant registered");
        self.persist_participants()?;
        Ok(id)
    }

    pub fn participant(&self, id: &str) -> Option<Participant> {
        let table = self.participants.read().unwrap_or_else(|p| p.into_inner());
        table.get(id).cloned()
    }

    /// Whether anyone with the given role is registered.
    pub fn has_role(&self, role: Role) -> bool {
        let table = self.participants.read().unwrap_or_else(|p| p.into_inner());
        table.values().any(|p| p.role == role)
    }

    pub fn open_decision(&self, request: NewDecision) -> CoreResult<String> {
        if request.deadline <= Utc::now() {
            return Err(CoreError::invalid_input("decision deadline is in the past"));
        }
        if !(0.0..=1.0).contains(&request.criticality) {
            return Err(CoreError::invalid_input(format!(
                "criticality {} outside [0, 1]",
                request.criticality
            )));
        }

        let decision = Decision::from_request(request);
        let id = decision.id.clone();
        info!(
            decision_id = %id,
            title = %decision.title,
            criticality = decision.criticality,
            rule = ?decision.rule,
            "decision opened"
        );

        let mut table = self.decisions.write().unwrap_or_else(|p| p.into_inner());
        table.insert(id.clone(), decision);
        Ok(id)
    }

    pub fn decision(&self, id: &str) -> Option<Decision> {
        let table = self.decisions.read().unwrap_or_else(|p| p.into_inner());
        table.get(id).cloned()
    }

    /// Decisions still accepting votes, oldest first.
    pub fn open_decisions(&self) -> Vec<Decision> {
        let table = self.decisions.read().unwrap_or_else(|p| p.into_inner());
        let mut open: Vec<Decision> = table
            .values()
            .filter(|d| d.status == DecisionStatus::Open)
            .cloned()
            .collect();
        open.sort_by_key(|d| d.opened_at);
        open
    }

    pub fn cast_vote(
        &self,
        decision_id: &str,
        participant_id: &str,
        choice: VoteChoice,
        rationale: Option<String>,
    ) -> CoreResult<()> {
        let participant = self
            .participant(participant_id)
            .ok_or_else(|| CoreError::not_found(format!("participant {participant_id}")))?;

        {
            let mut decisions = self.decisions.write().unwrap_or_else(|p| p.into_inner());
            let decision = decisions
                .get_mut(decision_id)
                .ok_or_else(|| CoreError::not_found(format!("decision {decision_id}")))?;

            if decision.status.is_terminal() || Utc::now() >= decision.deadline {
                return Err(CoreError::precondition(format!(
                    "decision {decision_id} is closed to voting"
                )));
            }
            if decision.require_verified && !participant.verified {
                return Err(CoreError::unauthorized(format!(
                    "participant {} is not verified",
                    participant.name
                )));
            }

            decision.record_vote(Vote {
                participant_id: participant_id.to_string(),
                choice,
                rationale,
                cast_at: Utc::now(),
            });
        }

        {
            let mut participants = self.participants.write().unwrap_or_else(|p| p.into_inner());
            if let Some(p) = participants.get_mut(participant_id) {
                p.vote_count += 1;
                p.last_active = Utc::now();
            }
        }

        info!(decision_id, participant = %participant.name, choice = ?choice, "vote cast");
        Ok(())
    }

    /// Cast automatic votes for registered autonomous agents. An agent
    /// approves when a recommended option exists and its risk sits below the
    /// configured threshold, and abstains otherwise.
    pub fn auto_vote_agents(&self, decision_id: &str, option_risk: f64) -> CoreResult<usize> {
        if !self.auto_vote_agents {
            return Ok(0);
        }

        let decision = self
            .decision(decision_id)
            .ok_or_else(|| CoreError::not_found(format!("decision {decision_id}")))?;

        let agent_ids: Vec<String> = {
            let table = self.participants.read().unwrap_or_else(|p| p.into_inner());
            table
                .values()
                .filter(|p| p.role == Role::AutonomousAgent)
                .map(|p| p.id.clone())
                .collect()
        };

        let choice = if decision.recommended_option.is_some()
            && option_risk < self.agent_risk_threshold
        {
            VoteChoice::Approve
        } else {
            VoteChoice::Abstain
        };

        let mut cast = 0;
        for agent_id in agent_ids {
            let rationale = format!(
                "auto-vote: recommendation {}, option risk {option_risk:.2} vs threshold {:.2}",
                if decision.recommended_option.is_some() { "present" } else { "absent" },
                self.agent_risk_threshold
            );
            match self.cast_vote(decision_id, &agent_id, choice, Some(rationale)) {
                Ok(()) => cast += 1,
                Err(e) => warn!(decision_id, error = %e, "agent auto-vote skipped"),
            }
        }
        Ok(cast)
    }

    /// Evaluate the decision's rule over a consistent snapshot of votes and
    /// the current clock. Closes the decision on the first decided outcome.
    pub fn tally(&self, decision_id: &str) -> CoreResult<TallyOutcome> {
        let now = Utc::now();

        // Snapshot participants first; lock order is always participants
        // before decisions, never both held across the other's writer.
        let participants: HashMap<String, Participant> = {
            let table = self.participants.read().unwrap_or_else(|p| p.into_inner());
            table.clone()
        };

        let (outcome, just_closed) = {
            let mut decisions = self.decisions.write().unwrap_or_else(|p| p.into_inner());
            let decision = decisions
                .get_mut(decision_id)
                .ok_or_else(|| CoreError::not_found(format!("decision {decision_id}")))?;

            let was_open = decision.status == DecisionStatus::Open;
            let outcome = tally(decision, &participants, now);
            let just_closed = was_open && outcome.decided;
            if just_closed {
                decision.status = outcome.status;
                decision.outcome_rationale = Some(outcome.rationale.clone());
            }
            (outcome, just_closed)
        };

        if just_closed {
            info!(decision_id, status = ?outcome.status, rationale = %outcome.rationale, "decision closed");
            self.settle_agreement_rates(decision_id, outcome.status)?;
            if let Some(ref events) = self.events {
                events.publish(OrchestratorEvent::DecisionClosed {
                    decision_id: decision_id.to_string(),
                    status: outcome.status,
                    rationale: outcome.rationale.clone(),
                    timestamp: Utc::now(),
                });
            }
        }

        Ok(outcome)
    }

    fn settle_agreement_rates(
        &self,
        decision_id: &str,
        status: DecisionStatus,
    ) -> CoreResult<()> {
        let votes: Vec<Vote> = match self.decision(decision_id) {
            Some(d) => d.votes,
            None => return Ok(()),
        };
        let approved = status == DecisionStatus::Approved;

        {
            let mut participants = self.participants.write().unwrap_or_else(|p| p.into_inner());
            for vote in votes {
                if vote.choice == VoteChoice::Abstain {
                    continue;
                }
                if let Some(p) = participants.get_mut(&vote.participant_id) {
                    let agreed = (vote.choice == VoteChoice::Approve) == approved;
                    p.record_agreement(agreed);
                }
            }
        }
        self.persist_participants()
    }

    pub fn stats(&self) -> ConsensusStats {
        let participants = self.participants.read().unwrap_or_else(|p| p.into_inner());
        let decisions = self.decisions.read().unwrap_or_else(|p| p.into_inner());

        let mut by_role: HashMap<String, usize> = HashMap::new();
        for p in participants.values() {
            *by_role.entry(p.role.name().to_string()).or_default() += 1;
        }

        ConsensusStats {
            participants: participants.len(),
            participants_by_role: by_role,
            decisions: decisions.len(),
            approved: decisions
                .values()
                .filter(|d| d.status == DecisionStatus::Approved)
                .count(),
            rejected: decisions
                .values()
                .filter(|d| matches!(d.status, DecisionStatus::Rejected | DecisionStatus::Expired))
                .count(),
            open: decisions
                .values()
                .filter(|d| d.status == DecisionStatus::Open)
                .count(),
        }
    }

    fn persist_participants(&self) -> CoreResult<()> {
        if let Some(ref path) = self.persist_path {
            let table = self.participants.read().unwrap_or_else(|p| p.into_inner());
            let list: Vec<&Participant> = table.values().collect();
            persist::save_json_atomic(path, &list)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::Duration;

    fn request(criticality: f64, rule: ConsensusRule) -> NewDecision {
        NewDecision {
            title: "apply migration".into(),
            description: "run the schema migration".into(),
            decision_type: "operation".into(),
            criticality,
            recommended_option: Some("proceed".into()),
            required_roles: vec![],
            rule,
            deadline: Utc::now() + Duration::minutes(5),
            require_verified: false,
        }
    }

    #[test]
    fn test_open_decision_validation() {
        let engine = ConsensusEngine::ephemeral();

        let mut past = request(0.5, ConsensusRule::Weighted);
        past.deadline = Utc::now() - Duration::seconds(1);
        assert_eq!(
            engine.open_decision(past).unwrap_err().kind,
            ErrorKind::InvalidInput
        );

        let out_of_range = request(1.5, ConsensusRule::Weighted);
        assert_eq!(
            engine.open_decision(out_of_range).unwrap_err().kind,
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_vote_and_tally_weighted() {
        let engine = ConsensusEngine::ephemeral();
        let user = engine
            .register_participant("ana", Role::PrimaryUser, true)
            .unwrap();
        let admin = engine
            .register_participant("ops", Role::Administrator, true)
            .unwrap();
        let decision = engine.open_decision(request(0.5, ConsensusRule::Weighted)).unwrap();

        engine.cast_vote(&decision, &user, VoteChoice::Approve, None).unwrap();
        engine.cast_vote(&decision, &admin, VoteChoice::Reject, None).unwrap();

        let outcome = engine.tally(&decision).unwrap();
        assert!(outcome.decided);
        assert_eq!(outcome.status, DecisionStatus::Approved);

        // decision is closed now; further voting is a precondition failure
        let err = engine
            .cast_vote(&decision, &admin, VoteChoice::Approve, None)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Precondition);
    }

    #[test]
    fn test_last_write_wins_before_tally() {
        let engine = ConsensusEngine::ephemeral();
        let user = engine
            .register_participant("ana", Role::PrimaryUser, true)
            .unwrap();
        let decision = engine.open_decision(request(0.5, ConsensusRule::Weighted)).unwrap();

        engine.cast_vote(&decision, &user, VoteChoice::Approve, None).unwrap();
        engine.cast_vote(&decision, &user, VoteChoice::Reject, None).unwrap();

        let outcome = engine.tally(&decision).unwrap();
        assert_eq!(outcome.status, DecisionStatus::Rejected);

        let stored = engine.decision(&decision).unwrap();
        assert_eq!(stored.votes.len(), 1);
    }

    #[test]
    fn test_unknown_ids_are_not_found() {
        let engine = ConsensusEngine::ephemeral();
        let user = engine
            .register_participant("ana", Role::PrimaryUser, true)
            .unwrap();

        let err = engine
            .cast_vote("missing", &user, VoteChoice::Approve, None)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let decision = engine.open_decision(request(0.5, ConsensusRule::Weighted)).unwrap();
        let err = engine
            .cast_vote(&decision, "missing", VoteChoice::Approve, None)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_unverified_participant_rejected_when_required() {
        let engine = ConsensusEngine::ephemeral();
        let user = engine
            .register_participant("ana", Role::PrimaryUser, false)
            .unwrap();
        let mut req = request(0.9, ConsensusRule::Weighted);
        req.require_verified = true;
        let decision = engine.open_decision(req).unwrap();

        let err = engine
            .cast_vote(&decision, &user, VoteChoice::Approve, None)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn test_agent_auto_vote_approves_below_threshold() {
        let engine = ConsensusEngine::ephemeral();
        engine
            .register_participant("bot", Role::AutonomousAgent, true)
            .unwrap();
        let decision = engine.open_decision(request(0.5, ConsensusRule::Weighted)).unwrap();

        let cast = engine.auto_vote_agents(&decision, 0.2).unwrap();
        assert_eq!(cast, 1);
        let stored = engine.decision(&decision).unwrap();
        assert_eq!(stored.votes[0].choice, VoteChoice::Approve);
    }

    #[test]
    fn test_agent_auto_vote_abstains_on_high_risk() {
        let engine = ConsensusEngine::ephemeral();
        engine
            .register_participant("bot", Role::AutonomousAgent, true)
            .unwrap();
        let decision = engine.open_decision(request(0.5, ConsensusRule::Weighted)).unwrap();

        engine.auto_vote_agents(&decision, 0.9).unwrap();
        let stored = engine.decision(&decision).unwrap();
        assert_eq!(stored.votes[0].choice, VoteChoice::Abstain);
    }

    #[test]
    fn test_registry_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("participants.json");

        {
            let engine = ConsensusEngine::new(
                &ConsensusDefaults::default(),
                Some(path.clone()),
                None,
            )
            .unwrap();
            engine
                .register_participant("ana", Role::PrimaryUser, true)
                .unwrap();
        }

        let engine =
            ConsensusEngine::new(&ConsensusDefaults::default(), Some(path), None).unwrap();
        assert!(engine.has_role(Role::PrimaryUser));
        assert_eq!(engine.stats().participants, 1);
    }

    #[test]
    fn test_agreement_rate_updates_after_close() {
        let engine = ConsensusEngine::ephemeral();
        let user = engine
            .register_participant("ana", Role::PrimaryUser, true)
            .unwrap();
        let decision = engine.open_decision(request(0.5, ConsensusRule::Weighted)).unwrap();
        engine.cast_vote(&decision, &user, VoteChoice::Approve, None).unwrap();
        engine.tally(&decision).unwrap();

        let p = engine.participant(&user).unwrap();
        assert_eq!(p.vote_count, 1);
        assert_eq!(p.agreement_rate, 1.0);
    }
}
