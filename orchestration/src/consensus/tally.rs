//! Pure tally over a decision's counted votes.
//!
//! Total and side-effect free: the same `(votes, deadline, rule, weights,
//! now)` always produces the same outcome, and every input produces one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use super::{ConsensusRule, Decision, DecisionStatus, Participant, Role, VoteChoice};

/// Outcome of a tally pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TallyOutcome {
    pub decided: bool,
    pub status: DecisionStatus,
    pub rationale: String,
}

impl TallyOutcome {
    fn open(rationale: impl Into<String>) -> Self {
        Self {
            decided: false,
            status: DecisionStatus::Open,
            rationale: rationale.into(),
        }
    }

    fn closed(status: DecisionStatus, rationale: impl Into<String>) -> Self {
        Self {
            decided: true,
            status,
            rationale: rationale.into(),
        }
    }
}

/// Resolve the adaptive rule by criticality. The weighted band includes its
/// 0.75 upper bound.
pub fn effective_rule(rule: ConsensusRule, criticality: f64) -> ConsensusRule {
    match rule {
        ConsensusRule::Adaptive => {
            if criticality < 0.4 {
                ConsensusRule::SimpleMajority
            } else if criticality <= 0.75 {
                ConsensusRule::Weighted
            } else if criticality <= 0.9 {
                ConsensusRule::Supermajority
            } else {
                ConsensusRule::Unanimous
            }
        }
        concrete => concrete,
    }
}

struct CountedVote {
    role: Role,
    weight: f64,
    choice: VoteChoice,
}

/// Votes that count: cast by a known participant whose role is required.
/// With no explicit required roles, every non-observer role counts.
fn counted_votes(
    decision: &Decision,
    participants: &HashMap<String, Participant>,
) -> Vec<CountedVote> {
    decision
        .votes
        .iter()
        .filter_map(|vote| {
            let participant = participants.get(&vote.participant_id)?;
            let role_required = if decision.required_roles.is_empty() {
                participant.role != Role::Observer
            } else {
                decision.required_roles.contains(&participant.role)
            };
            role_required.then_some(CountedVote {
                role: participant.role,
                weight: participant.weight,
                choice: vote.choice,
            })
        })
        .collect()
}

pub fn tally(
    decision: &Decision,
    participants: &HashMap<String, Participant>,
    now: DateTime<Utc>,
) -> TallyOutcome {
    if decision.status.is_terminal() {
        return TallyOutcome {
            decided: true,
            status: decision.status,
            rationale: decision
                .outcome_rationale
                .clone()
                .unwrap_or_else(|| "already closed".to_string()),
        };
    }

    let rule = effective_rule(decision.rule, decision.criticality);
    let votes = counted_votes(decision, participants);
    let past_deadline = now >= decision.deadline;

    if let Some(outcome) = apply_rule(rule, decision, participants, &votes) {
        return outcome;
    }

    if past_deadline {
        return resolve_at_deadline(rule, &votes);
    }

    TallyOutcome::open(format!(
        "undecided with {} counted vote(s) before deadline",
        votes.len()
    ))
}

fn apply_rule(
    rule: ConsensusRule,
    decision: &Decision,
    participants: &HashMap<String, Participant>,
    votes: &[CountedVote],
) -> Option<TallyOutcome> {
    match rule {
        ConsensusRule::Weighted => {
            // Abstentions are present but not approving.
            let present: f64 = votes.iter().map(|v| v.weight).sum();
            if present <= 0.0 {
                return None;
            }
            let approve: f64 = votes
                .iter()
                .filter(|v| v.choice == VoteChoice::Approve)
                .map(|v| v.weight)
                .sum();
            let reject: f64 = votes
                .iter()
                .filter(|v| v.choice == VoteChoice::Reject)
                .map(|v| v.weight)
                .sum();

            let ratio = approve / present;
            if ratio >= 0.60 {
                Some(TallyOutcome::closed(
                    DecisionStatus::Approved,
                    format!("weighted approval {:.1}% ≥ 60%", ratio * 100.0),
                ))
            } else if reject > approve {
                Some(TallyOutcome::closed(
                    DecisionStatus::Rejected,
                    format!(
                        "weighted rejection: reject {:.2} outweighs approve {:.2}",
                        reject, approve
                    ),
                ))
            } else {
                None
            }
        }
        ConsensusRule::SimpleMajority => {
            let approve = votes.iter().filter(|v| v.choice == VoteChoice::Approve).count();
            let reject = votes.iter().filter(|v| v.choice == VoteChoice::Reject).count();
            (approve > reject).then(|| {
                TallyOutcome::closed(
                    DecisionStatus::Approved,
                    format!("simple majority {approve} approve vs {reject} reject"),
                )
            })
        }
        ConsensusRule::Supermajority => {
            let present = votes.len();
            if present == 0 {
                return None;
            }
            let approve = votes.iter().filter(|v| v.choice == VoteChoice::Approve).count();
            let ratio = approve as f64 / present as f64;
            (ratio >= 2.0 / 3.0).then(|| {
                TallyOutcome::closed(
                    DecisionStatus::Approved,
                    format!("supermajority {approve}/{present} present"),
                )
            })
        }
        ConsensusRule::Unanimous => {
            if votes.iter().any(|v| v.choice == VoteChoice::Reject) {
                return Some(TallyOutcome::closed(
                    DecisionStatus::Rejected,
                    "unanimity broken by a reject vote",
                ));
            }

            let roles_to_cover: Vec<Role> = if decision.required_roles.is_empty() {
                let mut roles: Vec<Role> = participants
                    .values()
                    .map(|p| p.role)
                    .filter(|r| *r != Role::Observer)
                    .collect();
                roles.sort_by_key(|r| *r as u8);
                roles.dedup();
                roles
            } else {
                decision.required_roles.clone()
            };

            let covered = !roles_to_cover.is_empty()
                && roles_to_cover.iter().all(|role| {
                    votes
                        .iter()
                        .any(|v| v.role == *role && v.choice == VoteChoice::Approve)
                });
            let all_approve = !votes.is_empty()
                && votes.iter().all(|v| v.choice == VoteChoice::Approve);

            (covered && all_approve).then(|| {
                TallyOutcome::closed(
                    DecisionStatus::Approved,
                    format!("unanimous approval across {} role(s)", roles_to_cover.len()),
                )
            })
        }
        ConsensusRule::Adaptive => unreachable!("adaptive resolved before apply_rule"),
    }
}

/// Deadline reached without a rule passing. In order: adopt a primary-user
/// vote, then an administrator vote, otherwise close without approval.
fn resolve_at_deadline(rule: ConsensusRule, votes: &[CountedVote]) -> TallyOutcome {
    for role in [Role::PrimaryUser, Role::Administrator] {
        if let Some(vote) = votes
            .iter()
            .find(|v| v.role == role && v.choice != VoteChoice::Abstain)
        {
            let status = match vote.choice {
                VoteChoice::Approve => DecisionStatus::Approved,
                VoteChoice::Reject => DecisionStatus::Rejected,
                VoteChoice::Abstain => unreachable!(),
            };
            return TallyOutcome::closed(
                status,
                format!("conflict resolution: adopted {role} vote at deadline"),
            );
        }
    }

    if votes.is_empty() {
        if rule == ConsensusRule::Unanimous {
            return TallyOutcome::closed(
                DecisionStatus::Rejected,
                "no required-role voters present by deadline",
            );
        }
        return TallyOutcome::closed(DecisionStatus::Expired, "timeout");
    }

    TallyOutcome::closed(DecisionStatus::Rejected, "no consensus by deadline")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{NewDecision, RoleWeights, Vote};
    use chrono::Duration;

    struct Fixture {
        decision: Decision,
        participants: HashMap<String, Participant>,
    }

    impl Fixture {
        fn new(rule: ConsensusRule, criticality: f64) -> Self {
            Self {
                decision: Decision::from_request(NewDecision {
                    title: "route query".into(),
                    description: "".into(),
                    decision_type: "component_routing".into(),
                    criticality,
                    recommended_option: Some("tool_server".into()),
                    required_roles: vec![],
                    rule,
                    deadline: Utc::now() + Duration::minutes(5),
                    require_verified: false,
                }),
                participants: HashMap::new(),
            }
        }

        fn add(&mut self, name: &str, role: Role) -> String {
            let weights = RoleWeights::default();
            let p = Participant::new(name, role, true, weights.weight_for(role));
            let id = p.id.clone();
            self.participants.insert(id.clone(), p);
            id
        }

        fn vote(&mut self, participant_id: &str, choice: VoteChoice) {
            self.decision.record_vote(Vote {
                participant_id: participant_id.to_string(),
                choice,
                rationale: None,
                cast_at: Utc::now(),
            });
        }
    }

    #[test]
    fn test_weighted_user_vs_admin() {
        let mut fx = Fixture::new(ConsensusRule::Weighted, 0.5);
        let user = fx.add("ana", Role::PrimaryUser);
        let admin = fx.add("ops", Role::Administrator);
        fx.vote(&user, VoteChoice::Approve);
        fx.vote(&admin, VoteChoice::Reject);

        let outcome = tally(&fx.decision, &fx.participants, Utc::now());
        assert!(outcome.decided);
        assert_eq!(outcome.status, DecisionStatus::Approved);
    }

    #[test]
    fn test_weighted_reject_outweighs() {
        let mut fx = Fixture::new(ConsensusRule::Weighted, 0.5);
        let admin = fx.add("ops", Role::Administrator);
        let agent = fx.add("bot", Role::AutonomousAgent);
        fx.vote(&admin, VoteChoice::Reject);
        fx.vote(&agent, VoteChoice::Approve);

        let outcome = tally(&fx.decision, &fx.participants, Utc::now());
        assert_eq!(outcome.status, DecisionStatus::Rejected);
    }

    #[test]
    fn test_weighted_abstain_counts_as_present() {
        let mut fx = Fixture::new(ConsensusRule::Weighted, 0.5);
        let user = fx.add("ana", Role::PrimaryUser);
        let admin = fx.add("ops", Role::Administrator);
        // 0.6 approve / 0.9 present = 66.7% → approved
        fx.vote(&user, VoteChoice::Approve);
        fx.vote(&admin, VoteChoice::Abstain);
        let outcome = tally(&fx.decision, &fx.participants, Utc::now());
        assert_eq!(outcome.status, DecisionStatus::Approved);

        // flip: 0.3 approve / 0.9 present = 33% → undecided before deadline
        let mut fx = Fixture::new(ConsensusRule::Weighted, 0.5);
        let user = fx.add("ana", Role::PrimaryUser);
        let admin = fx.add("ops", Role::Administrator);
        fx.vote(&user, VoteChoice::Abstain);
        fx.vote(&admin, VoteChoice::Approve);
        let outcome = tally(&fx.decision, &fx.participants, Utc::now());
        assert!(!outcome.decided);
    }

    #[test]
    fn test_simple_majority() {
        let mut fx = Fixture::new(ConsensusRule::SimpleMajority, 0.2);
        let a = fx.add("a", Role::PrimaryUser);
        let b = fx.add("b", Role::Administrator);
        let c = fx.add("c", Role::AutonomousAgent);
        fx.vote(&a, VoteChoice::Approve);
        fx.vote(&b, VoteChoice::Approve);
        fx.vote(&c, VoteChoice::Reject);

        let outcome = tally(&fx.decision, &fx.participants, Utc::now());
        assert_eq!(outcome.status, DecisionStatus::Approved);
    }

    #[test]
    fn test_supermajority_boundary() {
        let mut fx = Fixture::new(ConsensusRule::Supermajority, 0.5);
        let a = fx.add("a", Role::PrimaryUser);
        let b = fx.add("b", Role::Administrator);
        let c = fx.add("c", Role::AutonomousAgent);
        fx.vote(&a, VoteChoice::Approve);
        fx.vote(&b, VoteChoice::Approve);
        fx.vote(&c, VoteChoice::Reject);

        // exactly 2/3 present approving
        let outcome = tally(&fx.decision, &fx.participants, Utc::now());
        assert_eq!(outcome.status, DecisionStatus::Approved);
    }

    #[test]
    fn test_unanimous_requires_role_coverage() {
        let mut fx = Fixture::new(ConsensusRule::Unanimous, 0.95);
        fx.decision.required_roles = vec![Role::PrimaryUser, Role::Administrator];
        let user = fx.add("ana", Role::PrimaryUser);
        let _admin = fx.add("ops", Role::Administrator);
        fx.vote(&user, VoteChoice::Approve);

        // administrator has not voted yet
        let outcome = tally(&fx.decision, &fx.participants, Utc::now());
        assert!(!outcome.decided);
    }

    #[test]
    fn test_unanimous_zero_voters_rejected_at_deadline() {
        let mut fx = Fixture::new(ConsensusRule::Unanimous, 0.95);
        fx.decision.deadline = Utc::now() - Duration::seconds(1);
        let outcome = tally(&fx.decision, &fx.participants, Utc::now());
        assert_eq!(outcome.status, DecisionStatus::Rejected);
    }

    #[test]
    fn test_timeout_with_no_votes_expires() {
        let mut fx = Fixture::new(ConsensusRule::Weighted, 0.5);
        fx.decision.deadline = Utc::now() - Duration::seconds(1);
        let outcome = tally(&fx.decision, &fx.participants, Utc::now());
        assert_eq!(outcome.status, DecisionStatus::Expired);
        assert_eq!(outcome.rationale, "timeout");
    }

    #[test]
    fn test_conflict_resolution_prefers_primary_user() {
        let mut fx = Fixture::new(ConsensusRule::Supermajority, 0.5);
        let user = fx.add("ana", Role::PrimaryUser);
        let admin = fx.add("ops", Role::Administrator);
        let agent = fx.add("bot", Role::AutonomousAgent);
        fx.vote(&user, VoteChoice::Reject);
        fx.vote(&admin, VoteChoice::Approve);
        fx.vote(&agent, VoteChoice::Abstain);
        fx.decision.deadline = Utc::now() - Duration::seconds(1);

        let outcome = tally(&fx.decision, &fx.participants, Utc::now());
        assert_eq!(outcome.status, DecisionStatus::Rejected);
        assert!(outcome.rationale.contains("primary_user"));
    }

    #[test]
    fn test_adaptive_bands() {
        assert_eq!(
            effective_rule(ConsensusRule::Adaptive, 0.2),
            ConsensusRule::SimpleMajority
        );
        assert_eq!(
            effective_rule(ConsensusRule::Adaptive, 0.4),
            ConsensusRule::Weighted
        );
        // inclusive lower bound: exactly 0.75 stays weighted
        assert_eq!(
            effective_rule(ConsensusRule::Adaptive, 0.75),
            ConsensusRule::Weighted
        );
        assert_eq!(
            effective_rule(ConsensusRule::Adaptive, 0.8),
            ConsensusRule::Supermajority
        );
        assert_eq!(
            effective_rule(ConsensusRule::Adaptive, 0.95),
            ConsensusRule::Unanimous
        );
        // concrete rules pass through
        assert_eq!(
            effective_rule(ConsensusRule::Weighted, 0.95),
            ConsensusRule::Weighted
        );
    }

    #[test]
    fn test_observer_votes_never_counted() {
        let mut fx = Fixture::new(ConsensusRule::SimpleMajority, 0.2);
        let watcher = fx.add("watcher", Role::Observer);
        fx.vote(&watcher, VoteChoice::Approve);

        let outcome = tally(&fx.decision, &fx.participants, Utc::now());
        assert!(!outcome.decided);
    }

    #[test]
    fn test_tally_is_pure() {
        let mut fx = Fixture::new(ConsensusRule::Weighted, 0.5);
        let user = fx.add("ana", Role::PrimaryUser);
        fx.vote(&user, VoteChoice::Approve);
        let now = Utc::now();

        let first = tally(&fx.decision, &fx.participants, now);
        for _ in 0..3 {
            assert_eq!(tally(&fx.decision, &fx.participants, now), first);
        }
    }
}
