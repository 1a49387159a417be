//! Plan decomposition and step-graph helpers.
//!
//! Decomposition is rule-based over the goal's success criteria. The step
//! graph must stay acyclic; in sequential mode the dependencies form a
//! chain. Hybrid mode serializes criteria that mention a shared `@resource`
//! tag and leaves the rest parallel.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::{Goal, Plan, PlanStatus, PlanStrategy, Step, StepStatus};

/// Progress breakdown for a plan
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlanProgress {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub failed: usize,
    /// `(completed + 0.5·in_progress) / total`
    pub fraction: f64,
}

/// Result summary returned by plan execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub plan_id: String,
    pub status: PlanStatus,
    pub steps_executed: usize,
    pub steps_succeeded: usize,
    pub steps_failed: usize,
    pub progress: f64,
}

/// Default steps when a goal carries no success criteria.
fn generic_steps(goal: &Goal) -> Vec<Step> {
    vec![
        Step::new(
            &format!("Understand requirements for: {}", goal.title),
            vec!["conversational_responder".into()],
        ),
        Step::new(
            &format!("Execute main task for: {}", goal.title),
            vec!["retriever".into(), "synthesize".into()],
        ),
        Step::new(
            &format!("Review and finalize: {}", goal.title),
            vec!["synthesize".into()],
        ),
    ]
}

/// Resource tags are `@`-prefixed tokens inside a criterion, e.g.
/// "write results to @database".
fn resource_tags(criterion: &str) -> Vec<String> {
    criterion
        .split_whitespace()
        .filter_map(|token| {
            let tag = token.trim_matches(|c: char| !c.is_alphanumeric() && c != '@');
            tag.strip_prefix('@')
                .filter(|rest| !rest.is_empty())
                .map(|rest| rest.to_lowercase())
        })
        .collect()
}

/// Decompose a goal into a plan under the given strategy.
pub fn decompose(goal: &Goal, strategy: PlanStrategy) -> Plan {
    let mut steps: Vec<Step> = if goal.success_criteria.is_empty() {
        generic_steps(goal)
    } else {
        goal.success_criteria
            .iter()
            .map(|criterion| Step::new(criterion, vec![]))
            .collect()
    };

    match strategy {
        PlanStrategy::Sequential => {
            // chain: each step depends on its predecessor
            for i in 1..steps.len() {
                let prev = steps[i - 1].id.clone();
                steps[i].depends_on_step_ids.push(prev);
            }
        }
        PlanStrategy::Parallel => {
            // no inter-step dependencies
        }
        PlanStrategy::Hybrid => {
            // steps whose criteria share a resource tag form sequential
            // sibling chains in declaration order
            let mut last_for_tag: HashMap<String, usize> = HashMap::new();
            for i in 0..steps.len() {
                let tags = resource_tags(&steps[i].description);
                let mut deps = HashSet::new();
                for tag in &tags {
                    if let Some(&prev) = last_for_tag.get(tag) {
                        deps.insert(steps[prev].id.clone());
                    }
                }
                steps[i].depends_on_step_ids.extend(deps);
                for tag in tags {
                    last_for_tag.insert(tag, i);
                }
            }
        }
    }

    let total_estimated_minutes = steps.iter().map(|s| s.estimated_minutes).sum();
    Plan {
        id: uuid::Uuid::new_v4().to_string(),
        goal_id: goal.id.clone(),
        strategy,
        steps,
        status: PlanStatus::Pending,
        total_estimated_minutes,
        created_at: Utc::now(),
    }
}

/// Steps whose dependencies have all completed and that have not started.
pub fn ready_steps(plan: &Plan) -> Vec<String> {
    let completed: HashSet<&str> = plan
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .map(|s| s.id.as_str())
        .collect();

    plan.steps
        .iter()
        .filter(|s| {
            s.status == StepStatus::Pending
                && s.depends_on_step_ids
                    .iter()
                    .all(|dep| completed.contains(dep.as_str()))
        })
        .map(|s| s.id.clone())
        .collect()
}

pub fn progress(plan: &Plan) -> PlanProgress {
    let total = plan.steps.len();
    let completed = plan
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .count();
    let in_progress = plan
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::InProgress)
        .count();
    let failed = plan
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .count();

    let fraction = if total == 0 {
        0.0
    } else {
        (completed as f64 + 0.5 * in_progress as f64) / total as f64
    };

    PlanProgress {
        total,
        completed,
        in_progress,
        failed,
        fraction,
    }
}

/// Deterministic retry backoff in milliseconds, seeded by step id.
/// Doubling per attempt keeps tests reproducible without a clock or RNG.
pub fn backoff_ms(step_id: &str, attempt: u32) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in step_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let base = 10 + hash % 40;
    base * (1u64 << attempt.min(6))
}
