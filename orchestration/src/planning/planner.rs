//! The planner facade: owns the goal/plan/scenario/hypothesis tables and
//! drives plan execution.
//!
//! Locks are held only for table access, never across a suspension point;
//! execution works on step snapshots and writes results back. A global
//! semaphore caps concurrently running steps across all plans.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{watch, Semaphore};
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::events::{OrchestratorEvent, SharedEventBus};

use super::goals::GoalArena;
use super::plans::{self, ExecutionSummary};
use super::scenario::{self, SimulationResult};
use super::{
    Goal, GoalStatus, Hypothesis, HypothesisOutcome, HypothesisRunner, Milestone, NewGoal, Plan,
    PlanStatus, PlanStrategy, Scenario, ScenarioAssumptions, Step, StepExecutor, StepStatus,
};

/// Counts for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct PlannerSnapshot {
    pub goals: usize,
    pub goals_completed: usize,
    pub plans: usize,
    pub milestones: usize,
    pub milestones_achieved: usize,
    pub scenarios: usize,
    pub hypotheses: usize,
    pub hypotheses_confirmed: usize,
}

pub struct StrategicPlanner {
    arena: RwLock<GoalArena>,
    plans: RwLock<HashMap<String, Plan>>,
    scenarios: RwLock<HashMap<String, Scenario>>,
    hypotheses: RwLock<HashMap<String, Hypothesis>>,
    cancel_signals: RwLock<HashMap<String, watch::Sender<bool>>>,
    step_permits: Arc<Semaphore>,
    max_step_attempts: u32,
    events: Option<SharedEventBus>,
}

impl StrategicPlanner {
    pub fn new(
        plan_concurrency: usize,
        max_step_attempts: u32,
        events: Option<SharedEventBus>,
    ) -> Self {
        Self {
            arena: RwLock::new(GoalArena::new()),
            plans: RwLock::new(HashMap::new()),
            scenarios: RwLock::new(HashMap::new()),
            hypotheses: RwLock::new(HashMap::new()),
            cancel_signals: RwLock::new(HashMap::new()),
            step_permits: Arc::new(Semaphore::new(plan_concurrency.max(1))),
            max_step_attempts: max_step_attempts.max(1),
            events,
        }
    }

    // ── Goals ────────────────────────────────────────────────────────────

    pub fn create_goal(&self, request: NewGoal) -> CoreResult<Goal> {
        let mut arena = self.arena.write().unwrap_or_else(|p| p.into_inner());
        arena.create(request)
    }

    pub fn goal(&self, id: &str) -> Option<Goal> {
        let arena = self.arena.read().unwrap_or_else(|p| p.into_inner());
        arena.get(id).cloned()
    }

    pub fn update_goal_status(&self, id: &str, status: GoalStatus) -> CoreResult<()> {
        let mut arena = self.arena.write().unwrap_or_else(|p| p.into_inner());
        arena.set_status(id, status)
    }

    pub fn list_executable(&self) -> Vec<Goal> {
        let arena = self.arena.read().unwrap_or_else(|p| p.into_inner());
        arena.list_executable()
    }

    pub fn list_goals(&self, status: Option<GoalStatus>) -> Vec<Goal> {
        let arena = self.arena.read().unwrap_or_else(|p| p.into_inner());
        arena.list_prioritized(status)
    }

    /// Cancel a goal: incomplete descendants transition to cancelled and
    /// running plan executions observe the signal at their next check.
    pub fn cancel_goal(&self, id: &str) -> CoreResult<Vec<String>> {
        let cancelled = {
            let mut arena = self.arena.write().unwrap_or_else(|p| p.into_inner());
            arena.cancel_cascade(id)?
        };

        {
            let signals = self.cancel_signals.read().unwrap_or_else(|p| p.into_inner());
            for goal_id in &cancelled {
                if let Some(tx) = signals.get(goal_id) {
                    let _ = tx.send(true);
                }
            }
        }

        if let Some(ref events) = self.events {
            events.publish(OrchestratorEvent::GoalCancelled {
                goal_id: id.to_string(),
                cascade_count: cancelled.len(),
                timestamp: Utc::now(),
            });
        }
        Ok(cancelled)
    }

    // ── Milestones ───────────────────────────────────────────────────────

    pub fn record_milestone(
        &self,
        goal_id: &str,
        title: &str,
        target_date: chrono::DateTime<Utc>,
        criteria: Vec<String>,
    ) -> CoreResult<Milestone> {
        let mut arena = self.arena.write().unwrap_or_else(|p| p.into_inner());
        arena.record_milestone(goal_id, title, target_date, criteria)
    }

    pub fn check_milestone(
        &self,
        milestone_id: &str,
        context: &HashMap<String, String>,
    ) -> CoreResult<bool> {
        let mut arena = self.arena.write().unwrap_or_else(|p| p.into_inner());
        arena.check_milestone(milestone_id, context)
    }

    // ── Plans ────────────────────────────────────────────────────────────

    pub fn create_plan(&self, goal_id: &str, strategy: PlanStrategy) -> CoreResult<Plan> {
        let goal = self
            .goal(goal_id)
            .ok_or_else(|| CoreError::not_found(format!("goal {goal_id}")))?;

        let plan = plans::decompose(&goal, strategy);
        info!(
            plan_id = %plan.id,
            goal_id,
            strategy = ?strategy,
            steps = plan.steps.len(),
            "plan created"
        );
        let mut table = self.plans.write().unwrap_or_else(|p| p.into_inner());
        table.insert(plan.id.clone(), plan.clone());
        Ok(plan)
    }

    pub fn plan(&self, id: &str) -> Option<Plan> {
        let table = self.plans.read().unwrap_or_else(|p| p.into_inner());
        table.get(id).cloned()
    }

    fn with_plan_mut<R>(&self, id: &str, f: impl FnOnce(&mut Plan) -> R) -> CoreResult<R> {
        let mut table = self.plans.write().unwrap_or_else(|p| p.into_inner());
        let plan = table
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("plan {id}")))?;
        Ok(f(plan))
    }

    fn step_snapshot(&self, plan_id: &str, step_id: &str) -> CoreResult<Step> {
        let table = self.plans.read().unwrap_or_else(|p| p.into_inner());
        table
            .get(plan_id)
            .and_then(|p| p.steps.iter().find(|s| s.id == step_id))
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("step {step_id}")))
    }

    /// Execute a plan against the caller-supplied step executor, honoring
    /// the dependency graph: parallel branches run concurrently under the
    /// global cap, sequential branches wait. Failed steps are retried up to
    /// the configured attempt budget with deterministic backoff.
    pub async fn execute_plan(
        &self,
        plan_id: &str,
        executor: Arc<dyn StepExecutor>,
    ) -> CoreResult<ExecutionSummary> {
        let plan = self
            .plan(plan_id)
            .ok_or_else(|| CoreError::not_found(format!("plan {plan_id}")))?;

        let goal_id = plan.goal_id.clone();
        {
            let arena = self.arena.read().unwrap_or_else(|p| p.into_inner());
            if !arena.is_executable(&goal_id) {
                return Err(CoreError::precondition(format!(
                    "goal {goal_id} is not executable (pending with completed dependencies)"
                )));
            }
        }

        self.update_goal_status(&goal_id, GoalStatus::InProgress)?;
        self.with_plan_mut(plan_id, |p| p.status = PlanStatus::InProgress)?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut signals = self.cancel_signals.write().unwrap_or_else(|p| p.into_inner());
            signals.insert(goal_id.clone(), cancel_tx);
        }

        let mut executed = 0usize;
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        loop {
            if *cancel_rx.borrow() {
                self.mark_remaining_cancelled(plan_id)?;
                break;
            }

            let current = self
                .plan(plan_id)
                .ok_or_else(|| CoreError::not_found(format!("plan {plan_id}")))?;
            let ready = plans::ready_steps(&current);

            if ready.is_empty() {
                break;
            }

            let wave: Vec<_> = ready
                .iter()
                .map(|step_id| self.run_step(plan_id, step_id, executor.clone(), cancel_rx.clone()))
                .collect();
            let results = futures::future::join_all(wave).await;

            for result in results {
                executed += 1;
                match result? {
                    StepStatus::Completed => succeeded += 1,
                    StepStatus::Cancelled => {}
                    _ => failed += 1,
                }
            }

            // Progress after each wave of terminal transitions.
            let current = self
                .plan(plan_id)
                .ok_or_else(|| CoreError::not_found(format!("plan {plan_id}")))?;
            let progress = plans::progress(&current);
            {
                let mut arena = self.arena.write().unwrap_or_else(|p| p.into_inner());
                let _ = arena.set_progress(&goal_id, progress.fraction);
            }

            if failed > 0 {
                break;
            }
        }

        {
            let mut signals = self.cancel_signals.write().unwrap_or_else(|p| p.into_inner());
            signals.remove(&goal_id);
        }

        let final_plan = self
            .plan(plan_id)
            .ok_or_else(|| CoreError::not_found(format!("plan {plan_id}")))?;
        let progress = plans::progress(&final_plan);
        let cancelled = final_plan
            .steps
            .iter()
            .any(|s| s.status == StepStatus::Cancelled);

        let plan_status = if cancelled {
            PlanStatus::Cancelled
        } else if progress.completed == progress.total {
            PlanStatus::Completed
        } else if progress.failed > 0 {
            PlanStatus::Failed
        } else {
            PlanStatus::Pending
        };
        self.with_plan_mut(plan_id, |p| p.status = plan_status)?;

        {
            let mut arena = self.arena.write().unwrap_or_else(|p| p.into_inner());
            match plan_status {
                PlanStatus::Completed => {
                    let _ = arena.set_progress(&goal_id, 1.0);
                    // set_progress promotes an in-progress goal to completed
                }
                PlanStatus::Failed => {
                    let _ = arena.set_status(&goal_id, GoalStatus::Failed);
                }
                _ => {}
            }
        }

        info!(
            plan_id,
            status = ?plan_status,
            executed,
            succeeded,
            failed,
            "plan execution finished"
        );

        Ok(ExecutionSummary {
            plan_id: plan_id.to_string(),
            status: plan_status,
            steps_executed: executed,
            steps_succeeded: succeeded,
            steps_failed: failed,
            progress: plans::progress(
                &self
                    .plan(plan_id)
                    .ok_or_else(|| CoreError::not_found(format!("plan {plan_id}")))?,
            )
            .fraction,
        })
    }

    /// Run one step to a terminal status, retrying on failure.
    async fn run_step(
        &self,
        plan_id: &str,
        step_id: &str,
        executor: Arc<dyn StepExecutor>,
        cancel_rx: watch::Receiver<bool>,
    ) -> CoreResult<StepStatus> {
        let _permit = self
            .step_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::internal("step semaphore closed"))?;

        self.with_plan_mut(plan_id, |plan| {
            if let Some(step) = plan.steps.iter_mut().find(|s| s.id == step_id) {
                step.status = StepStatus::InProgress;
                step.started_at = Some(Utc::now());
            }
        })?;

        let mut terminal = StepStatus::Failed;

        for attempt in 1..=self.max_step_attempts {
            if *cancel_rx.borrow() {
                terminal = StepStatus::Cancelled;
                break;
            }

            let snapshot = {
                let mut snap = self.step_snapshot(plan_id, step_id)?;
                snap.attempts = attempt;
                snap
            };
            self.with_plan_mut(plan_id, |plan| {
                if let Some(step) = plan.steps.iter_mut().find(|s| s.id == step_id) {
                    step.attempts = attempt;
                }
            })?;

            match executor.execute(&snapshot).await {
                Ok(result) => {
                    self.with_plan_mut(plan_id, |plan| {
                        if let Some(step) = plan.steps.iter_mut().find(|s| s.id == step_id) {
                            step.status = StepStatus::Completed;
                            step.finished_at = Some(Utc::now());
                            step.result = Some(result);
                            step.error = None;
                        }
                    })?;
                    terminal = StepStatus::Completed;
                    break;
                }
                Err(message) => {
                    warn!(plan_id, step_id, attempt, error = %message, "step attempt failed");
                    self.with_plan_mut(plan_id, |plan| {
                        if let Some(step) = plan.steps.iter_mut().find(|s| s.id == step_id) {
                            step.error = Some(message);
                        }
                    })?;
                    if attempt < self.max_step_attempts {
                        let delay = plans::backoff_ms(step_id, attempt - 1);
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        if terminal != StepStatus::Completed {
            let status = if *cancel_rx.borrow() {
                StepStatus::Cancelled
            } else {
                terminal
            };
            terminal = status;
            self.with_plan_mut(plan_id, |plan| {
                if let Some(step) = plan.steps.iter_mut().find(|s| s.id == step_id) {
                    step.status = status;
                    step.finished_at = Some(Utc::now());
                }
            })?;
        }

        let attempts = self.step_snapshot(plan_id, step_id)?.attempts;
        if let Some(ref events) = self.events {
            events.publish(OrchestratorEvent::PlanStepTerminal {
                plan_id: plan_id.to_string(),
                step_id: step_id.to_string(),
                status: terminal,
                attempts,
                timestamp: Utc::now(),
            });
        }
        Ok(terminal)
    }

    fn mark_remaining_cancelled(&self, plan_id: &str) -> CoreResult<()> {
        self.with_plan_mut(plan_id, |plan| {
            for step in &mut plan.steps {
                if !step.status.is_terminal() {
                    step.status = StepStatus::Cancelled;
                    step.finished_at = Some(Utc::now());
                }
            }
        })
    }

    // ── Scenarios ────────────────────────────────────────────────────────

    pub fn create_scenario(&self, title: &str, assumptions: ScenarioAssumptions) -> Scenario {
        let scenario = Scenario {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            assumptions,
            simulated_success_probability: None,
            reasoning: String::new(),
            created_at: Utc::now(),
        };
        let mut table = self.scenarios.write().unwrap_or_else(|p| p.into_inner());
        table.insert(scenario.id.clone(), scenario.clone());
        scenario
    }

    pub fn simulate(&self, scenario_id: &str) -> CoreResult<SimulationResult> {
        let mut table = self.scenarios.write().unwrap_or_else(|p| p.into_inner());
        let stored = table
            .get_mut(scenario_id)
            .ok_or_else(|| CoreError::not_found(format!("scenario {scenario_id}")))?;
        let result = scenario::simulate_assumptions(&stored.assumptions);
        scenario::apply_simulation(stored, &result);
        Ok(result)
    }

    /// Simulated scenarios ranked by success probability, best first.
    pub fn compare_scenarios(&self) -> Vec<Scenario> {
        let table = self.scenarios.read().unwrap_or_else(|p| p.into_inner());
        let mut simulated: Vec<Scenario> = table
            .values()
            .filter(|s| s.simulated_success_probability.is_some())
            .cloned()
            .collect();
        simulated.sort_by(|a, b| {
            b.simulated_success_probability
                .partial_cmp(&a.simulated_success_probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        simulated
    }

    // ── Hypotheses ───────────────────────────────────────────────────────

    pub fn create_hypothesis(
        &self,
        statement: &str,
        rationale: &str,
        procedure: Vec<String>,
        criteria: Vec<String>,
        prior_confidence: f64,
    ) -> Hypothesis {
        let hypothesis = Hypothesis {
            id: uuid::Uuid::new_v4().to_string(),
            statement: statement.to_string(),
            rationale: rationale.to_string(),
            procedure,
            criteria,
            prior_confidence: prior_confidence.clamp(0.0, 1.0),
            posterior_confidence: prior_confidence.clamp(0.0, 1.0),
            outcome: HypothesisOutcome::Untested,
            evidence: Vec::new(),
            tested_at: None,
        };
        let mut table = self.hypotheses.write().unwrap_or_else(|p| p.into_inner());
        table.insert(hypothesis.id.clone(), hypothesis.clone());
        hypothesis
    }

    pub fn hypothesis(&self, id: &str) -> Option<Hypothesis> {
        let table = self.hypotheses.read().unwrap_or_else(|p| p.into_inner());
        table.get(id).cloned()
    }

    pub async fn test_hypothesis(
        &self,
        hypothesis_id: &str,
        runner: Arc<dyn HypothesisRunner>,
    ) -> CoreResult<HypothesisOutcome> {
        let mut hypothesis = self
            .hypothesis(hypothesis_id)
            .ok_or_else(|| CoreError::not_found(format!("hypothesis {hypothesis_id}")))?;

        let outcome = match runner.run(&hypothesis.procedure).await {
            Ok(output) => scenario::apply_test_result(&mut hypothesis, &output),
            Err(error) => {
                hypothesis.evidence.push(format!("test error: {error}"));
                hypothesis.outcome = HypothesisOutcome::Inconclusive;
                hypothesis.tested_at = Some(Utc::now());
                HypothesisOutcome::Inconclusive
            }
        };

        let mut table = self.hypotheses.write().unwrap_or_else(|p| p.into_inner());
        table.insert(hypothesis.id.clone(), hypothesis);
        Ok(outcome)
    }

    // ── Status ───────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> PlannerSnapshot {
        let arena = self.arena.read().unwrap_or_else(|p| p.into_inner());
        let plans = self.plans.read().unwrap_or_else(|p| p.into_inner());
        let scenarios = self.scenarios.read().unwrap_or_else(|p| p.into_inner());
        let hypotheses = self.hypotheses.read().unwrap_or_else(|p| p.into_inner());
        let (milestones, milestones_achieved) = arena.milestone_count();

        PlannerSnapshot {
            goals: arena.len(),
            goals_completed: arena
                .all()
                .filter(|g| g.status == GoalStatus::Completed)
                .count(),
            plans: plans.len(),
            milestones,
            milestones_achieved,
            scenarios: scenarios.len(),
            hypotheses: hypotheses.len(),
            hypotheses_confirmed: hypotheses
                .values()
                .filter(|h| h.outcome == HypothesisOutcome::Confirmed)
                .count(),
        }
    }
}
