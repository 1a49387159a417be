//! Goal arena: the id-addressed goal table with hierarchy and dependencies.
//!
//! Both the parent hierarchy and the dependency graph must stay acyclic;
//! creation rejects any edge that would close a cycle. Cancellation cascades
//! to incomplete descendants.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::error::{CoreError, CoreResult};

use super::{Goal, GoalPriority, GoalStatus, Milestone, NewGoal};

/// Id-addressed goal and milestone tables
#[derive(Debug, Default)]
pub struct GoalArena {
    goals: HashMap<String, Goal>,
    milestones: HashMap<String, Milestone>,
}

impl GoalArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, request: NewGoal) -> CoreResult<Goal> {
        if request.title.trim().is_empty() {
            return Err(CoreError::invalid_input("goal title is empty"));
        }
        if let Some(ref parent_id) = request.parent_id {
            if !self.goals.contains_key(parent_id) {
                return Err(CoreError::not_found(format!("parent goal {parent_id}")));
            }
        }
        for dep in &request.dependency_ids {
            if !self.goals.contains_key(dep) {
                return Err(CoreError::not_found(format!("dependency goal {dep}")));
            }
        }

        let goal = Goal {
            id: uuid::Uuid::new_v4().to_string(),
            title: request.title,
            description: request.description,
            priority: request.priority,
            status: GoalStatus::Pending,
            parent_id: request.parent_id,
            dependency_ids: request.dependency_ids,
            success_criteria: request.success_criteria,
            progress: 0.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        // New nodes cannot close a parent cycle (the parent chain is
        // existing goals only), but a dependency on an ancestor's dependent
        // can. Validate both graphs before inserting.
        self.check_dependency_cycle(&goal)?;

        info!(goal_id = %goal.id, title = %goal.title, priority = ?goal.priority, "goal created");
        self.goals.insert(goal.id.clone(), goal.clone());
        Ok(goal)
    }

    /// Walk the dependency graph from the new goal; a path back to any of
    /// its dependents would be a cycle. Since the goal is not inserted yet,
    /// it can only be part of a cycle if one of its dependencies reaches a
    /// goal that depends (transitively) on one of its would-be dependents —
    /// impossible for a fresh id — so verify the existing graph instead.
    fn check_dependency_cycle(&self, goal: &Goal) -> CoreResult<()> {
        let mut visited = HashSet::new();
        let mut stack: Vec<&String> = goal.dependency_ids.iter().collect();

        while let Some(current) = stack.pop() {
            if current == &goal.id {
                return Err(CoreError::invalid_input(format!(
                    "dependency cycle through goal {}",
                    goal.id
                )));
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.goals.get(current) {
                stack.extend(node.dependency_ids.iter());
            }
        }
        Ok(())
    }

    /// Re-wire an existing goal's dependencies, rejecting cycles.
    pub fn set_dependencies(&mut self, goal_id: &str, deps: Vec<String>) -> CoreResult<()> {
        for dep in &deps {
            if !self.goals.contains_key(dep) {
                return Err(CoreError::not_found(format!("dependency goal {dep}")));
            }
        }

        // Simulate the new edge set and search for a path from any new
        // dependency back to this goal.
        let mut visited = HashSet::new();
        let mut stack: Vec<String> = deps.clone();
        while let Some(current) = stack.pop() {
            if current == goal_id {
                return Err(CoreError::invalid_input(format!(
                    "dependency cycle through goal {goal_id}"
                )));
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.goals.get(&current) {
                stack.extend(node.dependency_ids.iter().cloned());
            }
        }

        let goal = self
            .goals
            .get_mut(goal_id)
            .ok_or_else(|| CoreError::not_found(format!("goal {goal_id}")))?;
        goal.dependency_ids = deps;
        goal.updated_at = Utc::now();
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Goal> {
        self.goals.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Goal> {
        self.goals.values()
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    /// A goal is executable when it is pending and every dependency has
    /// completed.
    pub fn is_executable(&self, id: &str) -> bool {
        let Some(goal) = self.goals.get(id) else {
            return false;
        };
        goal.status == GoalStatus::Pending
            && goal.dependency_ids.iter().all(|dep| {
                self.goals
                    .get(dep)
                    .map(|d| d.status == GoalStatus::Completed)
                    .unwrap_or(false)
            })
    }

    pub fn list_executable(&self) -> Vec<Goal> {
        let mut out: Vec<Goal> = self
            .goals
            .values()
            .filter(|g| self.is_executable(&g.id))
            .cloned()
            .collect();
        out.sort_by_key(|g| (g.priority.rank(), g.created_at));
        out
    }

    pub fn list_prioritized(&self, status_filter: Option<GoalStatus>) -> Vec<Goal> {
        let mut out: Vec<Goal> = self
            .goals
            .values()
            .filter(|g| status_filter.map(|s| g.status == s).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by_key(|g| (g.priority.rank(), g.created_at));
        out
    }

    pub fn set_status(&mut self, id: &str, status: GoalStatus) -> CoreResult<()> {
        let goal = self
            .goals
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("goal {id}")))?;

        if goal.status.is_terminal() && goal.status != status {
            return Err(CoreError::precondition(format!(
                "goal {id} is already {:?}",
                goal.status
            )));
        }

        let old = goal.status;
        goal.status = status;
        goal.updated_at = Utc::now();
        if status == GoalStatus::Completed {
            goal.progress = 1.0;
        }
        info!(goal_id = %id, from = ?old, to = ?status, "goal status changed");

        if status == GoalStatus::Completed {
            let parent_id = goal.parent_id.clone();
            if let Some(pid) = parent_id {
                self.recompute_parent_progress(&pid);
            }
        }
        Ok(())
    }

    /// Progress only moves forward within a status run; a status change
    /// resets the floor.
    pub fn set_progress(&mut self, id: &str, progress: f64) -> CoreResult<f64> {
        let goal = self
            .goals
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("goal {id}")))?;

        let clamped = progress.clamp(0.0, 1.0).max(goal.progress);
        goal.progress = clamped;
        goal.updated_at = Utc::now();

        if clamped >= 1.0 && goal.status == GoalStatus::InProgress {
            goal.status = GoalStatus::Completed;
            let parent_id = goal.parent_id.clone();
            if let Some(pid) = parent_id {
                self.recompute_parent_progress(&pid);
            }
        }
        Ok(clamped)
    }

    /// Parent progress is the mean of its children's progress.
    fn recompute_parent_progress(&mut self, parent_id: &str) {
        let children: Vec<f64> = self
            .goals
            .values()
            .filter(|g| g.parent_id.as_deref() == Some(parent_id))
            .map(|g| g.progress)
            .collect();
        if children.is_empty() {
            return;
        }
        let mean = children.iter().sum::<f64>() / children.len() as f64;
        if let Some(parent) = self.goals.get_mut(parent_id) {
            parent.progress = parent.progress.max(mean);
            parent.updated_at = Utc::now();
        }
    }

    /// Cancel a goal and every incomplete descendant. Returns the ids that
    /// transitioned, depth-first from the root.
    pub fn cancel_cascade(&mut self, id: &str) -> CoreResult<Vec<String>> {
        if !self.goals.contains_key(id) {
            return Err(CoreError::not_found(format!("goal {id}")));
        }

        let mut cancelled = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            let children: Vec<String> = self
                .goals
                .values()
                .filter(|g| g.parent_id.as_deref() == Some(current.as_str()))
                .map(|g| g.id.clone())
                .collect();
            stack.extend(children);

            if let Some(goal) = self.goals.get_mut(&current) {
                if !goal.status.is_terminal() {
                    goal.status = GoalStatus::Cancelled;
                    goal.updated_at = Utc::now();
                    cancelled.push(current);
                }
            }
        }
        info!(goal_id = %id, cascade = cancelled.len(), "goal cancelled");
        Ok(cancelled)
    }

    // ── Milestones ───────────────────────────────────────────────────────

    pub fn record_milestone(
        &mut self,
        goal_id: &str,
        title: &str,
        target_date: chrono::DateTime<Utc>,
        criteria: Vec<String>,
    ) -> CoreResult<Milestone> {
        if !self.goals.contains_key(goal_id) {
            return Err(CoreError::not_found(format!("goal {goal_id}")));
        }
        let milestone = Milestone {
            id: uuid::Uuid::new_v4().to_string(),
            goal_id: goal_id.to_string(),
            title: title.to_string(),
            target_date,
            criteria,
            achieved: false,
            achieved_at: None,
        };
        self.milestones
            .insert(milestone.id.clone(), milestone.clone());
        Ok(milestone)
    }

    /// A milestone is achieved when at least 70% of its criteria appear in
    /// the supplied context values.
    pub fn check_milestone(
        &mut self,
        milestone_id: &str,
        context: &HashMap<String, String>,
    ) -> CoreResult<bool> {
        let milestone = self
            .milestones
            .get_mut(milestone_id)
            .ok_or_else(|| CoreError::not_found(format!("milestone {milestone_id}")))?;

        if milestone.achieved {
            return Ok(true);
        }
        if milestone.criteria.is_empty() {
            return Ok(false);
        }

        let haystack: String = context
            .values()
            .map(|v| v.to_lowercase())
            .collect::<Vec<_>>()
            .join("\n");
        let met = milestone
            .criteria
            .iter()
            .filter(|c| haystack.contains(&c.to_lowercase()))
            .count();

        if (met as f64) >= milestone.criteria.len() as f64 * 0.7 {
            milestone.achieved = true;
            milestone.achieved_at = Some(Utc::now());
            info!(milestone_id, title = %milestone.title, "milestone achieved");
            return Ok(true);
        }
        Ok(false)
    }

    pub fn milestones_for(&self, goal_id: &str) -> Vec<&Milestone> {
        self.milestones
            .values()
            .filter(|m| m.goal_id == goal_id)
            .collect()
    }

    pub fn milestone_count(&self) -> (usize, usize) {
        let achieved = self.milestones.values().filter(|m| m.achieved).count();
        (self.milestones.len(), achieved)
    }
}
