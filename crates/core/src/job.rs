// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compound jobs: DAGs of actions, the unit of submission.
//!
//! The job owns its action table; parent/child edges are index sets into
//! that table, and external references are non-owning [`ActionHandle`]s.
//! All state transitions go through the job so the per-state sets stay a
//! partition of the action set.

use crate::action::{Action, ActionState};
use crate::failure::FailureCause;
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};
use thiserror::Error;

crate::define_id! {
    /// Unique identifier for a compound job.
    pub struct JobId("job-");
}

/// Shared handle to a compound job. The simulation is single-threaded, so
/// `Rc<RefCell<_>>` is the ownership story (services and the controller
/// observe the same job).
pub type JobRef = Rc<RefCell<CompoundJob>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("job {job} already has an action named {name:?}")]
    DuplicateActionName { job: JobId, name: SmolStr },
    #[error("job {job} has no action named {name:?}")]
    UnknownAction { job: JobId, name: SmolStr },
    #[error("dependency {parent:?} -> {child:?} would close a cycle")]
    DependencyCycle { parent: SmolStr, child: SmolStr },
    #[error("job {job} was already submitted")]
    AlreadySubmitted { job: JobId },
}

impl From<JobError> for FailureCause {
    fn from(e: JobError) -> Self {
        FailureCause::fatal(e.to_string())
    }
}

/// Lifecycle of the job as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    NotSubmitted,
    /// Accepted by a compute service, not all actions dispatched yet.
    Pending,
    Running,
    Completed,
    /// Failed or killed before completing.
    Discontinued,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Discontinued)
    }
}

crate::simple_display! {
    JobState {
        NotSubmitted => "not_submitted",
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Discontinued => "discontinued",
    }
}

/// A DAG of actions.
#[derive(Debug)]
pub struct CompoundJob {
    id: JobId,
    name: SmolStr,
    priority: f64,
    state: JobState,
    submit_date: Option<f64>,
    end_date: Option<f64>,
    /// Seconds charged by the dispatching service before / after the DAG.
    pre_overhead: f64,
    post_overhead: f64,
    actions: Vec<Action>,
    by_name: IndexMap<SmolStr, usize>,
    parents: Vec<BTreeSet<usize>>,
    children: Vec<BTreeSet<usize>>,
    /// Per-state action sets; always a partition of `0..actions.len()`.
    state_sets: IndexMap<ActionState, BTreeSet<usize>>,
    /// Jobs that must reach a terminal state before this one is
    /// submittable. Parents never point back, so `Rc` cannot cycle here.
    parent_jobs: Vec<JobRef>,
}

impl CompoundJob {
    pub fn new(name: impl Into<SmolStr>) -> JobRef {
        let id = JobId::generate();
        let mut name: SmolStr = name.into();
        if name.is_empty() {
            name = SmolStr::new(id.as_str());
        }
        let mut state_sets = IndexMap::new();
        for s in ActionState::ALL {
            state_sets.insert(s, BTreeSet::new());
        }
        Rc::new(RefCell::new(Self {
            id,
            name,
            priority: 0.0,
            state: JobState::NotSubmitted,
            submit_date: None,
            end_date: None,
            pre_overhead: 0.0,
            post_overhead: 0.0,
            actions: Vec::new(),
            by_name: IndexMap::new(),
            parents: Vec::new(),
            children: Vec::new(),
            state_sets,
            parent_jobs: Vec::new(),
        }))
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: f64) {
        self.priority = priority;
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn submit_date(&self) -> Option<f64> {
        self.submit_date
    }

    pub fn end_date(&self) -> Option<f64> {
        self.end_date
    }

    pub fn pre_overhead(&self) -> f64 {
        self.pre_overhead
    }

    pub fn post_overhead(&self) -> f64 {
        self.post_overhead
    }

    pub fn set_overheads(&mut self, pre: f64, post: f64) {
        self.pre_overhead = pre;
        self.post_overhead = post;
    }

    pub fn add_parent_job(&mut self, parent: JobRef) {
        self.parent_jobs.push(parent);
    }

    /// A job is submittable only when no parent job is in a non-terminal
    /// state.
    pub fn is_submittable(&self) -> bool {
        self.parent_jobs.iter().all(|p| p.borrow().state().is_terminal())
    }

    /// Add an action. An empty name auto-generates one. Names must be
    /// unique within the job.
    pub fn add_action(&mut self, mut action: Action) -> Result<usize, JobError> {
        if action.name().is_empty() {
            action = Action::new(
                format!("{}-{}", action.kind(), self.actions.len()),
                action.kind().clone(),
            )
            .with_resources(action.min_cores(), action.max_cores(), action.ram())
            .with_thread_overhead(action.thread_overhead());
        }
        let name = SmolStr::new(action.name());
        if self.by_name.contains_key(&name) {
            return Err(JobError::DuplicateActionName { job: self.id.clone(), name });
        }
        let index = self.actions.len();
        self.by_name.insert(name, index);
        self.actions.push(action);
        self.parents.push(BTreeSet::new());
        self.children.push(BTreeSet::new());
        self.state_set_mut(ActionState::NotReady).insert(index);
        Ok(index)
    }

    pub fn action(&self, index: usize) -> &Action {
        &self.actions[index]
    }

    /// Mutable access to an action's current attempt frame (executors
    /// stamp hosts, allocations, and failures here).
    pub fn action_frame_mut(&mut self, index: usize) -> &mut crate::action::ExecutionFrame {
        self.actions[index].frame_mut()
    }

    pub fn action_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn parents_of(&self, index: usize) -> &BTreeSet<usize> {
        &self.parents[index]
    }

    pub fn children_of(&self, index: usize) -> &BTreeSet<usize> {
        &self.children[index]
    }

    /// Add a `parent -> child` edge, refusing edges that would close a
    /// cycle.
    pub fn add_dependency(&mut self, parent: usize, child: usize) -> Result<(), JobError> {
        if parent == child || self.reaches(child, parent) {
            return Err(JobError::DependencyCycle {
                parent: SmolStr::new(self.actions[parent].name()),
                child: SmolStr::new(self.actions[child].name()),
            });
        }
        self.children[parent].insert(child);
        self.parents[child].insert(parent);
        Ok(())
    }

    /// DFS: is `to` reachable from `from` along child edges?
    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if seen.insert(n) {
                stack.extend(self.children[n].iter().copied());
            }
        }
        false
    }

    /// Actions currently in `state`.
    pub fn actions_in_state(&self, state: ActionState) -> &BTreeSet<usize> {
        // state_sets is seeded with every state at construction.
        static EMPTY: BTreeSet<usize> = BTreeSet::new();
        self.state_sets.get(&state).unwrap_or(&EMPTY)
    }

    fn state_set_mut(&mut self, state: ActionState) -> &mut BTreeSet<usize> {
        self.state_sets.entry(state).or_default()
    }

    /// Move an action to `state` and maintain the per-state partition.
    pub fn transition(
        &mut self,
        index: usize,
        state: ActionState,
        now: f64,
    ) -> Result<(), FailureCause> {
        let old = self.actions[index].state();
        self.actions[index].transition(state, now)?;
        self.state_set_mut(old).remove(&index);
        self.state_set_mut(state).insert(index);
        self.refresh_job_state(now);
        Ok(())
    }

    /// Mark job accepted by a service.
    pub fn mark_submitted(&mut self, now: f64) -> Result<(), JobError> {
        if self.state != JobState::NotSubmitted {
            return Err(JobError::AlreadySubmitted { job: self.id.clone() });
        }
        self.state = JobState::Pending;
        self.submit_date = Some(now);
        for index in 0..self.actions.len() {
            self.actions[index].frame_mut().submit_date = Some(now);
        }
        self.promote_ready(now);
        Ok(())
    }

    /// Return a pending job with no started work to the not-submitted
    /// state, so a meta-scheduler can resubmit it to a backing service.
    pub fn reset_for_resubmission(&mut self) {
        if self.state == JobState::Pending {
            self.state = JobState::NotSubmitted;
            self.submit_date = None;
        }
    }

    /// Promote NotReady actions whose parents have all completed.
    pub fn promote_ready(&mut self, now: f64) {
        let candidates: Vec<usize> =
            self.actions_in_state(ActionState::NotReady).iter().copied().collect();
        for index in candidates {
            let ready = self.parents[index]
                .iter()
                .all(|&p| self.actions[p].state() == ActionState::Completed);
            if ready {
                // NotReady -> Ready cannot fail.
                let _ = self.transition(index, ActionState::Ready, now);
            }
        }
    }

    /// Fail every non-terminal action (used when a parent action fails or
    /// the job is discontinued); terminal actions are left untouched.
    pub fn discontinue(&mut self, cause: FailureCause, now: f64) {
        for index in 0..self.actions.len() {
            let state = self.actions[index].state();
            if state.is_terminal() {
                continue;
            }
            let terminal = match cause {
                FailureCause::JobKilled | FailureCause::JobTimeout { .. } => ActionState::Killed,
                _ => ActionState::Failed,
            };
            self.actions[index].frame_mut().failure = Some(cause.clone());
            let _ = self.transition(index, terminal, now);
        }
    }

    /// Fail every non-terminal transitive child of a failed action:
    /// with a dead parent they can never become ready.
    pub fn propagate_failure(&mut self, index: usize, cause: FailureCause, now: f64) {
        let mut stack: Vec<usize> = self.children[index].iter().copied().collect();
        let mut seen = BTreeSet::new();
        while let Some(n) = stack.pop() {
            if !seen.insert(n) {
                continue;
            }
            stack.extend(self.children[n].iter().copied());
            if !self.actions[n].state().is_terminal() {
                self.actions[n].frame_mut().failure = Some(cause.clone());
                let _ = self.transition(n, ActionState::Failed, now);
            }
        }
    }

    fn refresh_job_state(&mut self, now: f64) {
        if self.state == JobState::NotSubmitted || self.state.is_terminal() {
            return;
        }
        if !self.actions_in_state(ActionState::Started).is_empty() {
            self.state = JobState::Running;
        }
        let all_terminal = self.actions.iter().all(|a| a.state().is_terminal());
        if all_terminal {
            let all_completed =
                self.actions.iter().all(|a| a.state() == ActionState::Completed);
            self.state =
                if all_completed { JobState::Completed } else { JobState::Discontinued };
            self.end_date = Some(now);
        }
    }

    /// First failure cause recorded on any action, if the job went wrong.
    pub fn failure(&self) -> Option<FailureCause> {
        self.actions.iter().find_map(|a| a.failure().cloned())
    }
}

/// Non-owning reference to an action inside a job.
#[derive(Debug, Clone)]
pub struct ActionHandle {
    job: Weak<RefCell<CompoundJob>>,
    index: usize,
    name: SmolStr,
}

impl ActionHandle {
    pub fn new(job: &JobRef, index: usize) -> Self {
        let name = SmolStr::new(job.borrow().action(index).name());
        Self { job: Rc::downgrade(job), index, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn job(&self) -> Option<JobRef> {
        self.job.upgrade()
    }

    pub fn state(&self) -> Option<ActionState> {
        Some(self.job.upgrade()?.borrow().action(self.index).state())
    }

    pub fn start_date(&self) -> Option<f64> {
        self.job.upgrade()?.borrow().action(self.index).start_date()
    }

    pub fn end_date(&self) -> Option<f64> {
        self.job.upgrade()?.borrow().action(self.index).end_date()
    }

    pub fn failure(&self) -> Option<FailureCause> {
        self.job.upgrade()?.borrow().action(self.index).failure().cloned()
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
