// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflows: the presentation layer over compound jobs.
//!
//! A [`Workflow`] is a DAG of [`WorkflowTask`]s; a task maps onto one or
//! more actions at submission via [`StandardJob`] assembly.

use crate::action::{Action, ActionKind, ParallelModel};
use crate::file::{File, FileId};
use crate::job::{CompoundJob, JobError, JobRef};
use crate::location::Location;
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("workflow already has a task named {0:?}")]
    DuplicateTask(SmolStr),
    #[error("unknown task {0:?}")]
    UnknownTask(SmolStr),
    #[error("dependency {parent:?} -> {child:?} would close a cycle")]
    Cycle { parent: SmolStr, child: SmolStr },
    #[error("no known location for file {0}")]
    MissingFileLocation(FileId),
    #[error(transparent)]
    Job(#[from] JobError),
}

/// Task lifecycle, tracked by the workflow as jobs complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    NotReady,
    Ready,
    Submitted,
    Completed,
}

crate::simple_display! {
    TaskState {
        NotReady => "not_ready",
        Ready => "ready",
        Submitted => "submitted",
        Completed => "completed",
    }
}

/// A workflow task: a declared quantity of compute work plus its file
/// footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTask {
    pub name: SmolStr,
    pub flops: f64,
    pub min_cores: u32,
    pub max_cores: u32,
    pub ram: u64,
    pub model: ParallelModel,
    pub inputs: Vec<File>,
    pub outputs: Vec<File>,
    pub state: TaskState,
}

impl WorkflowTask {
    pub fn new(name: impl Into<SmolStr>, flops: f64, min_cores: u32, max_cores: u32) -> Self {
        Self {
            name: name.into(),
            flops,
            min_cores: min_cores.max(1),
            max_cores: max_cores.max(min_cores.max(1)),
            ram: 0,
            model: ParallelModel::PERFECT,
            inputs: Vec::new(),
            outputs: Vec::new(),
            state: TaskState::NotReady,
        }
    }

    crate::setters! {
        /// RAM footprint, bytes.
        ram: u64,
        /// How the task's work scales with its core allocation.
        model: ParallelModel,
    }

    pub fn with_input(mut self, file: File) -> Self {
        self.inputs.push(file);
        self
    }

    pub fn with_output(mut self, file: File) -> Self {
        self.outputs.push(file);
        self
    }
}

/// A finite DAG of workflow tasks.
#[derive(Debug, Default)]
pub struct Workflow {
    tasks: IndexMap<SmolStr, WorkflowTask>,
    parents: IndexMap<SmolStr, BTreeSet<SmolStr>>,
    children: IndexMap<SmolStr, BTreeSet<SmolStr>>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, task: WorkflowTask) -> Result<(), WorkflowError> {
        let name = task.name.clone();
        if self.tasks.contains_key(&name) {
            return Err(WorkflowError::DuplicateTask(name));
        }
        self.parents.insert(name.clone(), BTreeSet::new());
        self.children.insert(name.clone(), BTreeSet::new());
        self.tasks.insert(name, task);
        Ok(())
    }

    pub fn task(&self, name: &str) -> Option<&WorkflowTask> {
        self.tasks.get(name)
    }

    pub fn task_mut(&mut self, name: &str) -> Option<&mut WorkflowTask> {
        self.tasks.get_mut(name)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn add_control_dependency(
        &mut self,
        parent: &str,
        child: &str,
    ) -> Result<(), WorkflowError> {
        if !self.tasks.contains_key(parent) {
            return Err(WorkflowError::UnknownTask(SmolStr::new(parent)));
        }
        if !self.tasks.contains_key(child) {
            return Err(WorkflowError::UnknownTask(SmolStr::new(child)));
        }
        if parent == child || self.reaches(child, parent) {
            return Err(WorkflowError::Cycle {
                parent: SmolStr::new(parent),
                child: SmolStr::new(child),
            });
        }
        self.children[parent].insert(SmolStr::new(child));
        self.parents[child].insert(SmolStr::new(parent));
        Ok(())
    }

    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![SmolStr::new(from)];
        let mut seen = BTreeSet::new();
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if seen.insert(n.clone()) {
                if let Some(kids) = self.children.get(&n) {
                    stack.extend(kids.iter().cloned());
                }
            }
        }
        false
    }

    /// Tasks whose parents (control and data) have all completed and that
    /// have not been submitted yet.
    pub fn ready_tasks(&self) -> Vec<&WorkflowTask> {
        self.tasks
            .values()
            .filter(|t| t.state == TaskState::NotReady || t.state == TaskState::Ready)
            .filter(|t| {
                self.parents[&t.name]
                    .iter()
                    .all(|p| self.tasks[p].state == TaskState::Completed)
            })
            .collect()
    }

    /// All input files that are produced by no task (workflow-level
    /// inputs that must be staged before launch).
    pub fn input_files(&self) -> Vec<&File> {
        let produced: BTreeSet<&FileId> =
            self.tasks.values().flat_map(|t| t.outputs.iter().map(File::id)).collect();
        let mut seen = BTreeSet::new();
        self.tasks
            .values()
            .flat_map(|t| t.inputs.iter())
            .filter(|f| !produced.contains(f.id()) && seen.insert(f.id().clone()))
            .collect()
    }

    pub fn mark_submitted(&mut self, name: &str) {
        if let Some(t) = self.tasks.get_mut(name) {
            t.state = TaskState::Submitted;
        }
    }

    pub fn mark_completed(&mut self, name: &str) {
        if let Some(t) = self.tasks.get_mut(name) {
            t.state = TaskState::Completed;
        }
    }

    pub fn is_done(&self) -> bool {
        self.tasks.values().all(|t| t.state == TaskState::Completed)
    }
}

/// Fixed-shape convenience job assembled from a workflow task:
/// pre-file-reads -> compute -> post-file-writes (plus optional cleanup
/// deletions). Returns the job and the name of its compute action.
pub struct StandardJob;

impl StandardJob {
    /// Build the compound job for `task`, reading inputs from and writing
    /// outputs to locations given by `locate`.
    pub fn assemble(
        task: &WorkflowTask,
        locate: impl Fn(&File) -> Option<Location>,
        cleanup: &[Location],
    ) -> Result<(JobRef, SmolStr), WorkflowError> {
        let job = CompoundJob::new(format!("job-{}", task.name));
        let compute_name = SmolStr::new(format!("{}-compute", task.name));
        {
            let mut j = job.borrow_mut();
            let compute = j.add_action(
                Action::new(
                    compute_name.clone(),
                    ActionKind::Compute { flops: task.flops, model: task.model },
                )
                .with_resources(task.min_cores, task.max_cores, task.ram),
            )?;

            for file in &task.inputs {
                let location =
                    locate(file).ok_or_else(|| WorkflowError::MissingFileLocation(file.id().clone()))?;
                let read = j.add_action(Action::new(
                    format!("{}-read-{}", task.name, file.id()),
                    ActionKind::FileRead { location, num_bytes: None },
                ))?;
                j.add_dependency(read, compute)?;
            }
            for file in &task.outputs {
                let location =
                    locate(file).ok_or_else(|| WorkflowError::MissingFileLocation(file.id().clone()))?;
                let write = j.add_action(Action::new(
                    format!("{}-write-{}", task.name, file.id()),
                    ActionKind::FileWrite { location },
                ))?;
                j.add_dependency(compute, write)?;
            }
            for location in cleanup {
                let del = j.add_action(Action::new(
                    format!("{}-delete-{}", task.name, location.file().id()),
                    ActionKind::FileDelete { location: location.clone() },
                ))?;
                // Deletions run after every write.
                let writes: Vec<usize> = (0..j.action_count() - 1)
                    .filter(|&i| matches!(j.action(i).kind(), ActionKind::FileWrite { .. }))
                    .collect();
                for w in writes {
                    j.add_dependency(w, del)?;
                }
            }
        }
        Ok((job, compute_name))
    }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
