// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actions: the atomic units of simulated work inside a compound job.

use crate::failure::FailureCause;
use crate::file::File;
use crate::location::{HostName, Location, ServiceName};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// State of an action attempt.
///
/// ```text
/// NotReady --(parents done)--> Ready --(dispatched)--> Started
///                                                        |
///                                  +---- Completed ------+
///                                  +---- Failed ---------+
///                                  +---- Killed ---------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    NotReady,
    Ready,
    Started,
    Completed,
    Failed,
    Killed,
}

impl ActionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionState::Completed | ActionState::Failed | ActionState::Killed)
    }

    /// All states, in transition order. Used to iterate per-state sets.
    pub const ALL: [ActionState; 6] = [
        ActionState::NotReady,
        ActionState::Ready,
        ActionState::Started,
        ActionState::Completed,
        ActionState::Failed,
        ActionState::Killed,
    ];
}

crate::simple_display! {
    ActionState {
        NotReady => "not_ready",
        Ready => "ready",
        Started => "started",
        Completed => "completed",
        Failed => "failed",
        Killed => "killed",
    }
}

/// How a multi-core computation scales with its core allocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelModel {
    /// Amdahl's law: `alpha` is the parallelisable fraction of the work.
    Amdahl { alpha: f64 },
    /// Fixed efficiency: every core contributes `efficiency` of its speed.
    ConstantEfficiency { efficiency: f64 },
}

impl ParallelModel {
    pub const SEQUENTIAL: ParallelModel = ParallelModel::Amdahl { alpha: 0.0 };
    pub const PERFECT: ParallelModel = ParallelModel::ConstantEfficiency { efficiency: 1.0 };

    /// Wall-clock seconds to run `flops` on `cores` cores of `core_speed`
    /// flop/s each.
    pub fn duration(&self, flops: f64, cores: u32, core_speed: f64) -> f64 {
        let cores = f64::from(cores.max(1));
        match *self {
            ParallelModel::Amdahl { alpha } => {
                let sequential = (1.0 - alpha) * flops;
                let parallel = alpha * flops / cores;
                (sequential + parallel) / core_speed
            }
            ParallelModel::ConstantEfficiency { efficiency } => {
                flops / (cores * efficiency * core_speed)
            }
        }
    }
}

/// The closed sum of action kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    Sleep {
        duration: f64,
    },
    Compute {
        flops: f64,
        model: ParallelModel,
    },
    FileRead {
        location: Location,
        /// Bytes to read; `None` reads the whole file.
        num_bytes: Option<u64>,
    },
    FileWrite {
        location: Location,
    },
    FileCopy {
        src: Location,
        dst: Location,
    },
    FileDelete {
        location: Location,
    },
    RegistryAdd {
        registry: ServiceName,
        location: Location,
    },
    RegistryDelete {
        registry: ServiceName,
        location: Location,
    },
    /// User-supplied behaviour; the closure is attached at submission and
    /// looked up by action name (the core model stays data-only).
    Custom,
}

crate::simple_display! {
    ActionKind {
        Sleep { .. } => "sleep",
        Compute { .. } => "compute",
        FileRead { .. } => "file_read",
        FileWrite { .. } => "file_write",
        FileCopy { .. } => "file_copy",
        FileDelete { .. } => "file_delete",
        RegistryAdd { .. } => "registry_add",
        RegistryDelete { .. } => "registry_delete",
        Custom => "custom",
    }
}

impl ActionKind {
    /// The file this action moves, if any (used for scratch cleanup and
    /// registry bookkeeping).
    pub fn file(&self) -> Option<&File> {
        match self {
            ActionKind::FileRead { location, .. }
            | ActionKind::FileWrite { location }
            | ActionKind::FileDelete { location }
            | ActionKind::RegistryAdd { location, .. }
            | ActionKind::RegistryDelete { location, .. } => Some(location.file()),
            ActionKind::FileCopy { dst, .. } => Some(dst.file()),
            _ => None,
        }
    }
}

/// One execution attempt of an action.
///
/// Dates are simulated seconds; `None` until the corresponding transition
/// happens. A restart pushes a fresh frame, so terminal fields are written
/// exactly once per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFrame {
    pub state: ActionState,
    pub submit_date: Option<f64>,
    pub start_date: Option<f64>,
    pub end_date: Option<f64>,
    pub host: Option<HostName>,
    /// Physical host when executing inside a VM.
    pub physical_host: Option<HostName>,
    pub num_cores: u32,
    pub ram: u64,
    pub failure: Option<FailureCause>,
}

impl ExecutionFrame {
    fn new(state: ActionState) -> Self {
        Self {
            state,
            submit_date: None,
            start_date: None,
            end_date: None,
            host: None,
            physical_host: None,
            num_cores: 0,
            ram: 0,
            failure: None,
        }
    }
}

/// An action. Owned by its compound job; referenced elsewhere by
/// [`ActionHandle`](crate::job::ActionHandle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    name: SmolStr,
    kind: ActionKind,
    min_cores: u32,
    max_cores: u32,
    ram: u64,
    /// Seconds charged once when the executor starts.
    thread_overhead: f64,
    /// Attempt stack; the last frame is the current attempt.
    history: Vec<ExecutionFrame>,
}

impl Action {
    pub fn new(name: impl Into<SmolStr>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            min_cores: 1,
            max_cores: 1,
            ram: 0,
            thread_overhead: 0.0,
            history: vec![ExecutionFrame::new(ActionState::NotReady)],
        }
    }

    pub fn with_resources(mut self, min_cores: u32, max_cores: u32, ram: u64) -> Self {
        self.min_cores = min_cores.max(1);
        self.max_cores = max_cores.max(self.min_cores);
        self.ram = ram;
        self
    }

    pub fn with_thread_overhead(mut self, seconds: f64) -> Self {
        self.thread_overhead = seconds;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub fn min_cores(&self) -> u32 {
        self.min_cores
    }

    pub fn max_cores(&self) -> u32 {
        self.max_cores
    }

    pub fn ram(&self) -> u64 {
        self.ram
    }

    pub fn thread_overhead(&self) -> f64 {
        self.thread_overhead
    }

    pub fn state(&self) -> ActionState {
        self.frame().state
    }

    pub fn frame(&self) -> &ExecutionFrame {
        // Invariant: history is never empty (seeded at construction).
        match self.history.last() {
            Some(f) => f,
            None => unreachable!("action history is never empty"),
        }
    }

    pub fn frame_mut(&mut self) -> &mut ExecutionFrame {
        match self.history.last_mut() {
            Some(f) => f,
            None => unreachable!("action history is never empty"),
        }
    }

    pub fn history(&self) -> &[ExecutionFrame] {
        &self.history
    }

    pub fn start_date(&self) -> Option<f64> {
        self.frame().start_date
    }

    pub fn end_date(&self) -> Option<f64> {
        self.frame().end_date
    }

    pub fn failure(&self) -> Option<&FailureCause> {
        self.frame().failure.as_ref()
    }

    /// Push a new attempt frame whose initial state inherits the final
    /// state of the previous attempt.
    pub fn push_attempt(&mut self) {
        let inherited = self.state();
        self.history.push(ExecutionFrame::new(inherited));
    }

    /// Move the current attempt to `state`, stamping dates.
    ///
    /// Terminal states are written exactly once per frame: transitioning
    /// out of (or re-entering) a terminal state is a
    /// [`FailureCause::Fatal`] invariant violation.
    pub(crate) fn transition(&mut self, state: ActionState, now: f64) -> Result<(), FailureCause> {
        let frame = self.frame_mut();
        if frame.state.is_terminal() {
            return Err(FailureCause::fatal(format!(
                "action already terminal ({} -> {state})",
                frame.state
            )));
        }
        match state {
            ActionState::Started => frame.start_date = Some(now),
            s if s.is_terminal() => frame.end_date = Some(now),
            _ => {}
        }
        frame.state = state;
        Ok(())
    }
}

#[cfg(test)]
#[path = "action_tests.rs"]
mod tests;
