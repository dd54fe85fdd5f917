// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution events delivered to controllers.
//!
//! Events carry live job handles (`Rc`) and are therefore not serialisable;
//! the JSON trace records in `gantry-sim` are the serialisable view.

use crate::failure::FailureCause;
use crate::file::File;
use crate::job::JobRef;
use crate::location::{Location, ServiceName};

/// Events a controller can receive from `wait_for_next_event`.
///
/// Ordering: events for a given job arrive in state-transition order;
/// events across jobs may interleave.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    CompoundJobCompleted {
        job: JobRef,
        service: ServiceName,
    },
    CompoundJobFailed {
        job: JobRef,
        service: ServiceName,
        cause: FailureCause,
    },
    /// A batch pilot reservation came up; jobs can now be submitted to the
    /// transient child service.
    PilotJobStarted {
        job: JobRef,
        child_service: ServiceName,
    },
    /// The pilot's walltime window closed.
    PilotJobExpired {
        job: JobRef,
    },
    Timer {
        message: String,
        date: f64,
    },
    FileCopyCompleted {
        file: File,
        src: Location,
        dst: Location,
    },
    FileCopyFailed {
        file: File,
        src: Location,
        dst: Location,
        cause: FailureCause,
    },
}

impl ExecutionEvent {
    /// Compact one-line description for logs.
    pub fn log_summary(&self) -> String {
        match self {
            ExecutionEvent::CompoundJobCompleted { job, service } => {
                format!("job {} completed on {}", job.borrow().name(), service)
            }
            ExecutionEvent::CompoundJobFailed { job, service, cause } => {
                format!("job {} failed on {}: {}", job.borrow().name(), service, cause.code())
            }
            ExecutionEvent::PilotJobStarted { job, child_service } => {
                format!("pilot {} started child {}", job.borrow().name(), child_service)
            }
            ExecutionEvent::PilotJobExpired { job } => {
                format!("pilot {} expired", job.borrow().name())
            }
            ExecutionEvent::Timer { message, date } => {
                format!("timer {message:?} at {date}")
            }
            ExecutionEvent::FileCopyCompleted { file, dst, .. } => {
                format!("copy of {} to {} completed", file.id(), dst)
            }
            ExecutionEvent::FileCopyFailed { file, dst, cause, .. } => {
                format!("copy of {} to {} failed: {}", file.id(), dst, cause.code())
            }
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
