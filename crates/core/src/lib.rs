// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gantry-core: data model for the Gantry workload simulator

pub mod macros;

pub mod action;
pub mod batch;
pub mod event;
pub mod failure;
pub mod file;
pub mod job;
pub mod location;
pub mod property;
pub mod units;
pub mod workflow;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use action::{Action, ActionKind, ActionState, ExecutionFrame, ParallelModel};
pub use batch::{BatchJob, BatchJobId, Reservation};
pub use event::ExecutionEvent;
pub use failure::FailureCause;
pub use file::{File, FileId};
pub use job::{ActionHandle, CompoundJob, JobError, JobId, JobRef, JobState};
pub use location::{canonical_path, path_is_prefix, HostName, Location, ServiceName};
pub use property::{
    MessagePayload, PayloadMap, PropertyError, PropertyMap, ServiceProperty,
};
pub use units::{parse_bandwidth, parse_bytes, parse_duration_secs, parse_flops, UnitError};
pub use workflow::{StandardJob, TaskState, Workflow, WorkflowError, WorkflowTask};
