// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure causes attached to actions, jobs, and events.
//!
//! Every fallible simulation API reports a typed cause rather than an
//! untyped error string. Recoverable causes stay inside the service that
//! saw them; terminal causes travel on the failed action/job and surface
//! to the controller in `*Failed` events. [`FailureCause::Fatal`] is the
//! only unrecoverable form and aborts the run.

use crate::file::FileId;
use crate::location::{HostName, ServiceName};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// Internal invariant violation. Aborts the simulation.
    #[error("fatal: {detail}")]
    Fatal { detail: String },

    #[error("no storage service holds a copy of file {file}")]
    NoStorageServiceForFile { file: FileId },

    #[error("service {service} has no scratch space")]
    NoScratchSpace { service: ServiceName },

    #[error("file {file} not found at {location}")]
    FileNotFound { file: FileId, location: String },

    #[error("file {file} is already stored at {location}")]
    FileAlreadyThere { file: FileId, location: String },

    #[error("file {file} is already being written at {location}")]
    FileAlreadyBeingCopied { file: FileId, location: String },

    #[error("not enough space on {service}: need {needed} B, have {available} B")]
    StorageNotEnoughSpace { service: ServiceName, needed: u64, available: u64 },

    #[error("service {service} is down")]
    ServiceDown { service: ServiceName },

    #[error("service {service} does not support this job type: {reason}")]
    JobTypeNotSupported { service: ServiceName, reason: String },

    #[error("request can never be satisfied by {service}: {reason}")]
    NotEnoughComputeResources { service: ServiceName, reason: String },

    #[error("network error talking to {peer}: {detail}")]
    NetworkError { peer: String, detail: String },

    #[error("network timeout after {timeout} s on {port}")]
    NetworkTimeout { port: String, timeout: f64 },

    #[error("job was killed")]
    JobKilled,

    #[error("job exceeded its requested walltime of {walltime} s")]
    JobTimeout { walltime: f64 },

    #[error("job cannot be terminated in its current state: {state}")]
    JobCannotBeTerminated { state: String },

    #[error("job cannot be forgotten in its current state: {state}")]
    JobCannotBeForgotten { state: String },

    #[error("functionality not available: {feature}")]
    FunctionalityNotAvailable { feature: String },

    #[error("host {host} failed while computing")]
    ComputeThreadHasDied { host: HostName },
}

impl FailureCause {
    pub fn fatal(detail: impl Into<String>) -> Self {
        FailureCause::Fatal { detail: detail.into() }
    }

    /// True for the single unrecoverable kind.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureCause::Fatal { .. })
    }

    /// Stable tag for logs and trace records.
    pub fn code(&self) -> &'static str {
        match self {
            FailureCause::Fatal { .. } => "FATAL_FAILURE",
            FailureCause::NoStorageServiceForFile { .. } => "NO_STORAGE_SERVICE_FOR_FILE",
            FailureCause::NoScratchSpace { .. } => "NO_SCRATCH_SPACE",
            FailureCause::FileNotFound { .. } => "FILE_NOT_FOUND",
            FailureCause::FileAlreadyThere { .. } => "FILE_ALREADY_THERE",
            FailureCause::FileAlreadyBeingCopied { .. } => "FILE_ALREADY_BEING_COPIED",
            FailureCause::StorageNotEnoughSpace { .. } => "STORAGE_NOT_ENOUGH_SPACE",
            FailureCause::ServiceDown { .. } => "SERVICE_DOWN",
            FailureCause::JobTypeNotSupported { .. } => "JOB_TYPE_NOT_SUPPORTED",
            FailureCause::NotEnoughComputeResources { .. } => "NOT_ENOUGH_COMPUTE_RESOURCES",
            FailureCause::NetworkError { .. } => "NETWORK_ERROR",
            FailureCause::NetworkTimeout { .. } => "NETWORK_TIMEOUT",
            FailureCause::JobKilled => "JOB_KILLED",
            FailureCause::JobTimeout { .. } => "JOB_TIMEOUT",
            FailureCause::JobCannotBeTerminated { .. } => "JOB_CANNOT_BE_TERMINATED",
            FailureCause::JobCannotBeForgotten { .. } => "JOB_CANNOT_BE_FORGOTTEN",
            FailureCause::FunctionalityNotAvailable { .. } => "FUNCTIONALITY_NOT_AVAILABLE",
            FailureCause::ComputeThreadHasDied { .. } => "COMPUTE_THREAD_HAS_DIED",
        }
    }
}

#[cfg(test)]
#[path = "failure_tests.rs"]
mod tests;
