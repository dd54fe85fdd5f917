// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel-level errors and their mapping onto simulation failure causes.

use crate::platform::PlatformError;
use gantry_core::FailureCause;
use smol_str::SmolStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("commport name pool exhausted ({0} ports)")]
    PortPoolExhausted(usize),
    #[error("receive on {port} timed out after {timeout} s")]
    Timeout { port: SmolStr, timeout: f64 },
    #[error("unexpected message on {port}: got {got}")]
    UnexpectedMessage { port: SmolStr, got: &'static str },
    #[error("actor was killed")]
    Killed,
    #[error("deadlock: {live} live actors but no future event")]
    Deadlock { live: usize },
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Failure(#[from] FailureCause),
}

impl From<KernelError> for FailureCause {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::Timeout { port, timeout } => {
                FailureCause::NetworkTimeout { port: port.to_string(), timeout }
            }
            KernelError::Killed => FailureCause::JobKilled,
            KernelError::Platform(PlatformError::HostDown(h)) => {
                FailureCause::NetworkError { peer: h.to_string(), detail: "host is down".into() }
            }
            KernelError::Platform(PlatformError::NoRoute { from, to }) => {
                FailureCause::NetworkError {
                    peer: to.to_string(),
                    detail: format!("no route from {from}"),
                }
            }
            KernelError::Failure(cause) => cause,
            other => FailureCause::fatal(other.to_string()),
        }
    }
}
