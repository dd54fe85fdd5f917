// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The compute-service capability: one submission contract shared by
//! bare-metal, batch, cloud, and meta-scheduler services.

use gantry_core::{
    FailureCause, HostName, JobRef, MessagePayload, PayloadMap, ServiceName,
};
use gantry_kernel::{Commport, SimContext};
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputeError {
    #[error("bad service-specific argument {key:?}: {value:?}")]
    BadArgument { key: String, value: String },
    #[error(transparent)]
    Property(#[from] gantry_core::PropertyError),
    #[error(transparent)]
    Kernel(#[from] gantry_kernel::KernelError),
}

/// Service-specific arguments: the enumerated `-N`/`-c`/`-t`/`-service`
/// grammar plus per-action host bindings (`<action_name> -> host[:k]`).
#[derive(Debug, Clone, Default)]
pub struct ServiceArgs {
    values: IndexMap<SmolStr, SmolStr>,
}

impl ServiceArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut args = Self::new();
        for (k, v) in pairs {
            args.values.insert(SmolStr::new(k), SmolStr::new(v));
        }
        args
    }

    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.values.insert(SmolStr::new(key), SmolStr::new(value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(SmolStr::as_str)
    }

    /// `-N`: number of compute nodes.
    pub fn num_nodes(&self) -> Result<Option<u32>, ComputeError> {
        self.parse_u32("-N")
    }

    /// `-c`: cores per node.
    pub fn cores_per_node(&self) -> Result<Option<u32>, ComputeError> {
        self.parse_u32("-c")
    }

    /// `-t`: walltime, minutes on the wire, seconds out.
    pub fn walltime_secs(&self) -> Result<Option<f64>, ComputeError> {
        match self.get("-t") {
            None => Ok(None),
            Some(v) => v
                .parse::<f64>()
                .map(|mins| Some(mins * 60.0))
                .map_err(|_| ComputeError::BadArgument {
                    key: "-t".into(),
                    value: v.to_string(),
                }),
        }
    }

    /// `-service`: named backing service (grid universe).
    pub fn service(&self) -> Option<&str> {
        self.get("-service")
    }

    /// Grid-universe jobs carry the full `-N`/`-c`/`-t`/`-service` set.
    pub fn is_grid_universe(&self) -> bool {
        ["-N", "-c", "-t", "-service"].iter().all(|k| self.values.contains_key(*k))
    }

    /// Per-action binding `host` or `host:k`.
    pub fn binding(&self, action_name: &str) -> Result<Option<HostBinding>, ComputeError> {
        let Some(v) = self.get(action_name) else { return Ok(None) };
        let (host, cores) = match v.split_once(':') {
            None => (v, None),
            Some((h, k)) => {
                let cores = k.parse::<u32>().map_err(|_| ComputeError::BadArgument {
                    key: action_name.to_string(),
                    value: v.to_string(),
                })?;
                (h, Some(cores))
            }
        };
        Ok(Some(HostBinding { host: HostName::new(host), cores }))
    }

    fn parse_u32(&self, key: &str) -> Result<Option<u32>, ComputeError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v.parse().map(Some).map_err(|_| ComputeError::BadArgument {
                key: key.to_string(),
                value: v.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostBinding {
    pub host: HostName,
    pub cores: Option<u32>,
}

/// User behaviour attached to a custom action at submission.
pub type CustomFuture = futures_util::future::LocalBoxFuture<'static, Result<(), FailureCause>>;
pub type CustomWork = Rc<dyn Fn(ExecutorEnv) -> CustomFuture>;

/// What a custom action's closure gets to work with. The sim layer adds
/// manager-creation helpers on top via an extension trait.
#[derive(Clone)]
pub struct ExecutorEnv {
    pub ctx: SimContext,
    pub hostname: HostName,
    pub physical_hostname: HostName,
}

/// A compound job on its way to a compute service.
#[derive(Clone)]
pub struct JobSubmission {
    pub job: JobRef,
    /// Where done/failed notifications go (usually a job manager's
    /// notification port).
    pub notify: Commport,
    pub args: ServiceArgs,
    /// Custom-action closures, keyed by action name.
    pub customs: IndexMap<SmolStr, CustomWork>,
    /// Pilot jobs expose a transient child service instead of running
    /// actions.
    pub pilot: bool,
}

impl std::fmt::Debug for JobSubmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSubmission")
            .field("job", &self.job.borrow().name())
            .field("args", &self.args)
            .field("customs", &self.customs.keys().collect::<Vec<_>>())
            .field("pilot", &self.pilot)
            .finish()
    }
}

impl JobSubmission {
    pub fn new(job: JobRef, notify: Commport) -> Self {
        Self { job, notify, args: ServiceArgs::new(), customs: IndexMap::new(), pilot: false }
    }

    pub fn with_args(mut self, args: ServiceArgs) -> Self {
        self.args = args;
        self
    }
}

// --- protocol messages -------------------------------------------------

#[derive(Debug)]
pub struct JobSubmitRequest {
    pub reply_to: Commport,
    pub submission: JobSubmission,
}

#[derive(Debug)]
pub struct JobSubmitAnswer {
    pub result: Result<(), FailureCause>,
}

#[derive(Debug)]
pub struct JobTerminateRequest {
    pub reply_to: Commport,
    pub job: JobRef,
}

#[derive(Debug)]
pub struct JobTerminateAnswer {
    pub result: Result<(), FailureCause>,
}

/// Notification to the submitter: terminal job state reached.
#[derive(Debug)]
pub struct JobDoneNotification {
    pub job: JobRef,
    pub service: ServiceName,
}

#[derive(Debug)]
pub struct JobFailedNotification {
    pub job: JobRef,
    pub service: ServiceName,
    pub cause: FailureCause,
}

/// Pilot reservation came up; `child` takes submissions for the window.
#[derive(Debug)]
pub struct PilotStartedNotification {
    pub job: JobRef,
    pub child: Rc<crate::bare_metal::BareMetalComputeService>,
}

#[derive(Debug)]
pub struct PilotExpiredNotification {
    pub job: JobRef,
}

#[derive(Debug)]
pub struct ResourceInfoRequest {
    pub reply_to: Commport,
}

#[derive(Debug, Clone)]
pub struct ResourceInfoAnswer {
    /// `(host, idle cores, free ram)` per execution host.
    pub hosts: Vec<(HostName, u32, u64)>,
}

/// Everything a client needs to submit to a compute service.
#[derive(Debug, Clone)]
pub struct ComputeEndpoint {
    pub name: ServiceName,
    pub port: Commport,
    pub payloads: PayloadMap,
}

/// Submit a job and wait for the service's accept/reject answer.
pub async fn submit_job(
    ctx: &SimContext,
    ep: &ComputeEndpoint,
    submission: JobSubmission,
) -> Result<(), FailureCause> {
    let reply_to = ctx.create_commport("submit").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        JobSubmitRequest { reply_to: reply_to.clone(), submission },
        ep.payloads.get(MessagePayload::JobSubmitRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer = ctx.expect::<JobSubmitAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    answer.result
}

/// Ask the service to kill a job it holds.
pub async fn terminate_job(
    ctx: &SimContext,
    ep: &ComputeEndpoint,
    job: &JobRef,
) -> Result<(), FailureCause> {
    let reply_to = ctx.create_commport("terminate").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        JobTerminateRequest { reply_to: reply_to.clone(), job: job.clone() },
        ep.payloads.get(MessagePayload::JobKillRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer =
        ctx.expect::<JobTerminateAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    answer.result
}

/// Snapshot of idle resources.
pub async fn resource_info(
    ctx: &SimContext,
    ep: &ComputeEndpoint,
) -> Result<ResourceInfoAnswer, FailureCause> {
    let reply_to = ctx.create_commport("resources").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        ResourceInfoRequest { reply_to: reply_to.clone() },
        ep.payloads.get(MessagePayload::ResourceInfoRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    ctx.expect::<ResourceInfoAnswer>(&reply_to).await.map_err(FailureCause::from)
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
