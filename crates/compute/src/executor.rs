// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The action executor: the smallest actor. Owns one action and a
//! `(cores, ram)` reservation on its host, runs the kind-specific work,
//! writes the terminal state exactly once, and reports back.

use crate::service::{CustomWork, ExecutorEnv};
use gantry_core::{
    ActionKind, ActionState, FailureCause, HostName, JobRef, Location, ServiceName,
};
use gantry_kernel::{ActorId, Commport, KernelError, SimContext};
use gantry_storage::registry::{self, RegistryEndpoint};
use gantry_storage::{client, StorageEndpoint};
use std::rc::Rc;

/// Resolves a storage service name to an endpoint (wired up by the
/// simulation layer; tests pass a map-backed closure).
pub type StorageResolver = Rc<dyn Fn(&ServiceName) -> Option<StorageEndpoint>>;
pub type RegistryResolver = Rc<dyn Fn(&ServiceName) -> Option<RegistryEndpoint>>;

/// Everything an executor needs to run one action.
#[derive(Clone)]
pub struct ExecutorSpec {
    /// Name of the owning compute service (error attribution).
    pub service: ServiceName,
    pub job: JobRef,
    pub action_index: usize,
    /// Host the action is billed to (a VM name inside a cloud service).
    pub host: HostName,
    /// Host the executor actually runs on.
    pub physical_host: HostName,
    pub cores: u32,
    pub ram: u64,
    pub custom: Option<CustomWork>,
    pub storage: StorageResolver,
    pub registries: RegistryResolver,
    /// Scratch endpoint and per-job directory, when the owning service
    /// has scratch space.
    pub scratch: Option<(StorageEndpoint, String)>,
    /// The owning service's port; receives [`ActionExecutorDone`].
    pub notify: Commport,
}

/// Completion report to the owning service (success or failure alike;
/// the terminal state is already written on the action).
#[derive(Debug)]
pub struct ActionExecutorDone {
    pub job: JobRef,
    pub action_index: usize,
}

/// Spawn the executor on its physical host.
pub fn spawn_executor(ctx: &SimContext, spec: ExecutorSpec) -> Result<ActorId, KernelError> {
    let name = {
        let job = spec.job.borrow();
        format!("exec-{}-{}", job.name(), job.action(spec.action_index).name())
    };
    let host = spec.physical_host.clone();
    ctx.spawn(&name, &host, move |cctx| async move { run(cctx, spec).await })
}

async fn run(ctx: SimContext, spec: ExecutorSpec) -> Result<(), KernelError> {
    let overhead = {
        let job = spec.job.borrow();
        job.action(spec.action_index).thread_overhead()
    };
    if overhead > 0.0 {
        ctx.sleep(overhead).await?;
    }
    {
        let mut job = spec.job.borrow_mut();
        let now = ctx.now();
        job.transition(spec.action_index, ActionState::Started, now)?;
        let frame = job.action_frame_mut(spec.action_index);
        frame.host = Some(spec.host.clone());
        frame.physical_host = Some(spec.physical_host.clone());
        frame.num_cores = spec.cores;
        frame.ram = spec.ram;
    }

    let kind = spec.job.borrow().action(spec.action_index).kind().clone();
    let outcome = perform(&ctx, &spec, kind).await;

    {
        let mut job = spec.job.borrow_mut();
        let now = ctx.now();
        match outcome {
            Ok(()) => {
                job.transition(spec.action_index, ActionState::Completed, now)?;
            }
            Err(cause) => {
                tracing::debug!(
                    job = %job.name(),
                    action = %job.action(spec.action_index).name(),
                    cause = cause.code(),
                    "action failed"
                );
                job.action_frame_mut(spec.action_index).failure = Some(cause);
                job.transition(spec.action_index, ActionState::Failed, now)?;
            }
        }
    }
    ctx.dput(
        &spec.notify,
        ActionExecutorDone { job: spec.job.clone(), action_index: spec.action_index },
        0,
    )?;
    Ok(())
}

async fn perform(
    ctx: &SimContext,
    spec: &ExecutorSpec,
    kind: ActionKind,
) -> Result<(), FailureCause> {
    match kind {
        ActionKind::Sleep { duration } => ctx.sleep(duration).await.map_err(host_failure(spec)),
        ActionKind::Compute { flops, model } => {
            let speed = ctx
                .kernel()
                .platform(|p| p.core_speed(&spec.physical_host))
                .map_err(|e| FailureCause::from(KernelError::from(e)))?;
            let duration = model.duration(flops, spec.cores, speed);
            ctx.sleep(duration).await.map_err(host_failure(spec))
        }
        ActionKind::FileRead { location, num_bytes } => {
            let (ep, loc) = resolve(spec, &location)?;
            client::read_file(ctx, &ep, &loc, num_bytes).await.map(|_| ())
        }
        ActionKind::FileWrite { location } => {
            let (ep, loc) = resolve(spec, &location)?;
            client::write_file(ctx, &ep, &loc).await
        }
        ActionKind::FileCopy { src, dst } => {
            let (src_ep, src_loc) = resolve(spec, &src)?;
            let (dst_ep, dst_loc) = resolve(spec, &dst)?;
            client::copy_file(ctx, &dst_ep, &src_ep, &src_loc, &dst_loc).await
        }
        ActionKind::FileDelete { location } => {
            let (ep, loc) = resolve(spec, &location)?;
            client::delete(ctx, &ep, &loc).await
        }
        ActionKind::RegistryAdd { registry: reg, location } => {
            let ep = (spec.registries)(&reg)
                .ok_or_else(|| FailureCause::ServiceDown { service: reg.clone() })?;
            let (_, loc) = resolve(spec, &location)?;
            registry::add_entry(ctx, &ep, &loc).await
        }
        ActionKind::RegistryDelete { registry: reg, location } => {
            let ep = (spec.registries)(&reg)
                .ok_or_else(|| FailureCause::ServiceDown { service: reg.clone() })?;
            let (_, loc) = resolve(spec, &location)?;
            registry::remove_entry(ctx, &ep, &loc).await.map(|_| ())
        }
        ActionKind::Custom => {
            let Some(work) = spec.custom.clone() else {
                return Err(FailureCause::fatal("custom action without attached work"));
            };
            let env = ExecutorEnv {
                ctx: ctx.clone(),
                hostname: spec.host.clone(),
                physical_hostname: spec.physical_host.clone(),
            };
            work(env).await
        }
    }
}

/// Map the location onto a concrete storage endpoint, resolving the
/// scratch sentinel against the owning service's scratch space.
fn resolve(
    spec: &ExecutorSpec,
    location: &Location,
) -> Result<(StorageEndpoint, Location), FailureCause> {
    match location {
        Location::Scratch { file } => {
            let Some((ep, dir)) = &spec.scratch else {
                return Err(FailureCause::NoScratchSpace { service: spec.service.clone() });
            };
            let loc = Location::new(ep.name.clone(), "/", dir, file.clone());
            Ok((ep.clone(), loc))
        }
        Location::Storage { service, .. } => {
            let ep = (spec.storage)(service)
                .ok_or_else(|| FailureCause::ServiceDown { service: service.clone() })?;
            Ok((ep, location.clone()))
        }
    }
}

fn host_failure(spec: &ExecutorSpec) -> impl Fn(KernelError) -> FailureCause {
    let host = spec.physical_host.clone();
    move |e| match e {
        KernelError::Platform(gantry_kernel::PlatformError::HostDown(_)) => {
            FailureCause::ComputeThreadHasDied { host: host.clone() }
        }
        other => other.into(),
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
