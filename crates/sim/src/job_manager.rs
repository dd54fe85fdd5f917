// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job manager: the controller-facing façade that builds and
//! submits compound jobs and relays service notifications back to the
//! controller as execution events.

use crate::registry::{ComputeRef, RegistryRef};
use gantry_compute::service::{
    JobDoneNotification, JobFailedNotification, PilotExpiredNotification,
    PilotStartedNotification,
};
use gantry_compute::{CustomWork, JobSubmission, ServiceArgs};
use gantry_core::{
    Action, ActionHandle, ActionKind, CompoundJob, ExecutionEvent, FailureCause, File, JobError,
    JobId, JobRef, Location, ParallelModel, ServiceName,
};
use gantry_kernel::{ActorId, Commport, KernelError, SimContext};
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::cell::RefCell;
use std::rc::Rc;

/// Owned by a controller; one per `create_job_manager` call.
pub struct JobManager {
    ctx: SimContext,
    /// Where services send terminal notifications.
    notify_port: Commport,
    relay: ActorId,
    registry: RegistryRef,
    customs: RefCell<IndexMap<(JobId, SmolStr), CustomWork>>,
}

impl JobManager {
    pub(crate) fn new(
        ctx: &SimContext,
        event_port: &Commport,
        registry: RegistryRef,
    ) -> Result<Rc<Self>, KernelError> {
        let notify_port = ctx.create_commport("job-manager")?;
        let relay_registry = registry.clone();
        let relay_notify = notify_port.clone();
        let relay_events = event_port.clone();
        let relay = ctx.spawn_daemon("job-manager-relay", ctx.host(), move |rctx| async move {
            relay_loop(rctx, relay_notify, relay_events, relay_registry).await
        })?;
        Ok(Rc::new(Self {
            ctx: ctx.clone(),
            notify_port,
            relay,
            registry,
            customs: RefCell::new(IndexMap::new()),
        }))
    }

    /// Fresh compound job; an empty name auto-generates one.
    pub fn create_compound_job(&self, name: &str) -> JobRef {
        CompoundJob::new(name)
    }

    pub fn add_sleep_action(
        &self,
        job: &JobRef,
        name: &str,
        duration: f64,
    ) -> Result<ActionHandle, JobError> {
        self.add(job, Action::new(name, ActionKind::Sleep { duration }))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_compute_action(
        &self,
        job: &JobRef,
        name: &str,
        flops: f64,
        ram: u64,
        min_cores: u32,
        max_cores: u32,
        model: ParallelModel,
    ) -> Result<ActionHandle, JobError> {
        self.add(
            job,
            Action::new(name, ActionKind::Compute { flops, model })
                .with_resources(min_cores, max_cores, ram),
        )
    }

    pub fn add_file_read_action(
        &self,
        job: &JobRef,
        name: &str,
        location: Location,
    ) -> Result<ActionHandle, JobError> {
        self.add(job, Action::new(name, ActionKind::FileRead { location, num_bytes: None }))
    }

    pub fn add_file_write_action(
        &self,
        job: &JobRef,
        name: &str,
        location: Location,
    ) -> Result<ActionHandle, JobError> {
        self.add(job, Action::new(name, ActionKind::FileWrite { location }))
    }

    pub fn add_file_copy_action(
        &self,
        job: &JobRef,
        name: &str,
        src: Location,
        dst: Location,
    ) -> Result<ActionHandle, JobError> {
        self.add(job, Action::new(name, ActionKind::FileCopy { src, dst }))
    }

    pub fn add_file_delete_action(
        &self,
        job: &JobRef,
        name: &str,
        location: Location,
    ) -> Result<ActionHandle, JobError> {
        self.add(job, Action::new(name, ActionKind::FileDelete { location }))
    }

    pub fn add_registry_add_action(
        &self,
        job: &JobRef,
        name: &str,
        registry: ServiceName,
        location: Location,
    ) -> Result<ActionHandle, JobError> {
        self.add(job, Action::new(name, ActionKind::RegistryAdd { registry, location }))
    }

    pub fn add_registry_delete_action(
        &self,
        job: &JobRef,
        name: &str,
        registry: ServiceName,
        location: Location,
    ) -> Result<ActionHandle, JobError> {
        self.add(job, Action::new(name, ActionKind::RegistryDelete { registry, location }))
    }

    /// Custom action: `work` runs inside the executor's cooperative
    /// slot with an [`gantry_compute::ExecutorEnv`].
    pub fn add_custom_action(
        &self,
        job: &JobRef,
        name: &str,
        work: CustomWork,
    ) -> Result<ActionHandle, JobError> {
        let handle = self.add(job, Action::new(name, ActionKind::Custom))?;
        let key = (job.borrow().id().clone(), SmolStr::new(handle.name()));
        self.customs.borrow_mut().insert(key, work);
        Ok(handle)
    }

    fn add(&self, job: &JobRef, action: Action) -> Result<ActionHandle, JobError> {
        let index = job.borrow_mut().add_action(action)?;
        Ok(ActionHandle::new(job, index))
    }

    pub fn add_action_dependency(
        &self,
        job: &JobRef,
        parent: &ActionHandle,
        child: &ActionHandle,
    ) -> Result<(), JobError> {
        job.borrow_mut().add_dependency(parent.index(), child.index())
    }

    /// Submit to a named compute service with service-specific args.
    pub async fn submit_job(
        &self,
        job: &JobRef,
        service: &ServiceName,
        args: ServiceArgs,
    ) -> Result<(), FailureCause> {
        self.submit_inner(job, service, args, false).await
    }

    /// Submit a pilot: a resource reservation exposing a transient
    /// child service (batch only).
    pub async fn submit_pilot_job(
        &self,
        job: &JobRef,
        service: &ServiceName,
        args: ServiceArgs,
    ) -> Result<(), FailureCause> {
        self.submit_inner(job, service, args, true).await
    }

    async fn submit_inner(
        &self,
        job: &JobRef,
        service: &ServiceName,
        args: ServiceArgs,
        pilot: bool,
    ) -> Result<(), FailureCause> {
        let target = self
            .registry
            .compute(service)
            .ok_or_else(|| FailureCause::ServiceDown { service: service.clone() })?;
        if !target.is_up() {
            return Err(FailureCause::ServiceDown { service: service.clone() });
        }
        let job_id = job.borrow().id().clone();
        let customs: IndexMap<SmolStr, CustomWork> = self
            .customs
            .borrow()
            .iter()
            .filter(|((jid, _), _)| jid == &job_id)
            .map(|((_, name), work)| (name.clone(), work.clone()))
            .collect();
        let submission = JobSubmission {
            job: job.clone(),
            notify: self.notify_port.clone(),
            args,
            customs,
            pilot,
        };
        gantry_compute::submit_job(&self.ctx, &target.endpoint(), submission).await
    }

    /// Kill a job at the service currently holding it.
    pub async fn terminate_job(
        &self,
        job: &JobRef,
        service: &ServiceName,
    ) -> Result<(), FailureCause> {
        let target = self
            .registry
            .compute(service)
            .ok_or_else(|| FailureCause::ServiceDown { service: service.clone() })?;
        gantry_compute::terminate_job(&self.ctx, &target.endpoint(), job).await
    }

    pub fn stop(&self) {
        self.ctx.kill(self.relay);
    }
}

/// Translate service notifications into controller events, in arrival
/// order.
async fn relay_loop(
    ctx: SimContext,
    notify: Commport,
    events: Commport,
    registry: RegistryRef,
) -> Result<(), KernelError> {
    loop {
        let msg = ctx.get(&notify).await?;
        let msg = match msg.downcast::<JobDoneNotification>() {
            Ok(done) => {
                ctx.dput(
                    &events,
                    ExecutionEvent::CompoundJobCompleted { job: done.job, service: done.service },
                    0,
                )?;
                continue;
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<JobFailedNotification>() {
            Ok(failed) => {
                ctx.dput(
                    &events,
                    ExecutionEvent::CompoundJobFailed {
                        job: failed.job,
                        service: failed.service,
                        cause: failed.cause,
                    },
                    0,
                )?;
                continue;
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<PilotStartedNotification>() {
            Ok(started) => {
                // Make the transient child resolvable by name before the
                // controller hears about it.
                let child_service = started.child.name().clone();
                registry.register_compute(ComputeRef::BareMetal(started.child));
                ctx.dput(
                    &events,
                    ExecutionEvent::PilotJobStarted { job: started.job, child_service },
                    0,
                )?;
                continue;
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<PilotExpiredNotification>() {
            Ok(expired) => {
                ctx.dput(&events, ExecutionEvent::PilotJobExpired { job: expired.job }, 0)?;
                continue;
            }
            Err(m) => m,
        };
        tracing::warn!(got = msg.type_name(), "job manager relay: unexpected message");
    }
}

/// One-line description of the manager for logs.
impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager").field("notify", &self.notify_port.name()).finish()
    }
}

// The controller-side File helper lives here so job construction reads
// naturally: `jm.add_file_read_action(&job, "in", locate(&file))`.
pub fn whole_file(file: &File, service: &ServiceName) -> Location {
    Location::at_root(service.clone(), file.clone())
}
