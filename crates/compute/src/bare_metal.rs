// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The bare-metal compute service: host/core/RAM bookkeeping over a set
//! of execution hosts, greedy first-fit dispatch of ready actions to
//! executors, per-action host bindings, and optional scratch space.

use crate::executor::{
    spawn_executor, ActionExecutorDone, ExecutorSpec, RegistryResolver, StorageResolver,
};
use crate::service::*;
use gantry_core::{
    ActionState, FailureCause, HostName, JobId, JobRef, JobState, MessagePayload, PayloadMap,
    ServiceName,
};
use gantry_kernel::{ActorId, Alarm, Commport, Kernel, KernelError, SimContext};
use gantry_storage::{SimpleStorageService, StorageEndpoint};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

/// One execution host's share visible to this service (the whole host,
/// or a VM's slice of it).
#[derive(Debug, Clone)]
pub struct BmHost {
    pub name: HostName,
    pub cores: u32,
    pub ram: u64,
}

struct HostSlot {
    total_cores: u32,
    idle_cores: u32,
    total_ram: u64,
    free_ram: u64,
}

struct ExecRecord {
    actor: ActorId,
    host: HostName,
    cores: u32,
    ram: u64,
}

struct RunningJob {
    submission: JobSubmission,
    executors: IndexMap<usize, ExecRecord>,
}

struct BmState {
    hosts: IndexMap<HostName, HostSlot>,
    jobs: IndexMap<JobId, RunningJob>,
}

/// Internal tick scheduled after pre/post job overheads.
#[derive(Debug)]
struct DispatchTick {
    job: JobId,
}

#[derive(Debug)]
struct NotifyTick {
    job: JobId,
}

pub struct BareMetalComputeService {
    name: ServiceName,
    home_host: HostName,
    /// Cosmetic execution-host label (the VM name for a cloud-managed
    /// inner service); actions are billed to it.
    host_label: Option<HostName>,
    port: Commport,
    payloads: PayloadMap,
    kernel: Kernel,
    state: Rc<RefCell<BmState>>,
    storage: StorageResolver,
    registries: RegistryResolver,
    scratch: Option<Rc<SimpleStorageService>>,
    actor: RefCell<Option<ActorId>>,
}

impl std::fmt::Debug for BareMetalComputeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BareMetalComputeService")
            .field("name", &self.name)
            .field("home_host", &self.home_host)
            .field("host_label", &self.host_label)
            .finish_non_exhaustive()
    }
}

impl BareMetalComputeService {
    /// Service over whole hosts, using each host's full cores and RAM.
    pub fn new(
        kernel: &Kernel,
        name: &str,
        home_host: &str,
        exec_hosts: &[&str],
        storage: StorageResolver,
        registries: RegistryResolver,
        scratch: Option<Rc<SimpleStorageService>>,
        payloads: PayloadMap,
    ) -> Result<Rc<Self>, ComputeError> {
        let mut hosts = Vec::new();
        for &h in exec_hosts {
            let host = HostName::new(h);
            let (cores, ram) = kernel
                .platform(|p| p.host(&host).map(|h| (h.cores, h.ram)))
                .map_err(KernelError::from)?;
            hosts.push(BmHost { name: host, cores, ram });
        }
        Self::with_hosts(kernel, name, home_host, hosts, None, storage, registries, scratch, payloads)
    }

    /// Service over explicit host shares (used by the cloud service to
    /// carve a VM out of one physical host).
    #[allow(clippy::too_many_arguments)]
    pub fn with_hosts(
        kernel: &Kernel,
        name: &str,
        home_host: &str,
        exec_hosts: Vec<BmHost>,
        host_label: Option<HostName>,
        storage: StorageResolver,
        registries: RegistryResolver,
        scratch: Option<Rc<SimpleStorageService>>,
        payloads: PayloadMap,
    ) -> Result<Rc<Self>, ComputeError> {
        let home_host = HostName::new(home_host);
        let port =
            kernel.create_commport(&format!("bare-metal-{name}"), &home_host).map_err(KernelError::from)?;
        let hosts = exec_hosts
            .into_iter()
            .map(|h| {
                (
                    h.name,
                    HostSlot {
                        total_cores: h.cores,
                        idle_cores: h.cores,
                        total_ram: h.ram,
                        free_ram: h.ram,
                    },
                )
            })
            .collect();
        Ok(Rc::new(Self {
            name: ServiceName::new(name),
            home_host,
            host_label,
            port,
            payloads,
            kernel: kernel.clone(),
            state: Rc::new(RefCell::new(BmState { hosts, jobs: IndexMap::new() })),
            storage,
            registries,
            scratch,
            actor: RefCell::new(None),
        }))
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn endpoint(&self) -> ComputeEndpoint {
        ComputeEndpoint {
            name: self.name.clone(),
            port: self.port.clone(),
            payloads: self.payloads.clone(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.actor.borrow().map(|a| self.kernel.is_live(a)).unwrap_or(false)
    }

    /// Idle cores per execution host.
    pub fn idle_cores(&self) -> IndexMap<HostName, u32> {
        self.state.borrow().hosts.iter().map(|(h, s)| (h.clone(), s.idle_cores)).collect()
    }

    pub fn total_idle_core_count(&self) -> u32 {
        self.state.borrow().hosts.values().map(|s| s.idle_cores).sum()
    }

    pub fn idle_resources(&self) -> Vec<(HostName, u32, u64)> {
        self.state
            .borrow()
            .hosts
            .iter()
            .map(|(h, s)| (h.clone(), s.idle_cores, s.free_ram))
            .collect()
    }

    /// Actors belonging to this service (for VM suspend/resume).
    pub fn actor_ids(&self) -> Vec<ActorId> {
        let mut ids: Vec<ActorId> = self.actor.borrow().iter().copied().collect();
        let st = self.state.borrow();
        ids.extend(st.jobs.values().flat_map(|j| j.executors.values().map(|e| e.actor)));
        ids
    }

    pub fn start(self: &Rc<Self>) -> Result<(), KernelError> {
        let svc = self.clone();
        let port = self.port.clone();
        let id = self.kernel.spawn(
            &format!("bare-metal-{}", self.name),
            &self.home_host.clone(),
            true,
            move |ctx| async move {
                tracing::info!(service = %svc.name, "bare-metal service up");
                loop {
                    let msg = ctx.get(&port).await?;
                    svc.dispatch_message(&ctx, msg)?;
                }
            },
        )?;
        *self.actor.borrow_mut() = Some(id);
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(id) = self.actor.borrow_mut().take() {
            self.kernel.kill(id);
        }
    }

    /// Suspend every actor of this service (VM suspension).
    pub fn suspend(&self) {
        for id in self.actor_ids() {
            self.kernel.suspend(id);
        }
    }

    pub fn resume(&self) {
        for id in self.actor_ids() {
            self.kernel.resume(id);
        }
    }

    /// Kill or fail every held job, then stop. With `cause`, submitters
    /// get failure notifications; without, work is killed silently.
    pub fn terminate_all(&self, ctx: &SimContext, cause: Option<FailureCause>) {
        let jobs: Vec<JobId> = self.state.borrow().jobs.keys().cloned().collect();
        for id in jobs {
            let Some(running) = self.state.borrow_mut().jobs.shift_remove(&id) else { continue };
            self.release_job(&running);
            let effective =
                cause.clone().unwrap_or(FailureCause::JobKilled);
            running.submission.job.borrow_mut().discontinue(effective.clone(), ctx.now());
            if cause.is_some() {
                let _ = ctx.dput(
                    &running.submission.notify,
                    JobFailedNotification {
                        job: running.submission.job.clone(),
                        service: self.name.clone(),
                        cause: effective,
                    },
                    self.payloads.get(MessagePayload::JobFailedNotification),
                );
            }
        }
        self.stop();
    }

    fn dispatch_message(
        self: &Rc<Self>,
        ctx: &SimContext,
        msg: gantry_kernel::AnyMessage,
    ) -> Result<(), KernelError> {
        let msg = match msg.downcast::<JobSubmitRequest>() {
            Ok(req) => return self.handle_submit(ctx, req),
            Err(m) => m,
        };
        let msg = match msg.downcast::<JobTerminateRequest>() {
            Ok(req) => {
                let result = self.terminate_job(ctx, &req.job);
                return ctx.dput(
                    &req.reply_to,
                    JobTerminateAnswer { result },
                    self.payloads.get(MessagePayload::JobKillAnswer),
                );
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<ResourceInfoRequest>() {
            Ok(req) => {
                return ctx.dput(
                    &req.reply_to,
                    ResourceInfoAnswer { hosts: self.idle_resources() },
                    self.payloads.get(MessagePayload::ResourceInfoAnswer),
                );
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<ActionExecutorDone>() {
            Ok(done) => return self.handle_executor_done(ctx, done),
            Err(m) => m,
        };
        let msg = match msg.downcast::<DispatchTick>() {
            Ok(tick) => {
                self.dispatch_ready(ctx, &tick.job)?;
                return Ok(());
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<NotifyTick>() {
            Ok(tick) => return self.finalize_job(ctx, &tick.job),
            Err(m) => m,
        };
        tracing::warn!(service = %self.name, got = msg.type_name(), "unexpected message");
        Ok(())
    }

    fn handle_submit(
        self: &Rc<Self>,
        ctx: &SimContext,
        req: JobSubmitRequest,
    ) -> Result<(), KernelError> {
        let answer_payload = self.payloads.get(MessagePayload::JobSubmitAnswer);
        if let Err(cause) = self.validate(&req.submission) {
            return ctx.dput(&req.reply_to, JobSubmitAnswer { result: Err(cause) }, answer_payload);
        }
        let job_id = {
            let mut job = req.submission.job.borrow_mut();
            if let Err(e) = job.mark_submitted(ctx.now()) {
                let cause = FailureCause::JobTypeNotSupported {
                    service: self.name.clone(),
                    reason: e.to_string(),
                };
                drop(job);
                return ctx.dput(
                    &req.reply_to,
                    JobSubmitAnswer { result: Err(cause) },
                    answer_payload,
                );
            }
            job.id().clone()
        };
        let pre = req.submission.job.borrow().pre_overhead();
        self.state
            .borrow_mut()
            .jobs
            .insert(job_id.clone(), RunningJob { submission: req.submission, executors: IndexMap::new() });
        ctx.dput(&req.reply_to, JobSubmitAnswer { result: Ok(()) }, answer_payload)?;
        if pre > 0.0 {
            Alarm::schedule(ctx, &self.port, DispatchTick { job: job_id }, ctx.now() + pre)
                .detach();
            Ok(())
        } else {
            self.dispatch_ready(ctx, &job_id)
        }
    }

    /// Reject shapes and requests this service can never run.
    fn validate(&self, submission: &JobSubmission) -> Result<(), FailureCause> {
        if submission.pilot {
            return Err(FailureCause::JobTypeNotSupported {
                service: self.name.clone(),
                reason: "bare-metal services do not run pilot jobs".into(),
            });
        }
        if !submission.job.borrow().is_submittable() {
            return Err(FailureCause::JobTypeNotSupported {
                service: self.name.clone(),
                reason: "a parent job is not in a terminal state".into(),
            });
        }
        let st = self.state.borrow();
        let job = submission.job.borrow();
        for index in 0..job.action_count() {
            let action = job.action(index);
            let fits = match submission.args.binding(action.name()) {
                Ok(Some(binding)) => {
                    let wanted = binding.cores.unwrap_or(action.min_cores());
                    st.hosts.get(&binding.host).map(|slot| {
                        slot.total_cores >= wanted.max(action.min_cores())
                            && slot.total_ram >= action.ram()
                    })
                    .unwrap_or(false)
                }
                Ok(None) => st.hosts.values().any(|slot| {
                    slot.total_cores >= action.min_cores() && slot.total_ram >= action.ram()
                }),
                Err(e) => {
                    return Err(FailureCause::JobTypeNotSupported {
                        service: self.name.clone(),
                        reason: e.to_string(),
                    });
                }
            };
            if !fits {
                return Err(FailureCause::NotEnoughComputeResources {
                    service: self.name.clone(),
                    reason: format!(
                        "action {} needs {} cores / {} B RAM",
                        action.name(),
                        action.min_cores(),
                        action.ram()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Greedy pass over the job's ready actions.
    fn dispatch_ready(self: &Rc<Self>, ctx: &SimContext, job_id: &JobId) -> Result<(), KernelError> {
        loop {
            let Some(next) = self.pick_dispatch(ctx, job_id)? else { break };
            let (index, host, cores, ram, custom) = next;
            let spec = {
                let st = self.state.borrow();
                let Some(running) = st.jobs.get(job_id) else { break };
                ExecutorSpec {
                    service: self.name.clone(),
                    job: running.submission.job.clone(),
                    action_index: index,
                    host: self.host_label.clone().unwrap_or_else(|| host.clone()),
                    physical_host: host.clone(),
                    cores,
                    ram,
                    custom,
                    storage: self.storage.clone(),
                    registries: self.registries.clone(),
                    scratch: self.scratch.as_ref().map(|s| {
                        (s.endpoint(), format!("/{job_id}"))
                    }),
                    notify: self.port.clone(),
                }
            };
            let actor = spawn_executor(ctx, spec)?;
            let mut st = self.state.borrow_mut();
            if let Some(running) = st.jobs.get_mut(job_id) {
                running.executors.insert(index, ExecRecord { actor, host, cores, ram });
            }
        }
        // A failure during the pass may have finished the job.
        self.maybe_finish(ctx, job_id)
    }

    /// Find one ready action to start, reserving its resources. Actions
    /// that can never fit fail in place.
    #[allow(clippy::type_complexity)]
    fn pick_dispatch(
        &self,
        ctx: &SimContext,
        job_id: &JobId,
    ) -> Result<Option<(usize, HostName, u32, u64, Option<CustomWork>)>, KernelError> {
        let mut st = self.state.borrow_mut();
        let Some(running) = st.jobs.get(job_id) else { return Ok(None) };
        let job_ref = running.submission.job.clone();
        let args = running.submission.args.clone();
        let customs = running.submission.customs.clone();
        let mut job = job_ref.borrow_mut();
        let ready: Vec<usize> = job.actions_in_state(ActionState::Ready).iter().copied().collect();
        for index in ready {
            let action = job.action(index);
            let min = action.min_cores();
            let max = action.max_cores();
            let ram = action.ram();
            let binding = match args.binding(action.name()) {
                Ok(b) => b,
                Err(_) => None,
            };
            let choice = match &binding {
                Some(b) => {
                    let wanted = b.cores.unwrap_or(min).max(min);
                    st.hosts.get(&b.host).and_then(|slot| {
                        (slot.idle_cores >= wanted && slot.free_ram >= ram)
                            .then(|| (b.host.clone(), wanted))
                    })
                }
                None => st.hosts.iter().find_map(|(h, slot)| {
                    (slot.idle_cores >= min && slot.free_ram >= ram)
                        .then(|| (h.clone(), slot.idle_cores.min(max)))
                }),
            };
            let Some((host, cores)) = choice else {
                // Blocked, or impossible even on an empty service?
                let possible = match &binding {
                    Some(b) => st.hosts.get(&b.host).map(|slot| {
                        slot.total_cores >= b.cores.unwrap_or(min).max(min)
                            && slot.total_ram >= ram
                    })
                    .unwrap_or(false),
                    None => st
                        .hosts
                        .values()
                        .any(|slot| slot.total_cores >= min && slot.total_ram >= ram),
                };
                if !possible {
                    let cause = FailureCause::NotEnoughComputeResources {
                        service: self.name.clone(),
                        reason: format!("action {} can never fit", job.action(index).name()),
                    };
                    job.action_frame_mut(index).failure = Some(cause.clone());
                    let now = ctx.now();
                    let _ = job.transition(index, ActionState::Failed, now);
                    job.propagate_failure(index, cause, now);
                }
                continue;
            };
            // Reserve and report the pick.
            if let Some(slot) = st.hosts.get_mut(&host) {
                slot.idle_cores -= cores;
                slot.free_ram -= ram;
            }
            let custom = customs.get(job.action(index).name()).cloned();
            drop(job);
            self.kernel
                .platform_mut(|p, now| p.adjust_active_cores(&host, i64::from(cores), now))
                .map_err(KernelError::from)?;
            return Ok(Some((index, host, cores, ram, custom)));
        }
        Ok(None)
    }

    fn handle_executor_done(
        self: &Rc<Self>,
        ctx: &SimContext,
        done: ActionExecutorDone,
    ) -> Result<(), KernelError> {
        let job_id = done.job.borrow().id().clone();
        {
            let mut st = self.state.borrow_mut();
            let Some(running) = st.jobs.get_mut(&job_id) else { return Ok(()) };
            if let Some(rec) = running.executors.shift_remove(&done.action_index) {
                if let Some(slot) = st.hosts.get_mut(&rec.host) {
                    slot.idle_cores += rec.cores;
                    slot.free_ram += rec.ram;
                }
                self.kernel
                    .platform_mut(|p, now| {
                        p.adjust_active_cores(&rec.host, -i64::from(rec.cores), now)
                    })
                    .map_err(KernelError::from)?;
            }
        }
        {
            let mut job = done.job.borrow_mut();
            let now = ctx.now();
            if let Some(cause) = job.action(done.action_index).failure().cloned() {
                job.propagate_failure(done.action_index, cause, now);
            }
            job.promote_ready(now);
        }
        self.dispatch_ready(ctx, &job_id)
    }

    /// When all actions are terminal, charge the post overhead and then
    /// notify the submitter.
    fn maybe_finish(self: &Rc<Self>, ctx: &SimContext, job_id: &JobId) -> Result<(), KernelError> {
        let (terminal, post) = {
            let st = self.state.borrow();
            let Some(running) = st.jobs.get(job_id) else { return Ok(()) };
            let job = running.submission.job.borrow();
            (job.state().is_terminal(), job.post_overhead())
        };
        if !terminal {
            return Ok(());
        }
        if post > 0.0 {
            Alarm::schedule(ctx, &self.port, NotifyTick { job: job_id.clone() }, ctx.now() + post)
                .detach();
            Ok(())
        } else {
            self.finalize_job(ctx, job_id)
        }
    }

    fn finalize_job(self: &Rc<Self>, ctx: &SimContext, job_id: &JobId) -> Result<(), KernelError> {
        let Some(running) = self.state.borrow_mut().jobs.shift_remove(job_id) else {
            return Ok(());
        };
        if let Some(scratch) = &self.scratch {
            scratch.purge_dir(&format!("/{job_id}"));
        }
        let job = running.submission.job.clone();
        let state = job.borrow().state();
        match state {
            JobState::Completed => ctx.dput(
                &running.submission.notify,
                JobDoneNotification { job, service: self.name.clone() },
                self.payloads.get(MessagePayload::JobDoneNotification),
            ),
            _ => {
                let cause = job
                    .borrow()
                    .failure()
                    .unwrap_or(FailureCause::JobKilled);
                ctx.dput(
                    &running.submission.notify,
                    JobFailedNotification { job, service: self.name.clone(), cause },
                    self.payloads.get(MessagePayload::JobFailedNotification),
                )
            }
        }
    }

    fn terminate_job(&self, ctx: &SimContext, job: &JobRef) -> Result<(), FailureCause> {
        let job_id = job.borrow().id().clone();
        let Some(running) = self.state.borrow_mut().jobs.shift_remove(&job_id) else {
            return Err(FailureCause::JobCannotBeTerminated {
                state: job.borrow().state().to_string(),
            });
        };
        self.release_job(&running);
        running.submission.job.borrow_mut().discontinue(FailureCause::JobKilled, ctx.now());
        if let Some(scratch) = &self.scratch {
            scratch.purge_dir(&format!("/{job_id}"));
        }
        Ok(())
    }

    /// Kill executors and return their reservations (idempotent per
    /// record; each executor is released exactly once).
    fn release_job(&self, running: &RunningJob) {
        let mut st = self.state.borrow_mut();
        for rec in running.executors.values() {
            self.kernel.kill(rec.actor);
            if let Some(slot) = st.hosts.get_mut(&rec.host) {
                slot.idle_cores = (slot.idle_cores + rec.cores).min(slot.total_cores);
                slot.free_ram = (slot.free_ram + rec.ram).min(slot.total_ram);
            }
            let _ = self
                .kernel
                .platform_mut(|p, now| p.adjust_active_cores(&rec.host, -i64::from(rec.cores), now));
        }
    }
}

#[cfg(test)]
#[path = "bare_metal_tests.rs"]
mod tests;
