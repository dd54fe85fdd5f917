// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTCondor-style meta-scheduler: routes compound jobs to backing
//! compute services by universe.
//!
//! Grid-universe jobs (carrying `-N`, `-c`, `-t`, `-service`) go to the
//! named batch service; non-grid jobs go to the first bare-metal
//! service with an idle fit. One negotiation pass per trigger; jobs it
//! cannot place stay pending for the next pass.

use crate::bare_metal::BareMetalComputeService;
use crate::batch::BatchComputeService;
use crate::service::*;
use gantry_core::{
    FailureCause, JobId, MessagePayload, PayloadMap, PropertyMap, ServiceName, ServiceProperty,
};
use gantry_kernel::{ActorId, Commport, Kernel, KernelError, SimContext};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

/// A backing service the negotiator can dispatch to.
#[derive(Clone)]
pub enum CondorTarget {
    BareMetal(Rc<BareMetalComputeService>),
    Batch(Rc<BatchComputeService>),
}

impl CondorTarget {
    fn name(&self) -> &ServiceName {
        match self {
            CondorTarget::BareMetal(s) => s.name(),
            CondorTarget::Batch(s) => s.name(),
        }
    }

    fn endpoint(&self) -> ComputeEndpoint {
        match self {
            CondorTarget::BareMetal(s) => s.endpoint(),
            CondorTarget::Batch(s) => s.endpoint(),
        }
    }
}

struct CondorState {
    pending: Vec<JobSubmission>,
    /// Job -> target service, while the job is out at a target.
    running: IndexMap<JobId, ServiceName>,
    /// Job -> the original submitter's notify port, for relaying.
    relay: IndexMap<JobId, Commport>,
    started_up: bool,
}

pub struct HtcondorComputeService {
    name: ServiceName,
    home_host: gantry_core::HostName,
    port: Commport,
    payloads: PayloadMap,
    kernel: Kernel,
    targets: Vec<CondorTarget>,
    startup_overhead: f64,
    pre_grid_overhead: f64,
    pre_non_grid_overhead: f64,
    state: Rc<RefCell<CondorState>>,
    actor: RefCell<Option<ActorId>>,
}

impl HtcondorComputeService {
    pub fn new(
        kernel: &Kernel,
        name: &str,
        home_host: &str,
        targets: Vec<CondorTarget>,
        props: &PropertyMap,
        payloads: PayloadMap,
    ) -> Result<Rc<Self>, ComputeError> {
        let home_host = gantry_core::HostName::new(home_host);
        let port = kernel
            .create_commport(&format!("htcondor-{name}"), &home_host)
            .map_err(KernelError::from)?;
        Ok(Rc::new(Self {
            name: ServiceName::new(name),
            home_host,
            port,
            payloads,
            kernel: kernel.clone(),
            targets,
            startup_overhead: props.get_f64(ServiceProperty::NegotiatorStartupOverhead, 0.0)?,
            pre_grid_overhead: props.get_f64(ServiceProperty::PreGridJobOverhead, 0.0)?,
            pre_non_grid_overhead: props.get_f64(ServiceProperty::PreNonGridJobOverhead, 0.0)?,
            state: Rc::new(RefCell::new(CondorState {
                pending: Vec::new(),
                running: IndexMap::new(),
                relay: IndexMap::new(),
                started_up: false,
            })),
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

    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn start(self: &Rc<Self>) -> Result<(), KernelError> {
        let svc = self.clone();
        let port = self.port.clone();
        let id = self.kernel.spawn(
            &format!("htcondor-{}", self.name),
            &self.home_host.clone(),
            true,
            move |ctx| async move {
                tracing::info!(service = %svc.name, "htcondor service up");
                loop {
                    let msg = ctx.get(&port).await?;
                    svc.dispatch_message(&ctx, msg).await?;
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

    async fn dispatch_message(
        self: &Rc<Self>,
        ctx: &SimContext,
        msg: gantry_kernel::AnyMessage,
    ) -> Result<(), KernelError> {
        let msg = match msg.downcast::<JobSubmitRequest>() {
            Ok(req) => return self.handle_submit(ctx, req).await,
            Err(m) => m,
        };
        // Relayed terminal notifications from targets.
        let msg = match msg.downcast::<JobDoneNotification>() {
            Ok(note) => return self.relay_done(ctx, note).await,
            Err(m) => m,
        };
        let msg = match msg.downcast::<JobFailedNotification>() {
            Ok(note) => return self.relay_failed(ctx, note).await,
            Err(m) => m,
        };
        tracing::warn!(service = %self.name, got = msg.type_name(), "unexpected message");
        Ok(())
    }

    async fn handle_submit(
        self: &Rc<Self>,
        ctx: &SimContext,
        req: JobSubmitRequest,
    ) -> Result<(), KernelError> {
        let answer_payload = self.payloads.get(MessagePayload::JobSubmitAnswer);
        if let Err(cause) = self.classify(&req.submission) {
            return ctx.dput(&req.reply_to, JobSubmitAnswer { result: Err(cause) }, answer_payload);
        }
        if let Err(e) = req.submission.job.borrow_mut().mark_submitted(ctx.now()) {
            let cause = FailureCause::JobTypeNotSupported {
                service: self.name.clone(),
                reason: e.to_string(),
            };
            return ctx.dput(&req.reply_to, JobSubmitAnswer { result: Err(cause) }, answer_payload);
        }
        ctx.dput(&req.reply_to, JobSubmitAnswer { result: Ok(()) }, answer_payload)?;
        self.state.borrow_mut().pending.push(req.submission);
        self.negotiate(ctx).await
    }

    /// A job is either fully grid (all four args) or argument-free.
    fn classify(&self, submission: &JobSubmission) -> Result<(), FailureCause> {
        let args = &submission.args;
        if args.is_grid_universe() {
            let target = args.service().unwrap_or_default();
            let wanted = ServiceName::new(target);
            let is_batch = self
                .targets
                .iter()
                .any(|t| matches!(t, CondorTarget::Batch(_)) && t.name() == &wanted);
            if !is_batch {
                return Err(FailureCause::JobTypeNotSupported {
                    service: self.name.clone(),
                    reason: format!("-service {target:?} does not name a batch target"),
                });
            }
            Ok(())
        } else if args.is_empty() {
            Ok(())
        } else {
            Err(FailureCause::JobTypeNotSupported {
                service: self.name.clone(),
                reason: "grid jobs need -N, -c, -t and -service; non-grid jobs take no args"
                    .into(),
            })
        }
    }

    /// One negotiation cycle: highest priority first, first match wins,
    /// the rest stay pending.
    async fn negotiate(self: &Rc<Self>, ctx: &SimContext) -> Result<(), KernelError> {
        {
            let mut st = self.state.borrow_mut();
            if !st.started_up {
                st.started_up = true;
                drop(st);
                if self.startup_overhead > 0.0 {
                    ctx.sleep(self.startup_overhead).await?;
                }
            }
        }
        let mut pending = {
            let mut st = self.state.borrow_mut();
            std::mem::take(&mut st.pending)
        };
        // Stable sort keeps arrival order within a priority level.
        pending.sort_by(|a, b| {
            b.job.borrow().priority().total_cmp(&a.job.borrow().priority())
        });
        let mut unplaced = Vec::new();
        let mut scheduled = 0usize;
        for submission in pending {
            match self.pick_target(&submission) {
                Some(target) => {
                    let overhead = if submission.args.is_grid_universe() {
                        self.pre_grid_overhead
                    } else {
                        self.pre_non_grid_overhead
                    };
                    if overhead > 0.0 {
                        ctx.sleep(overhead).await?;
                    }
                    self.dispatch_to(ctx, target, submission).await?;
                    scheduled += 1;
                }
                None => unplaced.push(submission),
            }
        }
        tracing::debug!(service = %self.name, scheduled, unplaced = unplaced.len(), "negotiation cycle");
        self.state.borrow_mut().pending.extend(unplaced);
        Ok(())
    }

    fn pick_target(&self, submission: &JobSubmission) -> Option<CondorTarget> {
        if submission.args.is_grid_universe() {
            let wanted = ServiceName::new(submission.args.service().unwrap_or_default());
            return self
                .targets
                .iter()
                .find(|t| matches!(t, CondorTarget::Batch(_)) && t.name() == &wanted)
                .cloned();
        }
        // Non-grid: first bare-metal with one host that fits the job's
        // widest action right now.
        let (min_cores, min_ram) = {
            let job = submission.job.borrow();
            let cores = (0..job.action_count())
                .map(|i| job.action(i).min_cores())
                .max()
                .unwrap_or(1);
            let ram =
                (0..job.action_count()).map(|i| job.action(i).ram()).max().unwrap_or(0);
            (cores, ram)
        };
        self.targets
            .iter()
            .find(|t| match t {
                CondorTarget::BareMetal(s) => s
                    .idle_resources()
                    .iter()
                    .any(|(_, idle, ram)| *idle >= min_cores && *ram >= min_ram),
                CondorTarget::Batch(_) => false,
            })
            .cloned()
    }

    async fn dispatch_to(
        self: &Rc<Self>,
        ctx: &SimContext,
        target: CondorTarget,
        submission: JobSubmission,
    ) -> Result<(), KernelError> {
        let job = submission.job.clone();
        let job_id = job.borrow().id().clone();
        // The job was already marked submitted here; hand the target a
        // fresh attempt so its own submit bookkeeping applies.
        let forwarded = JobSubmission {
            job: job.clone(),
            // Terminal notifications come back through us for the
            // running-map bookkeeping, then get relayed.
            notify: self.port.clone(),
            args: strip_service_arg(&submission.args),
            customs: submission.customs.clone(),
            pilot: submission.pilot,
        };
        {
            let mut st = self.state.borrow_mut();
            st.running.insert(job_id.clone(), target.name().clone());
            st.relay.insert(job_id.clone(), submission.notify.clone());
        }
        let result = forward_submission(ctx, &target.endpoint(), forwarded).await;
        if let Err(cause) = result {
            let mut st = self.state.borrow_mut();
            st.running.shift_remove(&job_id);
            st.relay.shift_remove(&job_id);
            drop(st);
            ctx.dput(
                &submission.notify,
                JobFailedNotification { job, service: self.name.clone(), cause },
                self.payloads.get(MessagePayload::JobFailedNotification),
            )?;
        }
        Ok(())
    }

    async fn relay_done(
        self: &Rc<Self>,
        ctx: &SimContext,
        note: JobDoneNotification,
    ) -> Result<(), KernelError> {
        let job_id = note.job.borrow().id().clone();
        let notify = {
            let mut st = self.state.borrow_mut();
            st.running.shift_remove(&job_id);
            st.relay.shift_remove(&job_id)
        };
        if let Some(notify) = notify {
            ctx.dput(
                &notify,
                JobDoneNotification { job: note.job, service: self.name.clone() },
                self.payloads.get(MessagePayload::JobDoneNotification),
            )?;
        }
        // A slot freed somewhere; try the backlog.
        self.negotiate(ctx).await
    }

    async fn relay_failed(
        self: &Rc<Self>,
        ctx: &SimContext,
        note: JobFailedNotification,
    ) -> Result<(), KernelError> {
        let job_id = note.job.borrow().id().clone();
        let notify = {
            let mut st = self.state.borrow_mut();
            st.running.shift_remove(&job_id);
            st.relay.shift_remove(&job_id)
        };
        if let Some(notify) = notify {
            ctx.dput(
                &notify,
                JobFailedNotification {
                    job: note.job,
                    service: self.name.clone(),
                    cause: note.cause,
                },
                self.payloads.get(MessagePayload::JobFailedNotification),
            )?;
        }
        self.negotiate(ctx).await
    }
}

/// Forward a submission whose job is already in the submitted state:
/// the target's `mark_submitted` would refuse, so the request path used
/// by end clients is bypassed in favour of a direct resubmission frame.
async fn forward_submission(
    ctx: &SimContext,
    ep: &ComputeEndpoint,
    submission: JobSubmission,
) -> Result<(), FailureCause> {
    // Reset the job to a submittable state for the target service.
    submission.job.borrow_mut().reset_for_resubmission();
    submit_job(ctx, ep, submission).await
}

fn strip_service_arg(args: &ServiceArgs) -> ServiceArgs {
    let mut out = ServiceArgs::new();
    for key in ["-N", "-c", "-t"] {
        if let Some(v) = args.get(key) {
            out = out.set(key, v);
        }
    }
    out
}

#[cfg(test)]
#[path = "htcondor_tests.rs"]
mod tests;
