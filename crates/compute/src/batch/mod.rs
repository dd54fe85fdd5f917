// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The batch compute service: a FIFO arrival queue of `(N, c, t)` jobs
//! over a fixed node pool, scheduled by FCFS, EASY backfilling, or
//! conservative backfilling, with walltime enforcement and pilot jobs.
//!
//! FCFS places jobs at core granularity (`N` hosts with at least `c`
//! idle cores each); the backfilling algorithms reason about whole
//! nodes, the usual node-exclusive batch model.

mod timeline;

pub use timeline::AvailabilityTimeline;

use crate::bare_metal::{BareMetalComputeService, BmHost};
use crate::executor::{
    spawn_executor, ActionExecutorDone, ExecutorSpec, RegistryResolver, StorageResolver,
};
use crate::service::*;
use gantry_core::{
    ActionState, BatchJob, FailureCause, HostName, JobId, JobRef, JobState, MessagePayload,
    PayloadMap, PropertyMap, ServiceName, ServiceProperty,
};
use gantry_kernel::{ActorId, Alarm, Commport, Kernel, KernelError, SimContext};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchAlgorithm {
    #[default]
    Fcfs,
    EasyBf,
    ConservativeBf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostSelection {
    #[default]
    FirstFit,
    BestFit,
    RoundRobin,
}

struct NodeSlot {
    total_cores: u32,
    idle_cores: u32,
}

struct QueuedJob {
    batch: BatchJob,
    submission: JobSubmission,
}

struct ExecRecord {
    actor: ActorId,
    host: HostName,
    cores: u32,
}

struct RunningBatch {
    batch: BatchJob,
    submission: JobSubmission,
    executors: IndexMap<usize, ExecRecord>,
    /// Idle cores within the job's own allocation.
    alloc_idle: IndexMap<HostName, u32>,
    pilot_child: Option<Rc<BareMetalComputeService>>,
    /// Dropping the handle cancels the walltime alarm on normal
    /// completion.
    _walltime_alarm: Option<Alarm>,
}

struct BatchState {
    nodes: IndexMap<HostName, NodeSlot>,
    queue: Vec<QueuedJob>,
    running: IndexMap<JobId, RunningBatch>,
    rr_cursor: usize,
}

#[derive(Debug)]
struct WalltimeTick {
    job: JobId,
}

#[derive(Debug)]
pub struct EstimateRequest {
    pub reply_to: Commport,
    /// `(probe id, nodes, cores per node, walltime seconds)`
    pub probes: Vec<(String, u32, u32, f64)>,
}

#[derive(Debug)]
pub struct EstimateAnswer {
    /// `-1.0` marks combinations the configuration cannot predict.
    pub estimates: Vec<(String, f64)>,
}

pub struct BatchComputeService {
    name: ServiceName,
    home_host: HostName,
    port: Commport,
    payloads: PayloadMap,
    kernel: Kernel,
    algorithm: BatchAlgorithm,
    host_selection: HostSelection,
    walltime_padding: f64,
    supports_pilots: bool,
    storage: StorageResolver,
    registries: RegistryResolver,
    state: Rc<RefCell<BatchState>>,
    actor: RefCell<Option<ActorId>>,
}

impl BatchComputeService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kernel: &Kernel,
        name: &str,
        home_host: &str,
        nodes: &[&str],
        props: &PropertyMap,
        storage: StorageResolver,
        registries: RegistryResolver,
        payloads: PayloadMap,
    ) -> Result<Rc<Self>, ComputeError> {
        let home_host = HostName::new(home_host);
        let algorithm = match props.get_or(ServiceProperty::BatchSchedulingAlgorithm, "fcfs") {
            "fcfs" => BatchAlgorithm::Fcfs,
            "easy_bf" => BatchAlgorithm::EasyBf,
            "conservative_bf" => BatchAlgorithm::ConservativeBf,
            other => {
                return Err(ComputeError::BadArgument {
                    key: ServiceProperty::BatchSchedulingAlgorithm.key().to_string(),
                    value: other.to_string(),
                });
            }
        };
        let host_selection = match props.get_or(ServiceProperty::HostSelectionAlgorithm, "first_fit")
        {
            "first_fit" => HostSelection::FirstFit,
            "best_fit" => HostSelection::BestFit,
            "round_robin" => HostSelection::RoundRobin,
            other => {
                return Err(ComputeError::BadArgument {
                    key: ServiceProperty::HostSelectionAlgorithm.key().to_string(),
                    value: other.to_string(),
                });
            }
        };
        let walltime_padding = props.get_f64(ServiceProperty::WalltimePadding, 0.0)?;
        let supports_pilots = props.get_bool(ServiceProperty::SupportsPilotJobs, true)?;
        let mut node_map = IndexMap::new();
        for &n in nodes {
            let host = HostName::new(n);
            let cores =
                kernel.platform(|p| p.num_cores(&host)).map_err(KernelError::from)?;
            node_map.insert(host, NodeSlot { total_cores: cores, idle_cores: cores });
        }
        let port = kernel
            .create_commport(&format!("batch-{name}"), &home_host)
            .map_err(KernelError::from)?;
        Ok(Rc::new(Self {
            name: ServiceName::new(name),
            home_host,
            port,
            payloads,
            kernel: kernel.clone(),
            algorithm,
            host_selection,
            walltime_padding,
            supports_pilots,
            storage,
            registries,
            state: Rc::new(RefCell::new(BatchState {
                nodes: node_map,
                queue: Vec::new(),
                running: IndexMap::new(),
                rr_cursor: 0,
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

    pub fn is_up(&self) -> bool {
        self.actor.borrow().map(|a| self.kernel.is_live(a)).unwrap_or(false)
    }

    pub fn queue_length(&self) -> usize {
        self.state.borrow().queue.len()
    }

    pub fn start(self: &Rc<Self>) -> Result<(), KernelError> {
        let svc = self.clone();
        let port = self.port.clone();
        let id = self.kernel.spawn(
            &format!("batch-{}", self.name),
            &self.home_host.clone(),
            true,
            move |ctx| async move {
                tracing::info!(service = %svc.name, algorithm = ?svc.algorithm, "batch service up");
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

    fn dispatch_message(
        self: &Rc<Self>,
        ctx: &SimContext,
        msg: gantry_kernel::AnyMessage,
    ) -> Result<(), KernelError> {
        let msg = match msg.downcast::<JobSubmitRequest>() {
            Ok(req) => return self.handle_submit(ctx, req),
            Err(m) => m,
        };
        let msg = match msg.downcast::<ActionExecutorDone>() {
            Ok(done) => return self.handle_executor_done(ctx, done),
            Err(m) => m,
        };
        let msg = match msg.downcast::<WalltimeTick>() {
            Ok(tick) => return self.handle_walltime(ctx, &tick.job),
            Err(m) => m,
        };
        let msg = match msg.downcast::<JobTerminateRequest>() {
            Ok(req) => {
                let result = self.terminate_job(ctx, &req.job);
                ctx.dput(
                    &req.reply_to,
                    JobTerminateAnswer { result },
                    self.payloads.get(MessagePayload::JobKillAnswer),
                )?;
                self.rebuild_reservations(ctx.now());
                return self.scheduling_pass(ctx);
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<ResourceInfoRequest>() {
            Ok(req) => {
                let hosts = self
                    .state
                    .borrow()
                    .nodes
                    .iter()
                    .map(|(h, s)| (h.clone(), s.idle_cores, 0u64))
                    .collect();
                return ctx.dput(
                    &req.reply_to,
                    ResourceInfoAnswer { hosts },
                    self.payloads.get(MessagePayload::ResourceInfoAnswer),
                );
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<EstimateRequest>() {
            Ok(req) => {
                let estimates = self.start_time_estimates(&req.probes, ctx.now());
                return ctx.dput(
                    &req.reply_to,
                    EstimateAnswer { estimates },
                    self.payloads.get(MessagePayload::ResourceInfoAnswer),
                );
            }
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
        let parsed = (|| -> Result<(u32, u32, f64), FailureCause> {
            let to_cause = |e: ComputeError| FailureCause::JobTypeNotSupported {
                service: self.name.clone(),
                reason: e.to_string(),
            };
            let n = req.submission.args.num_nodes().map_err(to_cause)?;
            let c = req.submission.args.cores_per_node().map_err(to_cause)?;
            let t = req.submission.args.walltime_secs().map_err(to_cause)?;
            match (n, c, t) {
                (Some(n), Some(c), Some(t)) => Ok((n, c, t)),
                _ => Err(FailureCause::JobTypeNotSupported {
                    service: self.name.clone(),
                    reason: "batch jobs must carry -N, -c and -t".into(),
                }),
            }
        })();
        let (n, c, t) = match parsed {
            Ok(v) => v,
            Err(cause) => {
                return ctx.dput(
                    &req.reply_to,
                    JobSubmitAnswer { result: Err(cause) },
                    answer_payload,
                );
            }
        };
        if req.submission.pilot && !self.supports_pilots {
            let cause = FailureCause::JobTypeNotSupported {
                service: self.name.clone(),
                reason: "pilot jobs are disabled on this service".into(),
            };
            return ctx.dput(&req.reply_to, JobSubmitAnswer { result: Err(cause) }, answer_payload);
        }
        {
            let st = self.state.borrow();
            let feasible = n as usize <= st.nodes.len()
                && st.nodes.values().all(|s| s.total_cores >= c);
            if !feasible {
                let cause = FailureCause::NotEnoughComputeResources {
                    service: self.name.clone(),
                    reason: format!("{n} nodes x {c} cores can never be satisfied"),
                };
                return ctx.dput(
                    &req.reply_to,
                    JobSubmitAnswer { result: Err(cause) },
                    answer_payload,
                );
            }
        }
        {
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
        }
        ctx.dput(&req.reply_to, JobSubmitAnswer { result: Ok(()) }, answer_payload)?;
        let batch = BatchJob::new(req.submission.job.clone(), n, c, t, ctx.now());
        self.state.borrow_mut().queue.push(QueuedJob { batch, submission: req.submission });
        if self.algorithm == BatchAlgorithm::ConservativeBf {
            self.rebuild_reservations(ctx.now());
        }
        self.scheduling_pass(ctx)
    }

    // --- scheduling ----------------------------------------------------

    fn scheduling_pass(self: &Rc<Self>, ctx: &SimContext) -> Result<(), KernelError> {
        match self.algorithm {
            BatchAlgorithm::Fcfs => self.pass_fcfs(ctx),
            BatchAlgorithm::EasyBf => self.pass_easy(ctx),
            BatchAlgorithm::ConservativeBf => self.pass_conservative(ctx),
        }
    }

    fn pass_fcfs(self: &Rc<Self>, ctx: &SimContext) -> Result<(), KernelError> {
        loop {
            let allocation = {
                let mut st = self.state.borrow_mut();
                let Some(head) = st.queue.first() else { return Ok(()) };
                let (n, c) = (head.batch.num_nodes, head.batch.cores_per_node);
                // Backfilling variants allocate node-exclusively even on
                // the FCFS path.
                let choice = if self.algorithm == BatchAlgorithm::Fcfs {
                    self.choose_hosts(&mut st, n, c)
                } else {
                    self.choose_whole_nodes(&mut st, n, c)
                };
                match choice {
                    Some(hosts) => hosts,
                    None => return Ok(()),
                }
            };
            let qjob = {
                let mut st = self.state.borrow_mut();
                st.queue.remove(0)
            };
            self.start_batch_job(ctx, qjob, allocation)?;
        }
    }

    fn pass_easy(self: &Rc<Self>, ctx: &SimContext) -> Result<(), KernelError> {
        // FCFS as far as it goes.
        self.pass_fcfs(ctx)?;
        let now = ctx.now();
        let (shadow, extra) = {
            let st = self.state.borrow();
            if st.queue.is_empty() {
                return Ok(());
            }
            let head_nodes = st.queue[0].batch.num_nodes;
            let free = free_whole_nodes(&st);
            if free >= head_nodes {
                return Ok(());
            }
            // Earliest date the head can start, from the running jobs'
            // declared walltimes.
            let mut releases: Vec<(f64, u32)> = st
                .running
                .values()
                .filter_map(|r| r.batch.deadline().map(|d| (d, r.batch.num_nodes)))
                .collect();
            releases.sort_by(|a, b| a.0.total_cmp(&b.0));
            let mut avail = free;
            let mut shadow = f64::INFINITY;
            for (deadline, nodes) in releases {
                avail += nodes;
                if avail >= head_nodes {
                    shadow = deadline;
                    break;
                }
            }
            (shadow, avail.saturating_sub(head_nodes))
        };
        // Depth-1 backfill: start any later job that fits now and does
        // not delay the head.
        let mut i = 1;
        loop {
            let candidate = {
                let mut st = self.state.borrow_mut();
                if i >= st.queue.len() {
                    return Ok(());
                }
                let q = &st.queue[i];
                let fits_window =
                    now + q.batch.walltime <= shadow || q.batch.num_nodes <= extra;
                if !fits_window || free_whole_nodes(&st) < q.batch.num_nodes {
                    None
                } else {
                    let (n, c) = (q.batch.num_nodes, q.batch.cores_per_node);
                    self.choose_whole_nodes(&mut st, n, c)
                }
            };
            match candidate {
                Some(allocation) => {
                    let qjob = {
                        let mut st = self.state.borrow_mut();
                        st.queue.remove(i)
                    };
                    self.start_batch_job(ctx, qjob, allocation)?;
                }
                None => i += 1,
            }
        }
    }

    fn pass_conservative(self: &Rc<Self>, ctx: &SimContext) -> Result<(), KernelError> {
        let now = ctx.now();
        loop {
            let next = {
                let mut st = self.state.borrow_mut();
                let idx = st.queue.iter().position(|q| {
                    q.batch.reservation.map(|r| r.start_date <= now).unwrap_or(false)
                });
                match idx {
                    None => return Ok(()),
                    Some(i) => {
                        let (n, c) =
                            (st.queue[i].batch.num_nodes, st.queue[i].batch.cores_per_node);
                        self.choose_whole_nodes(&mut st, n, c).map(|alloc| (i, alloc))
                    }
                }
            };
            let Some((i, allocation)) = next else { return Ok(()) };
            let qjob = {
                let mut st = self.state.borrow_mut();
                st.queue.remove(i)
            };
            self.start_batch_job(ctx, qjob, allocation)?;
        }
    }

    /// Re-place every queued job's reservation at its earliest feasible
    /// start (compact rebuild).
    fn rebuild_reservations(&self, now: f64) {
        if self.algorithm != BatchAlgorithm::ConservativeBf {
            return;
        }
        let mut st = self.state.borrow_mut();
        let total = st.nodes.len() as u32;
        let mut timeline = AvailabilityTimeline::new(total);
        for r in st.running.values() {
            if let Some(deadline) = r.batch.deadline() {
                timeline.commit(now, deadline, r.batch.num_nodes);
            }
        }
        for q in &mut st.queue {
            let start =
                timeline.earliest_start(now, q.batch.num_nodes, q.batch.walltime);
            q.batch.reserve(start);
            timeline.commit(start, start + q.batch.walltime, q.batch.num_nodes);
        }
    }

    /// FCFS host choice at core granularity.
    fn choose_hosts(&self, st: &mut BatchState, n: u32, c: u32) -> Option<Vec<HostName>> {
        let fits: Vec<&HostName> = match self.host_selection {
            HostSelection::FirstFit => st
                .nodes
                .iter()
                .filter(|(_, s)| s.idle_cores >= c)
                .map(|(h, _)| h)
                .take(n as usize)
                .collect(),
            HostSelection::BestFit => {
                // Minimise leftover cores on the chosen set.
                let mut candidates: Vec<(&HostName, u32)> = st
                    .nodes
                    .iter()
                    .filter(|(_, s)| s.idle_cores >= c)
                    .map(|(h, s)| (h, s.idle_cores - c))
                    .collect();
                candidates.sort_by_key(|&(_, leftover)| leftover);
                candidates.into_iter().map(|(h, _)| h).take(n as usize).collect()
            }
            HostSelection::RoundRobin => {
                let names: Vec<&HostName> = st.nodes.keys().collect();
                let len = names.len();
                let mut picked = Vec::new();
                for offset in 0..len {
                    let idx = (st.rr_cursor + offset) % len;
                    let name = names[idx];
                    if st.nodes[name].idle_cores >= c {
                        picked.push(name);
                        if picked.len() == n as usize {
                            break;
                        }
                    }
                }
                picked
            }
        };
        if fits.len() < n as usize {
            return None;
        }
        let chosen: Vec<HostName> = fits.into_iter().cloned().collect();
        if self.host_selection == HostSelection::RoundRobin {
            st.rr_cursor = (st.rr_cursor + chosen.len()) % st.nodes.len().max(1);
        }
        for host in &chosen {
            if let Some(slot) = st.nodes.get_mut(host) {
                slot.idle_cores -= c;
            }
        }
        Some(chosen)
    }

    /// Backfilling host choice: whole nodes only.
    fn choose_whole_nodes(&self, st: &mut BatchState, n: u32, _c: u32) -> Option<Vec<HostName>> {
        let chosen: Vec<HostName> = st
            .nodes
            .iter()
            .filter(|(_, s)| s.idle_cores == s.total_cores)
            .map(|(h, _)| h.clone())
            .take(n as usize)
            .collect();
        if chosen.len() < n as usize {
            return None;
        }
        for host in &chosen {
            if let Some(slot) = st.nodes.get_mut(host) {
                slot.idle_cores = 0;
            }
        }
        Some(chosen)
    }

    /// Node reservation granted; start the clock, the walltime alarm,
    /// and either the pilot's child service or the job's actions.
    fn start_batch_job(
        self: &Rc<Self>,
        ctx: &SimContext,
        mut qjob: QueuedJob,
        allocation: Vec<HostName>,
    ) -> Result<(), KernelError> {
        let now = ctx.now();
        let job_id = qjob.batch.job.borrow().id().clone();
        let c = qjob.batch.cores_per_node;
        qjob.batch.start_date = Some(now);
        qjob.batch.allocation = allocation.iter().map(|h| (h.clone(), c)).collect();
        let deadline = now + qjob.batch.walltime + self.walltime_padding;
        let alarm = Alarm::schedule(ctx, &self.port, WalltimeTick { job: job_id.clone() }, deadline);
        tracing::info!(
            service = %self.name,
            job = %qjob.batch.job.borrow().name(),
            nodes = allocation.len(),
            cores = c,
            "batch job started"
        );

        let pilot_child = if qjob.submission.pilot {
            let hosts: Vec<BmHost> = allocation
                .iter()
                .map(|h| {
                    let ram = self.kernel.platform(|p| p.ram(h)).unwrap_or(0);
                    BmHost { name: h.clone(), cores: c, ram }
                })
                .collect();
            let child = BareMetalComputeService::with_hosts(
                &self.kernel,
                &format!("{}-pilot-{}", self.name, job_id),
                self.home_host.as_str(),
                hosts,
                None,
                self.storage.clone(),
                self.registries.clone(),
                None,
                self.payloads.clone(),
            )
            .map_err(|e| KernelError::Failure(FailureCause::fatal(e.to_string())))?;
            child.start()?;
            ctx.dput(
                &qjob.submission.notify,
                PilotStartedNotification { job: qjob.batch.job.clone(), child: child.clone() },
                self.payloads.get(MessagePayload::JobDoneNotification),
            )?;
            Some(child)
        } else {
            None
        };

        // The job schedules at most `c` cores of work per granted node
        // (even when the node is held exclusively).
        let alloc_idle: IndexMap<HostName, u32> =
            allocation.iter().map(|h| (h.clone(), c)).collect();
        let running = RunningBatch {
            batch: qjob.batch,
            submission: qjob.submission,
            executors: IndexMap::new(),
            alloc_idle,
            pilot_child,
            _walltime_alarm: Some(alarm),
        };
        let is_pilot = running.pilot_child.is_some();
        self.state.borrow_mut().running.insert(job_id.clone(), running);
        if !is_pilot {
            self.dispatch_actions(ctx, &job_id)?;
        }
        Ok(())
    }

    /// First-fit of ready actions inside the job's own allocation.
    fn dispatch_actions(self: &Rc<Self>, ctx: &SimContext, job_id: &JobId) -> Result<(), KernelError> {
        loop {
            let pick = {
                let mut st = self.state.borrow_mut();
                let Some(running) = st.running.get_mut(job_id) else { return Ok(()) };
                let job_ref = running.batch.job.clone();
                let customs = running.submission.customs.clone();
                let mut job = job_ref.borrow_mut();
                let ready: Vec<usize> =
                    job.actions_in_state(ActionState::Ready).iter().copied().collect();
                let mut pick = None;
                for index in ready {
                    let action = job.action(index);
                    let (min, max, ram) =
                        (action.min_cores(), action.max_cores(), action.ram());
                    let choice = running.alloc_idle.iter().find_map(|(h, &idle)| {
                        (idle >= min).then(|| (h.clone(), idle.min(max)))
                    });
                    let Some((host, cores)) = choice else {
                        let possible =
                            running.batch.cores_per_node >= min;
                        if !possible {
                            let cause = FailureCause::NotEnoughComputeResources {
                                service: self.name.clone(),
                                reason: format!(
                                    "action {} needs {min} cores but nodes grant {}",
                                    action.name(),
                                    running.batch.cores_per_node
                                ),
                            };
                            job.action_frame_mut(index).failure = Some(cause.clone());
                            let now = ctx.now();
                            let _ = job.transition(index, ActionState::Failed, now);
                            job.propagate_failure(index, cause, now);
                        }
                        continue;
                    };
                    if let Some(idle) = running.alloc_idle.get_mut(&host) {
                        *idle -= cores;
                    }
                    let custom = customs.get(action.name()).cloned();
                    pick = Some((index, host, cores, ram, custom, job_ref.clone()));
                    break;
                }
                pick
            };
            let Some((index, host, cores, ram, custom, job_ref)) = pick else { break };
            let spec = ExecutorSpec {
                service: self.name.clone(),
                job: job_ref,
                action_index: index,
                host: host.clone(),
                physical_host: host.clone(),
                cores,
                ram,
                custom,
                storage: self.storage.clone(),
                registries: self.registries.clone(),
                scratch: None,
                notify: self.port.clone(),
            };
            let actor = spawn_executor(ctx, spec)?;
            self.kernel
                .platform_mut(|p, now| p.adjust_active_cores(&host, i64::from(cores), now))
                .map_err(KernelError::from)?;
            let mut st = self.state.borrow_mut();
            if let Some(running) = st.running.get_mut(job_id) {
                running.executors.insert(index, ExecRecord { actor, host, cores });
            }
        }
        self.maybe_finish(ctx, job_id)
    }

    fn handle_executor_done(
        self: &Rc<Self>,
        ctx: &SimContext,
        done: ActionExecutorDone,
    ) -> Result<(), KernelError> {
        let job_id = done.job.borrow().id().clone();
        {
            let mut st = self.state.borrow_mut();
            let Some(running) = st.running.get_mut(&job_id) else { return Ok(()) };
            if let Some(rec) = running.executors.shift_remove(&done.action_index) {
                if let Some(idle) = running.alloc_idle.get_mut(&rec.host) {
                    *idle += rec.cores;
                }
                let _ = self.kernel.platform_mut(|p, now| {
                    p.adjust_active_cores(&rec.host, -i64::from(rec.cores), now)
                });
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
        self.dispatch_actions(ctx, &job_id)
    }

    fn maybe_finish(self: &Rc<Self>, ctx: &SimContext, job_id: &JobId) -> Result<(), KernelError> {
        let terminal = {
            let st = self.state.borrow();
            let Some(running) = st.running.get(job_id) else { return Ok(()) };
            running.pilot_child.is_none()
                && running.batch.job.borrow().state().is_terminal()
        };
        if !terminal {
            return Ok(());
        }
        let Some(running) = self.state.borrow_mut().running.shift_remove(job_id) else {
            return Ok(());
        };
        self.release_nodes(&running);
        let job = running.batch.job.clone();
        let state = job.borrow().state();
        match state {
            JobState::Completed => ctx.dput(
                &running.submission.notify,
                JobDoneNotification { job, service: self.name.clone() },
                self.payloads.get(MessagePayload::JobDoneNotification),
            )?,
            _ => {
                let cause = job.borrow().failure().unwrap_or(FailureCause::JobKilled);
                ctx.dput(
                    &running.submission.notify,
                    JobFailedNotification { job, service: self.name.clone(), cause },
                    self.payloads.get(MessagePayload::JobFailedNotification),
                )?;
            }
        }
        self.rebuild_reservations(ctx.now());
        self.scheduling_pass(ctx)
    }

    /// Walltime exceeded: kill the job's work with `JOB_TIMEOUT`.
    fn handle_walltime(self: &Rc<Self>, ctx: &SimContext, job_id: &JobId) -> Result<(), KernelError> {
        let Some(running) = self.state.borrow_mut().running.shift_remove(job_id) else {
            return Ok(());
        };
        let walltime = running.batch.walltime;
        for rec in running.executors.values() {
            self.kernel.kill(rec.actor);
            let _ = self.kernel.platform_mut(|p, now| {
                p.adjust_active_cores(&rec.host, -i64::from(rec.cores), now)
            });
        }
        let cause = FailureCause::JobTimeout { walltime };
        running.batch.job.borrow_mut().discontinue(cause.clone(), ctx.now());
        if let Some(child) = &running.pilot_child {
            child.terminate_all(ctx, None);
            ctx.dput(
                &running.submission.notify,
                PilotExpiredNotification { job: running.batch.job.clone() },
                self.payloads.get(MessagePayload::JobFailedNotification),
            )?;
        } else {
            ctx.dput(
                &running.submission.notify,
                JobFailedNotification {
                    job: running.batch.job.clone(),
                    service: self.name.clone(),
                    cause,
                },
                self.payloads.get(MessagePayload::JobFailedNotification),
            )?;
        }
        self.release_nodes(&running);
        self.rebuild_reservations(ctx.now());
        self.scheduling_pass(ctx)
    }

    fn terminate_job(&self, ctx: &SimContext, job: &JobRef) -> Result<(), FailureCause> {
        let job_id = job.borrow().id().clone();
        // Pending: cancel the queue entry.
        {
            let mut st = self.state.borrow_mut();
            if let Some(pos) =
                st.queue.iter().position(|q| q.batch.job.borrow().id() == &job_id)
            {
                let q = st.queue.remove(pos);
                drop(st);
                q.batch.job.borrow_mut().discontinue(FailureCause::JobKilled, ctx.now());
                return Ok(());
            }
        }
        let Some(running) = self.state.borrow_mut().running.shift_remove(&job_id) else {
            return Err(FailureCause::JobCannotBeTerminated {
                state: job.borrow().state().to_string(),
            });
        };
        for rec in running.executors.values() {
            self.kernel.kill(rec.actor);
            let _ = self.kernel.platform_mut(|p, now| {
                p.adjust_active_cores(&rec.host, -i64::from(rec.cores), now)
            });
        }
        if let Some(child) = &running.pilot_child {
            child.terminate_all(ctx, None);
        }
        running.batch.job.borrow_mut().discontinue(FailureCause::JobKilled, ctx.now());
        self.release_nodes(&running);
        Ok(())
    }

    fn release_nodes(&self, running: &RunningBatch) {
        let mut st = self.state.borrow_mut();
        for (host, cores) in &running.batch.allocation {
            if let Some(slot) = st.nodes.get_mut(host) {
                slot.idle_cores = match self.algorithm {
                    // Whole-node algorithms zeroed the node.
                    BatchAlgorithm::EasyBf | BatchAlgorithm::ConservativeBf => slot.total_cores,
                    BatchAlgorithm::Fcfs => (slot.idle_cores + cores).min(slot.total_cores),
                };
            }
        }
    }

    /// Start-time predictions for hypothetical jobs. Exact under
    /// FCFS + first-fit; every other combination answers `-1.0`.
    pub fn start_time_estimates(
        &self,
        probes: &[(String, u32, u32, f64)],
        now: f64,
    ) -> Vec<(String, f64)> {
        if self.algorithm != BatchAlgorithm::Fcfs
            || self.host_selection != HostSelection::FirstFit
        {
            return probes.iter().map(|(id, ..)| (id.clone(), -1.0)).collect();
        }
        let st = self.state.borrow();
        let total = st.nodes.len() as u32;
        let mut timeline = AvailabilityTimeline::new(total);
        for r in st.running.values() {
            if let Some(deadline) = r.batch.deadline() {
                timeline.commit(now, deadline, r.batch.num_nodes);
            }
        }
        for q in &st.queue {
            let start = timeline.earliest_start(now, q.batch.num_nodes, q.batch.walltime);
            timeline.commit(start, start + q.batch.walltime, q.batch.num_nodes);
        }
        probes
            .iter()
            .map(|(id, n, _c, t)| {
                if *n > total {
                    (id.clone(), -1.0)
                } else {
                    (id.clone(), timeline.earliest_start(now, *n, *t))
                }
            })
            .collect()
    }
}

fn free_whole_nodes(st: &BatchState) -> u32 {
    st.nodes.values().filter(|s| s.idle_cores == s.total_cores).count() as u32
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
