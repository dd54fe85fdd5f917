// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The discrete-event kernel: a single-threaded cooperative executor
//! with a virtual clock.
//!
//! Actors are futures polled from a ready queue. The only suspension
//! points are the futures this module hands out (sleep, compute, send,
//! receive); while any actor is runnable the clock does not move. When
//! the ready queue drains, the earliest scheduled event fires and the
//! clock jumps to its date. Same-date events are ordered by the issuing
//! actor's id, then issue order, so runs are reproducible.

use crate::actor::{ActorId, ActorSlot, ActorWaker, ReadyQueue};
use crate::commport::{AnyMessage, Commport, Message, PortId};
use crate::error::KernelError;
use crate::platform::Platform;
use futures_util::future::LocalBoxFuture;
use futures_util::task::waker;
use futures_util::FutureExt;
use gantry_core::HostName;
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Kernel construction knobs.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Total commport names available; exhaustion is a hard error.
    pub commport_pool_size: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { commport_pool_size: 50_000 }
    }
}

struct PortState {
    queue: VecDeque<Box<dyn Message>>,
    waiters: Vec<Waker>,
}

enum EventKind {
    Wake(ActorId),
    Deliver {
        port: PortId,
        msg: Box<dyn Message>,
        /// Set by alarm handles to cancel an undelivered message.
        cancelled: Option<Rc<Cell<bool>>>,
    },
}

struct EventEntry {
    time: f64,
    actor: usize,
    seq: u64,
    kind: EventKind,
}

impl PartialEq for EventEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for EventEntry {}

impl PartialOrd for EventEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.actor.cmp(&other.actor))
            .then(self.seq.cmp(&other.seq))
    }
}

struct KernelState {
    now: f64,
    seq: u64,
    actors: Vec<ActorSlot>,
    ready: ReadyQueue,
    heap: BinaryHeap<Reverse<EventEntry>>,
    ports: Vec<PortState>,
    pool_size: usize,
    platform: Platform,
    /// Latest scheduled arrival per (sender, port), so later sends can
    /// never overtake earlier ones on the same pair.
    last_arrival: std::collections::HashMap<(usize, usize), f64>,
}

/// Shared handle to the kernel. Everything in the simulation clones
/// this; the state behind it is single-threaded.
#[derive(Clone)]
pub struct Kernel {
    state: Rc<RefCell<KernelState>>,
}

impl Kernel {
    pub fn new(platform: Platform, config: KernelConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(KernelState {
                now: 0.0,
                seq: 0,
                actors: Vec::new(),
                ready: Arc::new(Mutex::new(VecDeque::new())),
                heap: BinaryHeap::new(),
                ports: Vec::new(),
                pool_size: config.commport_pool_size,
                platform,
                last_arrival: std::collections::HashMap::new(),
            })),
        }
    }

    /// Current simulated date, seconds.
    pub fn now(&self) -> f64 {
        self.state.borrow().now
    }

    /// Read-only platform access.
    pub fn platform<R>(&self, f: impl FnOnce(&Platform) -> R) -> R {
        f(&self.state.borrow().platform)
    }

    /// Mutable platform access (energy integration, host state).
    pub fn platform_mut<R>(&self, f: impl FnOnce(&mut Platform, f64) -> R) -> R {
        let mut st = self.state.borrow_mut();
        let now = st.now;
        f(&mut st.platform, now)
    }

    /// Allocate a commport owned (for timing purposes) by `host`.
    pub fn create_commport(
        &self,
        label: &str,
        host: &HostName,
    ) -> Result<Commport, KernelError> {
        let mut st = self.state.borrow_mut();
        if st.ports.len() >= st.pool_size {
            return Err(KernelError::PortPoolExhausted(st.pool_size));
        }
        let id = PortId(st.ports.len());
        let name = SmolStr::new(format!("{label}-{}", id.0));
        st.ports.push(PortState { queue: VecDeque::new(), waiters: Vec::new() });
        Ok(Commport { id, name, owner_host: host.clone() })
    }

    /// Spawn an actor pinned to `host`. The actor body receives a
    /// [`SimContext`] and runs until it returns or is killed.
    pub fn spawn<F, Fut>(
        &self,
        name: &str,
        host: &HostName,
        daemon: bool,
        body: F,
    ) -> Result<ActorId, KernelError>
    where
        F: FnOnce(SimContext) -> Fut,
        Fut: Future<Output = Result<(), KernelError>> + 'static,
    {
        self.platform(|p| p.host(host).map(|_| ()))?;
        let actor_name = SmolStr::new(name);
        // Reserve the slot before calling `body`: the closure may itself
        // spawn actors while building its future.
        let id = {
            let mut st = self.state.borrow_mut();
            let id = ActorId(st.actors.len());
            st.actors.push(ActorSlot {
                name: actor_name.clone(),
                host: host.clone(),
                daemon,
                future: None,
                done: false,
                kill_requested: false,
                suspended: false,
                suspended_at: 0.0,
                suspend_credit: 0.0,
                deferred_wake: false,
            });
            id
        };
        let ctx = SimContext { kernel: self.clone(), actor: id, host: host.clone() };
        let fut: LocalBoxFuture<'static, Result<(), KernelError>> = body(ctx)
            .map(move |res| {
                if let Err(ref e) = res {
                    tracing::debug!(actor = %actor_name, error = %e, "actor exited with error");
                }
                res
            })
            .boxed_local();
        let mut st = self.state.borrow_mut();
        st.actors[id.0].future = Some(fut);
        st.ready.lock().push_back(id);
        Ok(id)
    }

    /// Request an actor's death. Its future is dropped at the next safe
    /// point; the actor observes nothing (no finaliser). Work-state
    /// cleanup is the killer's responsibility.
    pub fn kill(&self, id: ActorId) {
        let mut st = self.state.borrow_mut();
        if let Some(slot) = st.actors.get_mut(id.0) {
            if slot.is_live() {
                slot.kill_requested = true;
            }
        }
    }

    pub fn is_live(&self, id: ActorId) -> bool {
        self.state.borrow().actors.get(id.0).map(ActorSlot::is_live).unwrap_or(false)
    }

    /// Mark a host down: kills nothing, but every pending suspension of
    /// an actor pinned to the host resolves to a host-down error at its
    /// next poll, and the actors are woken so they observe it.
    pub fn set_host_down(&self, host: &HostName) -> Result<(), KernelError> {
        let mut st = self.state.borrow_mut();
        let now = st.now;
        st.platform.set_host_down(host, now)?;
        let mut ready = st.ready.lock();
        for (i, slot) in st.actors.iter().enumerate() {
            if slot.is_live() && &slot.host == host && !ready.contains(&ActorId(i)) {
                ready.push_back(ActorId(i));
            }
        }
        Ok(())
    }

    pub fn set_host_up(&self, host: &HostName) -> Result<(), KernelError> {
        let mut st = self.state.borrow_mut();
        let now = st.now;
        st.platform.set_host_up(host, now)?;
        Ok(())
    }

    /// Pause an actor: it is no longer polled, and its in-flight sleeps
    /// stretch by the suspension so no progress accrues.
    pub fn suspend(&self, id: ActorId) {
        let mut st = self.state.borrow_mut();
        let now = st.now;
        if let Some(slot) = st.actors.get_mut(id.0) {
            if slot.is_live() && !slot.suspended {
                slot.suspended = true;
                slot.suspended_at = now;
            }
        }
    }

    /// Undo [`Kernel::suspend`]; the pause is credited to pending
    /// sleeps and any deferred wake is replayed.
    pub fn resume(&self, id: ActorId) {
        let mut st = self.state.borrow_mut();
        let now = st.now;
        let Some(slot) = st.actors.get_mut(id.0) else { return };
        if !slot.is_live() || !slot.suspended {
            return;
        }
        slot.suspended = false;
        slot.suspend_credit += now - slot.suspended_at;
        if std::mem::take(&mut slot.deferred_wake) {
            let mut ready = st.ready.lock();
            if !ready.contains(&id) {
                ready.push_back(id);
            }
        }
    }

    pub(crate) fn suspend_credit(&self, id: ActorId) -> f64 {
        self.state.borrow().actors.get(id.0).map(|s| s.suspend_credit).unwrap_or(0.0)
    }

    /// Schedule delivery of `msg` to `port` at absolute `date`.
    ///
    /// `from_actor` orders same-date events; `cancel` lets alarm handles
    /// retract an undelivered message.
    pub(crate) fn schedule_delivery(
        &self,
        port: PortId,
        msg: Box<dyn Message>,
        date: f64,
        from_actor: usize,
        cancel: Option<Rc<Cell<bool>>>,
    ) {
        let mut st = self.state.borrow_mut();
        let seq = st.seq;
        st.seq += 1;
        let time = date.max(st.now);
        st.heap.push(Reverse(EventEntry {
            time,
            actor: from_actor,
            seq,
            kind: EventKind::Deliver { port, msg, cancelled: cancel },
        }));
    }

    /// Schedule a send from `sender`, clamping the arrival so deliveries
    /// on the same sender -> port pair stay in send order. Returns the
    /// arrival date.
    pub(crate) fn schedule_send(
        &self,
        port: PortId,
        msg: Box<dyn Message>,
        delay: f64,
        sender: ActorId,
    ) -> f64 {
        let mut st = self.state.borrow_mut();
        let arrival = (st.now + delay)
            .max(st.last_arrival.get(&(sender.0, port.0)).copied().unwrap_or(0.0));
        st.last_arrival.insert((sender.0, port.0), arrival);
        let seq = st.seq;
        st.seq += 1;
        st.heap.push(Reverse(EventEntry {
            time: arrival,
            actor: sender.0,
            seq,
            kind: EventKind::Deliver { port, msg, cancelled: None },
        }));
        arrival
    }

    pub(crate) fn schedule_wake(&self, id: ActorId, date: f64) {
        let mut st = self.state.borrow_mut();
        let seq = st.seq;
        st.seq += 1;
        let time = date.max(st.now);
        st.heap.push(Reverse(EventEntry { time, actor: id.0, seq, kind: EventKind::Wake(id) }));
    }

    /// Discard any queued messages on `port` (actor restart).
    pub fn reset_port(&self, port: &Commport) {
        let mut st = self.state.borrow_mut();
        st.ports[port.id.0].queue.clear();
    }

    /// Fire-and-forget send from outside any actor (setup code); charges
    /// no network time.
    pub fn post(&self, port: &Commport, msg: impl Message) {
        let now = self.now();
        self.schedule_delivery(port.id, Box::new(msg), now, usize::MAX, None);
    }

    /// Run until every non-daemon actor has returned.
    ///
    /// Returns `Deadlock` if live actors remain but no event is pending,
    /// and propagates a fatal failure from any actor.
    pub fn run(&self) -> Result<(), KernelError> {
        loop {
            self.reap_kills();
            loop {
                let next = self.state.borrow().ready.lock().pop_front();
                let Some(id) = next else { break };
                let suspended = {
                    let mut st = self.state.borrow_mut();
                    match st.actors.get_mut(id.0) {
                        Some(slot) if slot.suspended => {
                            slot.deferred_wake = true;
                            true
                        }
                        _ => false,
                    }
                };
                if suspended {
                    continue;
                }
                self.poll_actor(id)?;
                self.reap_kills();
            }
            let (live_nondaemon, live, has_event) = {
                let st = self.state.borrow();
                let live_nondaemon =
                    st.actors.iter().filter(|a| a.is_live() && !a.daemon).count();
                let live = st.actors.iter().filter(|a| a.is_live()).count();
                (live_nondaemon, live, !st.heap.is_empty())
            };
            if live_nondaemon == 0 {
                return Ok(());
            }
            if !has_event {
                return Err(KernelError::Deadlock { live });
            }
            self.advance_and_fire();
        }
    }

    fn reap_kills(&self) {
        let doomed: Vec<LocalBoxFuture<'static, Result<(), KernelError>>> = {
            let mut st = self.state.borrow_mut();
            let mut futures = Vec::new();
            for slot in &mut st.actors {
                if slot.kill_requested && !slot.done {
                    slot.done = true;
                    if let Some(f) = slot.future.take() {
                        futures.push(f);
                    }
                }
            }
            futures
        };
        // Dropped outside the borrow: destructors may touch the kernel.
        drop(doomed);
    }

    fn poll_actor(&self, id: ActorId) -> Result<(), KernelError> {
        let (fut, ready) = {
            let mut st = self.state.borrow_mut();
            let Some(slot) = st.actors.get_mut(id.0) else { return Ok(()) };
            if slot.done || slot.kill_requested {
                return Ok(());
            }
            let Some(fut) = slot.future.take() else { return Ok(()) };
            (fut, st.ready.clone())
        };
        let wk = waker(Arc::new(ActorWaker { id, ready }));
        let mut cx = Context::from_waker(&wk);
        let mut fut = fut;
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(result) => {
                let name = {
                    let mut st = self.state.borrow_mut();
                    st.actors[id.0].done = true;
                    st.actors[id.0].name.clone()
                };
                match result {
                    Err(KernelError::Failure(cause)) if cause.is_fatal() => {
                        tracing::error!(actor = %name, %cause, "fatal failure");
                        return Err(KernelError::Failure(cause));
                    }
                    Err(e) => {
                        tracing::debug!(actor = %name, error = %e, "actor finished with error");
                    }
                    Ok(()) => {
                        tracing::trace!(actor = %name, "actor finished");
                    }
                }
            }
            Poll::Pending => {
                let mut st = self.state.borrow_mut();
                let slot = &mut st.actors[id.0];
                if slot.kill_requested {
                    slot.done = true;
                    drop(st);
                    drop(fut);
                } else {
                    slot.future = Some(fut);
                }
            }
        }
        Ok(())
    }

    fn advance_and_fire(&self) {
        let entry = {
            let mut st = self.state.borrow_mut();
            st.heap.pop()
        };
        let Some(Reverse(entry)) = entry else { return };
        let wakers: Vec<Waker> = {
            let mut st = self.state.borrow_mut();
            debug_assert!(entry.time >= st.now, "clock must not go backwards");
            st.now = st.now.max(entry.time);
            match entry.kind {
                EventKind::Wake(id) => {
                    if st.actors.get(id.0).map(ActorSlot::is_live).unwrap_or(false) {
                        let mut ready = st.ready.lock();
                        if !ready.contains(&id) {
                            ready.push_back(id);
                        }
                    }
                    Vec::new()
                }
                EventKind::Deliver { port, msg, cancelled } => {
                    if cancelled.map(|c| c.get()).unwrap_or(false) {
                        Vec::new()
                    } else {
                        let p = &mut st.ports[port.0];
                        p.queue.push_back(msg);
                        std::mem::take(&mut p.waiters)
                    }
                }
            }
        };
        for w in wakers {
            w.wake();
        }
    }
}

/// Per-actor capability handle: the only way an actor touches the
/// kernel. Every method that can advance time is a suspension point.
#[derive(Clone)]
pub struct SimContext {
    kernel: Kernel,
    actor: ActorId,
    host: HostName,
}

impl SimContext {
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor
    }

    pub fn host(&self) -> &HostName {
        &self.host
    }

    pub fn now(&self) -> f64 {
        self.kernel.now()
    }

    /// Suspend for `seconds` of simulated time.
    pub fn sleep(&self, seconds: f64) -> Sleep {
        Sleep {
            kernel: self.kernel.clone(),
            actor: self.actor,
            host: self.host.clone(),
            duration: seconds,
            target: None,
            scheduled: false,
            credit_at_start: 0.0,
            scheduled_target: f64::NEG_INFINITY,
        }
    }

    /// Suspend until the given absolute date.
    pub fn sleep_until(&self, date: f64) -> Sleep {
        Sleep {
            kernel: self.kernel.clone(),
            actor: self.actor,
            host: self.host.clone(),
            duration: 0.0,
            target: Some(date),
            scheduled: false,
            credit_at_start: 0.0,
            scheduled_target: f64::NEG_INFINITY,
        }
    }

    /// Run `flops` of sequential work at this host's core speed.
    pub async fn compute(&self, flops: f64) -> Result<(), KernelError> {
        let speed = self.kernel.platform(|p| p.core_speed(&self.host))?;
        self.sleep(flops / speed).await
    }

    pub fn create_commport(&self, label: &str) -> Result<Commport, KernelError> {
        self.kernel.create_commport(label, &self.host)
    }

    /// Blocking send: schedules delivery after the network time for
    /// `bytes` from this host to the port's owner host, and returns at
    /// the delivery date.
    pub async fn put(
        &self,
        port: &Commport,
        msg: impl Message,
        bytes: u64,
    ) -> Result<(), KernelError> {
        let delay = self
            .kernel
            .platform(|p| p.network_time(&self.host, &port.owner_host, bytes))?;
        let arrival = self.kernel.schedule_send(port.id, Box::new(msg), delay, self.actor);
        self.sleep_until(arrival).await
    }

    /// Fire-and-forget send; in-order per sender -> port pair.
    pub fn dput(
        &self,
        port: &Commport,
        msg: impl Message,
        bytes: u64,
    ) -> Result<(), KernelError> {
        let delay = self
            .kernel
            .platform(|p| p.network_time(&self.host, &port.owner_host, bytes))?;
        self.kernel.schedule_send(port.id, Box::new(msg), delay, self.actor);
        Ok(())
    }

    /// Blocking receive.
    pub fn get(&self, port: &Commport) -> Recv {
        self.recv_inner(port, None)
    }

    /// Blocking receive with a timeout; elapsing yields
    /// [`KernelError::Timeout`] (a `NETWORK_TIMEOUT` cause).
    pub fn get_timeout(&self, port: &Commport, seconds: f64) -> Recv {
        self.recv_inner(port, Some(seconds))
    }

    /// Receive and downcast, treating any other message type as a
    /// protocol error.
    pub async fn expect<M: Message>(&self, port: &Commport) -> Result<M, KernelError> {
        let msg = self.get(port).await?;
        msg.downcast::<M>().map_err(|other| KernelError::UnexpectedMessage {
            port: SmolStr::new(port.name()),
            got: other.type_name(),
        })
    }

    fn recv_inner(&self, port: &Commport, timeout: Option<f64>) -> Recv {
        Recv {
            kernel: self.kernel.clone(),
            actor: self.actor,
            host: self.host.clone(),
            port: port.id,
            port_name: SmolStr::new(port.name()),
            timeout,
            deadline: None,
            timer_set: false,
        }
    }

    /// Spawn a child actor (e.g. an action executor) on any host.
    pub fn spawn<F, Fut>(
        &self,
        name: &str,
        host: &HostName,
        body: F,
    ) -> Result<ActorId, KernelError>
    where
        F: FnOnce(SimContext) -> Fut,
        Fut: Future<Output = Result<(), KernelError>> + 'static,
    {
        self.kernel.spawn(name, host, false, body)
    }

    /// Spawn a child actor that must not hold the simulation open
    /// (helper streams, relays).
    pub fn spawn_daemon<F, Fut>(
        &self,
        name: &str,
        host: &HostName,
        body: F,
    ) -> Result<ActorId, KernelError>
    where
        F: FnOnce(SimContext) -> Fut,
        Fut: Future<Output = Result<(), KernelError>> + 'static,
    {
        self.kernel.spawn(name, host, true, body)
    }

    pub fn kill(&self, id: ActorId) {
        self.kernel.kill(id);
    }
}

/// Suspension until a simulated date.
pub struct Sleep {
    kernel: Kernel,
    actor: ActorId,
    host: HostName,
    duration: f64,
    target: Option<f64>,
    scheduled: bool,
    credit_at_start: f64,
    scheduled_target: f64,
}

impl Future for Sleep {
    type Output = Result<(), KernelError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let now = this.kernel.now();
        if !this.kernel.platform(|p| p.is_up(&this.host)) {
            return Poll::Ready(Err(KernelError::Platform(
                crate::platform::PlatformError::HostDown(this.host.clone()),
            )));
        }
        let target = match this.target {
            Some(t) => t,
            None => {
                let t = now + this.duration.max(0.0);
                this.target = Some(t);
                this.credit_at_start = this.kernel.suspend_credit(this.actor);
                t
            }
        };
        // Suspension while asleep pushes the deadline out.
        let credit = this.kernel.suspend_credit(this.actor) - this.credit_at_start;
        let target = target + credit.max(0.0);
        if now >= target {
            return Poll::Ready(Ok(()));
        }
        if !this.scheduled || target > this.scheduled_target {
            this.kernel.schedule_wake(this.actor, target);
            this.scheduled = true;
            this.scheduled_target = target;
        }
        Poll::Pending
    }
}

/// Suspension until a message (or a timeout) on a commport.
pub struct Recv {
    kernel: Kernel,
    actor: ActorId,
    host: HostName,
    port: PortId,
    port_name: SmolStr,
    timeout: Option<f64>,
    deadline: Option<f64>,
    timer_set: bool,
}

impl Future for Recv {
    type Output = Result<AnyMessage, KernelError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut st = this.kernel.state.borrow_mut();
        if !st.platform.is_up(&this.host) {
            return Poll::Ready(Err(KernelError::Platform(
                crate::platform::PlatformError::HostDown(this.host.clone()),
            )));
        }
        if let Some(msg) = st.ports[this.port.0].queue.pop_front() {
            return Poll::Ready(Ok(AnyMessage::from_boxed(msg)));
        }
        if let Some(t) = this.timeout {
            let deadline = *this.deadline.get_or_insert(st.now + t);
            if st.now >= deadline {
                return Poll::Ready(Err(KernelError::Timeout {
                    port: this.port_name.clone(),
                    timeout: t,
                }));
            }
            if !this.timer_set {
                let seq = st.seq;
                st.seq += 1;
                st.heap.push(Reverse(EventEntry {
                    time: deadline,
                    actor: this.actor.0,
                    seq,
                    kind: EventKind::Wake(this.actor),
                }));
                this.timer_set = true;
            }
        }
        st.ports[this.port.0].waiters.push(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
#[path = "sim_tests.rs"]
mod tests;
