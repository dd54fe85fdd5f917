// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actor bookkeeping: one cooperatively scheduled future per simulated
//! process, pinned to a host.

use crate::error::KernelError;
use futures_util::future::LocalBoxFuture;
use futures_util::task::ArcWake;
use gantry_core::HostName;
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::collections::VecDeque;
use std::sync::Arc;

/// Numeric actor identity; also the deterministic tie-break for
/// same-date events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub(crate) usize);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

pub(crate) struct ActorSlot {
    pub name: SmolStr,
    pub host: HostName,
    pub daemon: bool,
    /// Present while the actor is alive and not currently being polled.
    pub future: Option<LocalBoxFuture<'static, Result<(), KernelError>>>,
    pub done: bool,
    /// Set by `kill`; the run loop drops the future at the next safe
    /// point.
    pub kill_requested: bool,
    /// Suspended actors are not polled; their sleeps stretch by the
    /// accumulated suspension credit so no progress accrues.
    pub suspended: bool,
    pub suspended_at: f64,
    pub suspend_credit: f64,
    /// Wake arrived while suspended; re-queued on resume.
    pub deferred_wake: bool,
}

impl ActorSlot {
    pub fn is_live(&self) -> bool {
        !self.done
    }
}

/// The ready queue is the only kernel structure wakers touch, so it
/// lives outside the `RefCell` (wakers may fire while the kernel state
/// is borrowed).
pub(crate) type ReadyQueue = Arc<Mutex<VecDeque<ActorId>>>;

pub(crate) struct ActorWaker {
    pub id: ActorId,
    pub ready: ReadyQueue,
}

impl ArcWake for ActorWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let mut q = arc_self.ready.lock();
        if !q.contains(&arc_self.id) {
            q.push_back(arc_self.id);
        }
    }
}
