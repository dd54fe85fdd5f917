// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Communicators: named rendezvous objects of fixed rank count, with
//! barrier, point-to-point exchange, and collective primitives.
//!
//! Members are actors (usually custom actions); each `join` claims the
//! next rank and a member commport. Lifetime is by reference count: the
//! communicator dies when the last handle drops.

use gantry_core::FailureCause;
use gantry_kernel::{Commport, SimContext};
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
struct PeerMessage {
    from: u32,
    bytes: u64,
}

#[derive(Debug)]
struct BarrierRelease;

struct CommState {
    size: u32,
    next_rank: u32,
    ports: IndexMap<u32, Commport>,
    barrier_arrivals: u32,
    barrier_waiters: Vec<Commport>,
}

/// Shared handle; clone freely into action closures.
#[derive(Clone)]
pub struct Communicator {
    name: SmolStr,
    state: Rc<RefCell<CommState>>,
}

impl Communicator {
    pub fn new(name: &str, size: u32) -> Self {
        Self {
            name: SmolStr::new(name),
            state: Rc::new(RefCell::new(CommState {
                size,
                next_rank: 0,
                ports: IndexMap::new(),
                barrier_arrivals: 0,
                barrier_waiters: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u32 {
        self.state.borrow().size
    }

    /// Claim the next rank in `[0, N)`. The member port lives on the
    /// joining actor's host, so exchanges are charged real network
    /// time.
    pub fn join(&self, ctx: &SimContext) -> Result<u32, FailureCause> {
        let mut st = self.state.borrow_mut();
        if st.next_rank >= st.size {
            return Err(FailureCause::fatal(format!(
                "communicator {} is full ({} ranks)",
                self.name, st.size
            )));
        }
        let rank = st.next_rank;
        st.next_rank += 1;
        let port = ctx
            .create_commport(&format!("comm-{}-{rank}", self.name))
            .map_err(FailureCause::from)?;
        st.ports.insert(rank, port);
        Ok(rank)
    }

    /// Block until every rank has arrived.
    pub async fn barrier(&self, ctx: &SimContext, rank: u32) -> Result<(), FailureCause> {
        let wait_port = {
            let mut st = self.state.borrow_mut();
            st.barrier_arrivals += 1;
            if st.barrier_arrivals == st.size {
                st.barrier_arrivals = 0;
                let waiters = std::mem::take(&mut st.barrier_waiters);
                for port in waiters {
                    ctx.dput(&port, BarrierRelease, 0).map_err(FailureCause::from)?;
                }
                None
            } else {
                let port = st.ports.get(&rank).cloned().ok_or_else(|| {
                    FailureCause::fatal(format!("rank {rank} has not joined"))
                })?;
                st.barrier_waiters.push(port.clone());
                Some(port)
            }
        };
        if let Some(port) = wait_port {
            ctx.expect::<BarrierRelease>(&port).await.map_err(FailureCause::from)?;
        }
        Ok(())
    }

    /// Send `bytes` to each addressed rank, then block until
    /// `min_responses` messages have arrived for this rank.
    pub async fn send_and_receive(
        &self,
        ctx: &SimContext,
        rank: u32,
        sends: &IndexMap<u32, u64>,
        min_responses: usize,
    ) -> Result<Vec<(u32, u64)>, FailureCause> {
        let my_port = self.member_port(rank)?;
        for (&to, &bytes) in sends {
            let port = self.member_port(to)?;
            ctx.put(&port, PeerMessage { from: rank, bytes }, bytes)
                .await
                .map_err(FailureCause::from)?;
        }
        let mut received = Vec::with_capacity(min_responses);
        while received.len() < min_responses {
            let msg =
                ctx.expect::<PeerMessage>(&my_port).await.map_err(FailureCause::from)?;
            received.push((msg.from, msg.bytes));
        }
        Ok(received)
    }

    /// Every rank sends `bytes` to every other rank and collects the
    /// other `N - 1` messages.
    pub async fn all_to_all(
        &self,
        ctx: &SimContext,
        rank: u32,
        bytes: u64,
    ) -> Result<(), FailureCause> {
        let size = self.size();
        let sends: IndexMap<u32, u64> =
            (0..size).filter(|&r| r != rank).map(|r| (r, bytes)).collect();
        self.send_and_receive(ctx, rank, &sends, (size - 1) as usize).await?;
        Ok(())
    }

    /// Root sends `bytes` to every other rank; the rest receive one
    /// message.
    pub async fn bcast(
        &self,
        ctx: &SimContext,
        rank: u32,
        root: u32,
        bytes: u64,
    ) -> Result<(), FailureCause> {
        if rank == root {
            let size = self.size();
            let sends: IndexMap<u32, u64> =
                (0..size).filter(|&r| r != root).map(|r| (r, bytes)).collect();
            self.send_and_receive(ctx, rank, &sends, 0).await?;
        } else {
            self.send_and_receive(ctx, rank, &IndexMap::new(), 1).await?;
        }
        Ok(())
    }

    fn member_port(&self, rank: u32) -> Result<Commport, FailureCause> {
        self.state
            .borrow()
            .ports
            .get(&rank)
            .cloned()
            .ok_or_else(|| FailureCause::fatal(format!("rank {rank} has not joined")))
    }
}

#[cfg(test)]
#[path = "communicator_tests.rs"]
mod tests;
