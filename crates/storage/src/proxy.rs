// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cache-through proxy storage: a supervisor node fronting a set of
//! leaf storage services (an XRootD-style tree collapses into nested
//! proxies).
//!
//! Protocol: lookups and reads try the TTL'd replica cache, then forward
//! to children in order; writes and deletes go to the leaf targeted by
//! the [`ProxyLocation`]; successes populate the cache.

use crate::client;
use crate::messages::*;
use crate::{StorageEndpoint, StorageError};
use gantry_core::{
    FailureCause, FileId, HostName, Location, MessagePayload, PayloadMap, PropertyMap,
    ServiceName, ServiceProperty,
};
use gantry_kernel::{ActorId, Commport, Kernel, KernelError, SimContext};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

/// A location routed through a proxy: the proxy fields requests, the
/// target leaf stores the bytes.
#[derive(Debug, Clone)]
pub struct ProxyLocation {
    pub proxy: ServiceName,
    pub target_leaf: ServiceName,
    pub location: Location,
}

impl ProxyLocation {
    pub fn new(proxy: &ServiceName, target_leaf: &ServiceName, location: Location) -> Self {
        Self { proxy: proxy.clone(), target_leaf: target_leaf.clone(), location }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    child: usize,
    cached_at: f64,
}

struct State {
    cache: IndexMap<FileId, CacheEntry>,
}

pub struct ProxyStorageService {
    name: ServiceName,
    host: HostName,
    port: Commport,
    payloads: PayloadMap,
    children: Vec<StorageEndpoint>,
    cache_ttl: f64,
    /// Skip the tree walk: probe children state-side, charging no
    /// simulated time for the walk.
    reduced: bool,
    kernel: Kernel,
    state: Rc<RefCell<State>>,
    actor: RefCell<Option<ActorId>>,
}

impl ProxyStorageService {
    pub fn new(
        kernel: &Kernel,
        name: &str,
        host: &str,
        children: Vec<StorageEndpoint>,
        props: &PropertyMap,
        payloads: PayloadMap,
    ) -> Result<Rc<Self>, StorageError> {
        if children.is_empty() {
            return Err(StorageError::NoChildren(name.to_string()));
        }
        let host = HostName::new(host);
        let cache_ttl = props.get_f64(ServiceProperty::CacheMaxLifetime, f64::INFINITY)?;
        let reduced = props.get_bool(ServiceProperty::ReducedSimulation, false)?;
        let port = kernel.create_commport(&format!("proxy-{name}"), &host)?;
        Ok(Rc::new(Self {
            name: ServiceName::new(name),
            host,
            port,
            payloads,
            children,
            cache_ttl,
            reduced,
            kernel: kernel.clone(),
            state: Rc::new(RefCell::new(State { cache: IndexMap::new() })),
            actor: RefCell::new(None),
        }))
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn endpoint(&self) -> StorageEndpoint {
        StorageEndpoint {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port.clone(),
            payloads: self.payloads.clone(),
        }
    }

    pub fn start(self: &Rc<Self>) -> Result<(), KernelError> {
        let svc = self.clone();
        let port = self.port.clone();
        let id = self.kernel.spawn(
            &format!("proxy-{}", self.name),
            &self.host.clone(),
            true,
            move |ctx| async move {
                loop {
                    let msg = ctx.get(&port).await?;
                    svc.clone().dispatch(&ctx, msg)?;
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

    /// Every request is handled in a child actor: a forwarded lookup can
    /// take network round-trips and must not block the supervisor loop.
    fn dispatch(
        self: Rc<Self>,
        ctx: &SimContext,
        msg: gantry_kernel::AnyMessage,
    ) -> Result<(), KernelError> {
        let msg = match msg.downcast::<FileLookupRequest>() {
            Ok(req) => {
                let svc = self.clone();
                ctx.spawn_daemon(
                    &format!("{}-lookup", self.name),
                    &self.host.clone(),
                    move |cctx| async move {
                        let found = svc.resolve_child(&cctx, &req.location).await.is_some();
                        cctx.dput(
                            &req.reply_to,
                            FileLookupAnswer { found },
                            svc.payloads.get(MessagePayload::FileLookupAnswer),
                        )
                    },
                )?;
                return Ok(());
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<FileReadRequest>() {
            Ok(req) => {
                let svc = self.clone();
                ctx.spawn_daemon(
                    &format!("{}-read", self.name),
                    &self.host.clone(),
                    move |cctx| async move {
                        match svc.resolve_child(&cctx, &req.location).await {
                            Some(child) => {
                                // Hand the stream off to the child
                                // holding the replica.
                                cctx.put(
                                    &svc.children[child].port,
                                    req,
                                    svc.payloads.get(MessagePayload::FileReadRequest),
                                )
                                .await
                            }
                            None => {
                                let cause = FailureCause::FileNotFound {
                                    file: req.location.file().id().clone(),
                                    location: req.location.to_string(),
                                };
                                cctx.dput(
                                    &req.reply_to,
                                    FileReadAnswer { result: Err(cause) },
                                    svc.payloads.get(MessagePayload::FileReadAnswer),
                                )
                            }
                        }
                    },
                )?;
                return Ok(());
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<ProxyTargetedRequest>() {
            Ok(req) => {
                let svc = self.clone();
                ctx.spawn_daemon(
                    &format!("{}-fwd", self.name),
                    &self.host.clone(),
                    move |cctx| async move { svc.forward_targeted(&cctx, req).await },
                )?;
                return Ok(());
            }
            Err(m) => m,
        };
        tracing::warn!(service = %self.name, got = msg.type_name(), "unexpected message");
        Ok(())
    }

    /// Find a child holding the file: fresh cache entry first, else walk
    /// the children (or probe them directly under reduced simulation).
    /// A hit (re)populates the cache.
    async fn resolve_child(&self, ctx: &SimContext, location: &Location) -> Option<usize> {
        let id = location.file().id().clone();
        let now = ctx.now();
        {
            let st = self.state.borrow();
            if let Some(entry) = st.cache.get(&id) {
                if now - entry.cached_at <= self.cache_ttl {
                    return Some(entry.child);
                }
            }
        }
        for (i, child) in self.children.iter().enumerate() {
            let found = if self.reduced {
                // Collapsed walk: one zero-latency probe per child.
                client::lookup(ctx, child, location).await.unwrap_or(false)
            } else {
                match client::lookup(ctx, child, location).await {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::debug!(service = %self.name, child = %child.name, error = %e, "lookup failed");
                        false
                    }
                }
            };
            if found {
                self.state
                    .borrow_mut()
                    .cache
                    .insert(id, CacheEntry { child: i, cached_at: now });
                return Some(i);
            }
        }
        None
    }

    async fn forward_targeted(
        &self,
        ctx: &SimContext,
        req: ProxyTargetedRequest,
    ) -> Result<(), KernelError> {
        let Some((idx, child)) = self
            .children
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == req.target_leaf)
        else {
            let cause = FailureCause::ServiceDown { service: req.target_leaf.clone() };
            return match req.op {
                ProxyOp::Write { reply_to, .. } => ctx.dput(
                    &reply_to,
                    FileWriteAnswer { result: Err(cause) },
                    self.payloads.get(MessagePayload::FileWriteAnswer),
                ),
                ProxyOp::Delete { reply_to, .. } => ctx.dput(
                    &reply_to,
                    FileDeleteAnswer { result: Err(cause) },
                    self.payloads.get(MessagePayload::FileDeleteAnswer),
                ),
            };
        };
        match req.op {
            ProxyOp::Write { reply_to, location } => {
                let outcome = client::write_file(ctx, child, &location).await;
                if outcome.is_ok() {
                    self.state.borrow_mut().cache.insert(
                        location.file().id().clone(),
                        CacheEntry { child: idx, cached_at: ctx.now() },
                    );
                }
                ctx.dput(
                    &reply_to,
                    FileWriteFinished { result: outcome },
                    self.payloads.get(MessagePayload::FileWriteAnswer),
                )
            }
            ProxyOp::Delete { reply_to, location } => {
                let outcome = client::delete(ctx, child, &location).await;
                self.state.borrow_mut().cache.shift_remove(location.file().id());
                ctx.dput(
                    &reply_to,
                    FileDeleteAnswer { result: outcome },
                    self.payloads.get(MessagePayload::FileDeleteAnswer),
                )
            }
        }
    }
}

/// Write/delete routed to a specific leaf through the proxy.
#[derive(Debug)]
pub struct ProxyTargetedRequest {
    pub target_leaf: ServiceName,
    pub op: ProxyOp,
}

#[derive(Debug)]
pub enum ProxyOp {
    Write { reply_to: Commport, location: Location },
    Delete { reply_to: Commport, location: Location },
}

/// Write through the proxy to the leaf named by `loc`.
pub async fn write_through(
    ctx: &SimContext,
    proxy: &StorageEndpoint,
    loc: &ProxyLocation,
) -> Result<(), FailureCause> {
    let reply_to = ctx.create_commport("proxy-write").map_err(FailureCause::from)?;
    ctx.put(
        &proxy.port,
        ProxyTargetedRequest {
            target_leaf: loc.target_leaf.clone(),
            op: ProxyOp::Write { reply_to: reply_to.clone(), location: loc.location.clone() },
        },
        proxy.payloads.get(MessagePayload::FileWriteRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let finished =
        ctx.expect::<FileWriteFinished>(&reply_to).await.map_err(FailureCause::from)?;
    finished.result
}

/// Delete through the proxy at the leaf named by `loc`.
pub async fn delete_through(
    ctx: &SimContext,
    proxy: &StorageEndpoint,
    loc: &ProxyLocation,
) -> Result<(), FailureCause> {
    let reply_to = ctx.create_commport("proxy-delete").map_err(FailureCause::from)?;
    ctx.put(
        &proxy.port,
        ProxyTargetedRequest {
            target_leaf: loc.target_leaf.clone(),
            op: ProxyOp::Delete { reply_to: reply_to.clone(), location: loc.location.clone() },
        },
        proxy.payloads.get(MessagePayload::FileDeleteRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer = ctx.expect::<FileDeleteAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    answer.result
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
