// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The file registry service: a process-wide `file -> locations` map
//! queried and mutated over commports, so it obeys the concurrency
//! model like every other service.

use gantry_core::{
    FailureCause, FileId, HostName, Location, MessagePayload, PayloadMap, ServiceName,
};
use gantry_kernel::{ActorId, Commport, Kernel, KernelError, SimContext};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

#[derive(Debug)]
pub struct RegistryAddRequest {
    pub reply_to: Commport,
    pub location: Location,
}

#[derive(Debug)]
pub struct RegistryAddAnswer;

#[derive(Debug)]
pub struct RegistryRemoveRequest {
    pub reply_to: Commport,
    pub location: Location,
}

#[derive(Debug)]
pub struct RegistryRemoveAnswer {
    pub removed: bool,
}

#[derive(Debug)]
pub struct RegistryLookupRequest {
    pub reply_to: Commport,
    pub file: FileId,
}

#[derive(Debug)]
pub struct RegistryLookupAnswer {
    pub locations: Vec<Location>,
}

/// Handle to the registry: clients address `port`.
#[derive(Debug, Clone)]
pub struct RegistryEndpoint {
    pub name: ServiceName,
    pub port: Commport,
    pub payloads: PayloadMap,
}

pub struct FileRegistryService {
    name: ServiceName,
    host: HostName,
    port: Commport,
    payloads: PayloadMap,
    kernel: Kernel,
    entries: Rc<RefCell<IndexMap<FileId, BTreeSet<Location>>>>,
    actor: RefCell<Option<ActorId>>,
}

impl FileRegistryService {
    pub fn new(
        kernel: &Kernel,
        name: &str,
        host: &str,
        payloads: PayloadMap,
    ) -> Result<Rc<Self>, KernelError> {
        let host = HostName::new(host);
        let port = kernel.create_commport(&format!("registry-{name}"), &host)?;
        Ok(Rc::new(Self {
            name: ServiceName::new(name),
            host,
            port,
            payloads,
            kernel: kernel.clone(),
            entries: Rc::new(RefCell::new(IndexMap::new())),
            actor: RefCell::new(None),
        }))
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn endpoint(&self) -> RegistryEndpoint {
        RegistryEndpoint {
            name: self.name.clone(),
            port: self.port.clone(),
            payloads: self.payloads.clone(),
        }
    }

    /// Known locations of a file (setup/inspection path).
    pub fn locations_of(&self, file: &FileId) -> Vec<Location> {
        self.entries.borrow().get(file).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// Record an entry directly (pre-launch staging).
    pub fn stage_entry(&self, location: &Location) {
        self.entries
            .borrow_mut()
            .entry(location.file().id().clone())
            .or_default()
            .insert(location.clone());
    }

    pub fn start(self: &Rc<Self>) -> Result<(), KernelError> {
        let svc = self.clone();
        let port = self.port.clone();
        let id = self.kernel.spawn(
            &format!("registry-{}", self.name),
            &self.host.clone(),
            true,
            move |ctx| async move {
                loop {
                    let msg = ctx.get(&port).await?;
                    svc.dispatch(&ctx, msg)?;
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

    fn dispatch(&self, ctx: &SimContext, msg: gantry_kernel::AnyMessage) -> Result<(), KernelError> {
        let msg = match msg.downcast::<RegistryAddRequest>() {
            Ok(req) => {
                self.stage_entry(&req.location);
                return ctx.dput(
                    &req.reply_to,
                    RegistryAddAnswer,
                    self.payloads.get(MessagePayload::RegistryAddAnswer),
                );
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<RegistryRemoveRequest>() {
            Ok(req) => {
                let removed = self
                    .entries
                    .borrow_mut()
                    .get_mut(req.location.file().id())
                    .map(|s| s.remove(&req.location))
                    .unwrap_or(false);
                return ctx.dput(
                    &req.reply_to,
                    RegistryRemoveAnswer { removed },
                    self.payloads.get(MessagePayload::RegistryRemoveAnswer),
                );
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<RegistryLookupRequest>() {
            Ok(req) => {
                let locations = self.locations_of(&req.file);
                return ctx.dput(
                    &req.reply_to,
                    RegistryLookupAnswer { locations },
                    self.payloads.get(MessagePayload::RegistryLookupAnswer),
                );
            }
            Err(m) => m,
        };
        tracing::warn!(service = %self.name, got = msg.type_name(), "unexpected message");
        Ok(())
    }
}

/// Register a location.
pub async fn add_entry(
    ctx: &SimContext,
    ep: &RegistryEndpoint,
    location: &Location,
) -> Result<(), FailureCause> {
    let reply_to = ctx.create_commport("reg-add").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        RegistryAddRequest { reply_to: reply_to.clone(), location: location.clone() },
        ep.payloads.get(MessagePayload::RegistryAddRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    ctx.expect::<RegistryAddAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    Ok(())
}

/// Remove a location; absent entries are not an error.
pub async fn remove_entry(
    ctx: &SimContext,
    ep: &RegistryEndpoint,
    location: &Location,
) -> Result<bool, FailureCause> {
    let reply_to = ctx.create_commport("reg-remove").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        RegistryRemoveRequest { reply_to: reply_to.clone(), location: location.clone() },
        ep.payloads.get(MessagePayload::RegistryRemoveRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer =
        ctx.expect::<RegistryRemoveAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    Ok(answer.removed)
}

/// All known locations of `file`; empty when unregistered.
pub async fn lookup_entry(
    ctx: &SimContext,
    ep: &RegistryEndpoint,
    file: &FileId,
) -> Result<Vec<Location>, FailureCause> {
    let reply_to = ctx.create_commport("reg-lookup").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        RegistryLookupRequest { reply_to: reply_to.clone(), file: file.clone() },
        ep.payloads.get(MessagePayload::RegistryLookupRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer =
        ctx.expect::<RegistryLookupAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    Ok(answer.locations)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
