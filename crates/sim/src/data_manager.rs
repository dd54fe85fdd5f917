// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The data-movement manager: asynchronous file transfers on behalf of
//! a controller, reported back as copy events.

use crate::registry::RegistryRef;
use gantry_core::{ExecutionEvent, FailureCause, Location};
use gantry_kernel::{Commport, SimContext};
use gantry_storage::client;
use std::rc::Rc;

pub struct DataMovementManager {
    ctx: SimContext,
    event_port: Commport,
    registry: RegistryRef,
}

impl DataMovementManager {
    pub(crate) fn new(ctx: &SimContext, event_port: &Commport, registry: RegistryRef) -> Rc<Self> {
        Rc::new(Self { ctx: ctx.clone(), event_port: event_port.clone(), registry })
    }

    fn endpoints(
        &self,
        src: &Location,
        dst: &Location,
    ) -> Result<(gantry_storage::StorageEndpoint, gantry_storage::StorageEndpoint), FailureCause>
    {
        let src_name = src.service().ok_or_else(|| FailureCause::NoScratchSpace {
            service: "data-movement-manager".into(),
        })?;
        let dst_name = dst.service().ok_or_else(|| FailureCause::NoScratchSpace {
            service: "data-movement-manager".into(),
        })?;
        let src_ep = self
            .registry
            .storage_endpoint(src_name)
            .ok_or_else(|| FailureCause::ServiceDown { service: src_name.clone() })?;
        let dst_ep = self
            .registry
            .storage_endpoint(dst_name)
            .ok_or_else(|| FailureCause::ServiceDown { service: dst_name.clone() })?;
        Ok((src_ep, dst_ep))
    }

    /// Fire off a copy; completion or failure arrives later as a
    /// `FileCopy*` event on the controller's port.
    pub fn initiate_file_copy(&self, src: Location, dst: Location) -> Result<(), FailureCause> {
        let (src_ep, dst_ep) = self.endpoints(&src, &dst)?;
        let events = self.event_port.clone();
        self.ctx
            .spawn_daemon("data-copy", self.ctx.host(), move |cctx| async move {
                let file = src.file().clone();
                let outcome = client::copy_file(&cctx, &dst_ep, &src_ep, &src, &dst).await;
                let event = match outcome {
                    Ok(()) => ExecutionEvent::FileCopyCompleted { file, src, dst },
                    Err(cause) => ExecutionEvent::FileCopyFailed { file, src, dst, cause },
                };
                cctx.dput(&events, event, 0)?;
                Ok(())
            })
            .map_err(FailureCause::from)?;
        Ok(())
    }

    /// Blocking copy in the caller's cooperative slot.
    pub async fn do_synchronous_file_copy(
        &self,
        ctx: &SimContext,
        src: &Location,
        dst: &Location,
    ) -> Result<(), FailureCause> {
        let (src_ep, dst_ep) = self.endpoints(src, dst)?;
        client::copy_file(ctx, &dst_ep, &src_ep, src, dst).await
    }

    /// Blocking delete at the location's service.
    pub async fn delete_file(
        &self,
        ctx: &SimContext,
        location: &Location,
    ) -> Result<(), FailureCause> {
        let name = location.service().ok_or_else(|| FailureCause::NoScratchSpace {
            service: "data-movement-manager".into(),
        })?;
        let ep = self
            .registry
            .storage_endpoint(name)
            .ok_or_else(|| FailureCause::ServiceDown { service: name.clone() })?;
        client::delete(ctx, &ep, location).await
    }
}

impl std::fmt::Debug for DataMovementManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataMovementManager").finish()
    }
}
