// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution controllers: the user-authored actors that drive a
//! simulation by creating managers, submitting jobs, and processing
//! events.

use crate::data_manager::DataMovementManager;
use crate::job_manager::JobManager;
use crate::registry::{ComputeRef, RegistryRef};
use async_trait::async_trait;
use gantry_core::{ExecutionEvent, FailureCause, HostName, ServiceName};
use gantry_kernel::{Alarm, Commport, KernelError, SimContext};
use gantry_storage::StorageEndpoint;
use std::rc::Rc;

/// User-authored orchestration logic. One controller maps onto one
/// actor; `run` is its entire lifetime.
#[async_trait(?Send)]
pub trait ExecutionController: 'static {
    async fn run(self: Box<Self>, env: ControllerEnv) -> Result<(), FailureCause>;
}

#[async_trait(?Send)]
impl<F, Fut> ExecutionController for F
where
    F: FnOnce(ControllerEnv) -> Fut + 'static,
    Fut: std::future::Future<Output = Result<(), FailureCause>> + 'static,
{
    async fn run(self: Box<Self>, env: ControllerEnv) -> Result<(), FailureCause> {
        (*self)(env).await
    }
}

/// Everything a controller can reach: its context, its private event
/// port, and the service registry.
#[derive(Clone)]
pub struct ControllerEnv {
    ctx: SimContext,
    event_port: Commport,
    registry: RegistryRef,
}

impl ControllerEnv {
    pub(crate) fn new(ctx: SimContext, event_port: Commport, registry: RegistryRef) -> Self {
        Self { ctx, event_port, registry }
    }

    pub fn ctx(&self) -> &SimContext {
        &self.ctx
    }

    pub fn hostname(&self) -> &HostName {
        self.ctx.host()
    }

    pub fn now(&self) -> f64 {
        self.ctx.now()
    }

    pub async fn sleep(&self, seconds: f64) -> Result<(), FailureCause> {
        self.ctx.sleep(seconds).await.map_err(FailureCause::from)
    }

    pub fn create_job_manager(&self) -> Result<Rc<JobManager>, FailureCause> {
        JobManager::new(&self.ctx, &self.event_port, self.registry.clone())
            .map_err(FailureCause::from)
    }

    pub fn create_data_movement_manager(&self) -> Rc<DataMovementManager> {
        DataMovementManager::new(&self.ctx, &self.event_port, self.registry.clone())
    }

    /// Block until the next execution event for this controller.
    pub async fn wait_for_next_event(&self) -> Result<ExecutionEvent, FailureCause> {
        self.ctx.expect::<ExecutionEvent>(&self.event_port).await.map_err(FailureCause::from)
    }

    /// Like `wait_for_next_event` with a timeout; elapsing yields a
    /// `NETWORK_TIMEOUT` cause.
    pub async fn wait_for_next_event_timeout(
        &self,
        seconds: f64,
    ) -> Result<ExecutionEvent, FailureCause> {
        let msg = self
            .ctx
            .get_timeout(&self.event_port, seconds)
            .await
            .map_err(FailureCause::from)?;
        msg.downcast::<ExecutionEvent>().map_err(|other| {
            FailureCause::from(KernelError::UnexpectedMessage {
                port: smol_str::SmolStr::new(self.event_port.name()),
                got: other.type_name(),
            })
        })
    }

    /// Post a timer event to this controller at an absolute date.
    pub fn set_timer(&self, date: f64, message: &str) {
        Alarm::schedule(
            &self.ctx,
            &self.event_port,
            ExecutionEvent::Timer { message: message.to_string(), date },
            date,
        )
        .detach();
    }

    pub fn compute_service(&self, name: &ServiceName) -> Option<ComputeRef> {
        self.registry.compute(name)
    }

    pub fn storage_service(&self, name: &ServiceName) -> Option<StorageEndpoint> {
        self.registry.storage_endpoint(name)
    }

    pub fn registry(&self) -> &RegistryRef {
        &self.registry
    }
}
