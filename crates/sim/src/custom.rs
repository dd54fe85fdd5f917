// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Support for custom actions that orchestrate work of their own: a
//! context that upgrades an executor environment into a full
//! controller-like surface (managers, events, storage access).

use crate::data_manager::DataMovementManager;
use crate::job_manager::JobManager;
use crate::registry::{ComputeRef, RegistryRef};
use gantry_compute::ExecutorEnv;
use gantry_core::{ExecutionEvent, FailureCause, HostName, ServiceName};
use gantry_kernel::Commport;
use gantry_storage::StorageEndpoint;
use std::rc::Rc;

/// What a custom action's closure works with when it needs more than
/// raw sleeping and computing. Built from the [`ExecutorEnv`] the
/// executor hands in plus a registry handle captured at job-building
/// time.
pub struct CustomContext {
    env: ExecutorEnv,
    event_port: Commport,
    registry: RegistryRef,
}

impl CustomContext {
    pub fn new(env: ExecutorEnv, registry: RegistryRef) -> Result<Self, FailureCause> {
        let event_port = env.ctx.create_commport("custom-action").map_err(FailureCause::from)?;
        Ok(Self { env, event_port, registry })
    }

    pub fn hostname(&self) -> &HostName {
        &self.env.hostname
    }

    pub fn physical_hostname(&self) -> &HostName {
        &self.env.physical_hostname
    }

    pub fn now(&self) -> f64 {
        self.env.ctx.now()
    }

    pub async fn sleep(&self, seconds: f64) -> Result<(), FailureCause> {
        self.env.ctx.sleep(seconds).await.map_err(FailureCause::from)
    }

    /// A job manager owned by this action; nested jobs can be submitted
    /// to any registered compute service.
    pub fn create_job_manager(&self) -> Result<Rc<JobManager>, FailureCause> {
        JobManager::new(&self.env.ctx, &self.event_port, self.registry.clone())
            .map_err(FailureCause::from)
    }

    pub fn create_data_movement_manager(&self) -> Rc<DataMovementManager> {
        DataMovementManager::new(&self.env.ctx, &self.event_port, self.registry.clone())
    }

    pub async fn wait_for_next_event(&self) -> Result<ExecutionEvent, FailureCause> {
        self.env
            .ctx
            .expect::<ExecutionEvent>(&self.event_port)
            .await
            .map_err(FailureCause::from)
    }

    pub fn compute_service(&self, name: &ServiceName) -> Option<ComputeRef> {
        self.registry.compute(name)
    }

    pub fn storage_service(&self, name: &ServiceName) -> Option<StorageEndpoint> {
        self.registry.storage_endpoint(name)
    }
}

#[cfg(test)]
#[path = "custom_tests.rs"]
mod tests;
