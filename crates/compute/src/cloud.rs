// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cloud compute service: a pool of physical hosts carved into
//! VMs, each exposing an inner bare-metal service while running.
//!
//! Clients never submit jobs to the cloud service itself; they submit
//! to the handle `start_vm` returns.

use crate::bare_metal::{BareMetalComputeService, BmHost};
use crate::executor::{RegistryResolver, StorageResolver};
use crate::service::*;
use gantry_core::{
    FailureCause, HostName, MessagePayload, PayloadMap, PropertyMap, ServiceName,
    ServiceProperty,
};
use gantry_kernel::{ActorId, Commport, Kernel, KernelError, SimContext};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VmPlacement {
    #[default]
    FirstFit,
    /// Tightest RAM fit, cores as tie-break.
    BestFitRamFirst,
    /// Tightest core fit, RAM as tie-break.
    BestFitCoresFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Created,
    Running,
    Suspended,
    ShutDown,
}

gantry_core::simple_display! {
    VmState {
        Created => "created",
        Running => "running",
        Suspended => "suspended",
        ShutDown => "shut_down",
    }
}

struct VmRecord {
    cores: u32,
    ram: u64,
    state: VmState,
    preferred_host: Option<HostName>,
    physical: Option<HostName>,
    inner: Option<Rc<BareMetalComputeService>>,
}

struct HostCommit {
    total_cores: u32,
    total_ram: u64,
    used_cores: u32,
    used_ram: u64,
}

impl HostCommit {
    fn free_cores(&self) -> u32 {
        self.total_cores - self.used_cores
    }

    fn free_ram(&self) -> u64 {
        self.total_ram - self.used_ram
    }
}

struct CloudState {
    hosts: IndexMap<HostName, HostCommit>,
    vms: IndexMap<ServiceName, VmRecord>,
    vm_counter: u64,
}

// --- protocol ----------------------------------------------------------

#[derive(Debug)]
pub struct VmCreateRequest {
    pub reply_to: Commport,
    pub cores: u32,
    pub ram: u64,
    pub preferred_host: Option<HostName>,
}

#[derive(Debug)]
pub struct VmCreateAnswer {
    pub result: Result<ServiceName, FailureCause>,
}

#[derive(Debug)]
pub struct VmStartRequest {
    pub reply_to: Commport,
    pub vm: ServiceName,
}

#[derive(Debug)]
pub struct VmStartAnswer {
    pub result: Result<Rc<BareMetalComputeService>, FailureCause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmLifecycleOp {
    Suspend,
    Resume,
    Destroy,
}

#[derive(Debug)]
pub struct VmLifecycleRequest {
    pub reply_to: Commport,
    pub vm: ServiceName,
    pub op: VmLifecycleOp,
}

#[derive(Debug)]
pub struct VmShutdownRequest {
    pub reply_to: Commport,
    pub vm: ServiceName,
    pub send_failure_notifications: bool,
    pub termination_cause: FailureCause,
}

#[derive(Debug)]
pub struct VmLifecycleAnswer {
    pub result: Result<(), FailureCause>,
}

pub struct CloudComputeService {
    name: ServiceName,
    home_host: HostName,
    port: Commport,
    payloads: PayloadMap,
    kernel: Kernel,
    placement: VmPlacement,
    boot_overhead: f64,
    storage: StorageResolver,
    registries: RegistryResolver,
    state: Rc<RefCell<CloudState>>,
    actor: RefCell<Option<ActorId>>,
}

impl CloudComputeService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kernel: &Kernel,
        name: &str,
        home_host: &str,
        execution_hosts: &[&str],
        props: &PropertyMap,
        storage: StorageResolver,
        registries: RegistryResolver,
        payloads: PayloadMap,
    ) -> Result<Rc<Self>, ComputeError> {
        let home_host = HostName::new(home_host);
        let placement = match props.get_or(ServiceProperty::HostSelectionAlgorithm, "first_fit") {
            "first_fit" => VmPlacement::FirstFit,
            "best_fit_ram" => VmPlacement::BestFitRamFirst,
            "best_fit_cores" => VmPlacement::BestFitCoresFirst,
            other => {
                return Err(ComputeError::BadArgument {
                    key: ServiceProperty::HostSelectionAlgorithm.key().to_string(),
                    value: other.to_string(),
                });
            }
        };
        let boot_overhead = props.get_f64(ServiceProperty::VmBootOverhead, 0.0)?;
        let mut hosts = IndexMap::new();
        for &h in execution_hosts {
            let host = HostName::new(h);
            let (cores, ram) = kernel
                .platform(|p| p.host(&host).map(|hh| (hh.cores, hh.ram)))
                .map_err(KernelError::from)?;
            hosts.insert(
                host,
                HostCommit { total_cores: cores, total_ram: ram, used_cores: 0, used_ram: 0 },
            );
        }
        let port = kernel
            .create_commport(&format!("cloud-{name}"), &home_host)
            .map_err(KernelError::from)?;
        Ok(Rc::new(Self {
            name: ServiceName::new(name),
            home_host,
            port,
            payloads,
            kernel: kernel.clone(),
            placement,
            boot_overhead,
            storage,
            registries,
            state: Rc::new(RefCell::new(CloudState {
                hosts,
                vms: IndexMap::new(),
                vm_counter: 0,
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

    /// Identities of the backing physical hosts.
    pub fn execution_hosts(&self) -> Vec<HostName> {
        self.state.borrow().hosts.keys().cloned().collect()
    }

    pub fn vm_state(&self, vm: &ServiceName) -> Option<VmState> {
        self.state.borrow().vms.get(vm).map(|r| r.state)
    }

    pub fn start(self: &Rc<Self>) -> Result<(), KernelError> {
        let svc = self.clone();
        let port = self.port.clone();
        let id = self.kernel.spawn(
            &format!("cloud-{}", self.name),
            &self.home_host.clone(),
            true,
            move |ctx| async move {
                tracing::info!(service = %svc.name, "cloud service up");
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
        let msg = match msg.downcast::<VmCreateRequest>() {
            Ok(req) => {
                let result = self.create_vm_record(req.cores, req.ram, req.preferred_host);
                return ctx.dput(
                    &req.reply_to,
                    VmCreateAnswer { result },
                    self.payloads.get(MessagePayload::VmCreateAnswer),
                );
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<VmStartRequest>() {
            Ok(req) => {
                if self.boot_overhead > 0.0 {
                    ctx.sleep(self.boot_overhead).await?;
                }
                let result = self.start_vm_record(&req.vm);
                return ctx.dput(
                    &req.reply_to,
                    VmStartAnswer { result },
                    self.payloads.get(MessagePayload::VmLifecycleAnswer),
                );
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<VmShutdownRequest>() {
            Ok(req) => {
                let result = self.shutdown_vm_record(
                    ctx,
                    &req.vm,
                    req.send_failure_notifications,
                    req.termination_cause,
                );
                return ctx.dput(
                    &req.reply_to,
                    VmLifecycleAnswer { result },
                    self.payloads.get(MessagePayload::VmLifecycleAnswer),
                );
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<VmLifecycleRequest>() {
            Ok(req) => {
                let result = match req.op {
                    VmLifecycleOp::Suspend => self.suspend_vm_record(&req.vm),
                    VmLifecycleOp::Resume => self.resume_vm_record(&req.vm),
                    VmLifecycleOp::Destroy => self.destroy_vm_record(&req.vm),
                };
                return ctx.dput(
                    &req.reply_to,
                    VmLifecycleAnswer { result },
                    self.payloads.get(MessagePayload::VmLifecycleAnswer),
                );
            }
            Err(m) => m,
        };
        // Direct job submission is forbidden by contract.
        let msg = match msg.downcast::<JobSubmitRequest>() {
            Ok(req) => {
                let cause = FailureCause::JobTypeNotSupported {
                    service: self.name.clone(),
                    reason: "submit to the bare-metal service returned by start_vm".into(),
                };
                return ctx.dput(
                    &req.reply_to,
                    JobSubmitAnswer { result: Err(cause) },
                    self.payloads.get(MessagePayload::JobSubmitAnswer),
                );
            }
            Err(m) => m,
        };
        tracing::warn!(service = %self.name, got = msg.type_name(), "unexpected message");
        Ok(())
    }

    /// Allocate the record; fails only when no host could *ever* host
    /// the VM.
    fn create_vm_record(
        &self,
        cores: u32,
        ram: u64,
        preferred_host: Option<HostName>,
    ) -> Result<ServiceName, FailureCause> {
        let mut st = self.state.borrow_mut();
        let feasible = match &preferred_host {
            Some(h) => st
                .hosts
                .get(h)
                .map(|c| c.total_cores >= cores && c.total_ram >= ram)
                .unwrap_or(false),
            None => st.hosts.values().any(|c| c.total_cores >= cores && c.total_ram >= ram),
        };
        if !feasible {
            return Err(FailureCause::NotEnoughComputeResources {
                service: self.name.clone(),
                reason: format!("no host can ever fit a {cores}-core / {ram}-B VM"),
            });
        }
        st.vm_counter += 1;
        let vm = ServiceName::new(format!("{}-vm-{}", self.name, st.vm_counter));
        st.vms.insert(
            vm.clone(),
            VmRecord {
                cores,
                ram,
                state: VmState::Created,
                preferred_host,
                physical: None,
                inner: None,
            },
        );
        Ok(vm)
    }

    /// Place and boot: no queueing, a full platform answers
    /// `NOT_ENOUGH_COMPUTE_RESOURCES` immediately.
    fn start_vm_record(
        &self,
        vm: &ServiceName,
    ) -> Result<Rc<BareMetalComputeService>, FailureCause> {
        let (cores, ram, preferred) = {
            let st = self.state.borrow();
            let record = st.vms.get(vm).ok_or_else(|| FailureCause::JobTypeNotSupported {
                service: self.name.clone(),
                reason: format!("unknown VM {vm}"),
            })?;
            if record.state != VmState::Created {
                return Err(FailureCause::JobTypeNotSupported {
                    service: self.name.clone(),
                    reason: format!("VM {vm} is {}, not created", record.state),
                });
            }
            (record.cores, record.ram, record.preferred_host.clone())
        };
        let physical = self.place(cores, ram, preferred.as_ref()).ok_or_else(|| {
            FailureCause::NotEnoughComputeResources {
                service: self.name.clone(),
                reason: format!("no host currently fits a {cores}-core / {ram}-B VM"),
            }
        })?;
        let inner = BareMetalComputeService::with_hosts(
            &self.kernel,
            vm.as_str(),
            physical.as_str(),
            vec![BmHost { name: physical.clone(), cores, ram }],
            Some(HostName::new(vm.as_str())),
            self.storage.clone(),
            self.registries.clone(),
            None,
            self.payloads.clone(),
        )
        .map_err(|e| FailureCause::fatal(e.to_string()))?;
        inner.start().map_err(FailureCause::from)?;

        let mut st = self.state.borrow_mut();
        if let Some(commit) = st.hosts.get_mut(&physical) {
            commit.used_cores += cores;
            commit.used_ram += ram;
        }
        if let Some(record) = st.vms.get_mut(vm) {
            record.state = VmState::Running;
            record.physical = Some(physical);
            record.inner = Some(inner.clone());
        }
        tracing::info!(service = %self.name, vm = %vm, "vm started");
        Ok(inner)
    }

    fn place(&self, cores: u32, ram: u64, preferred: Option<&HostName>) -> Option<HostName> {
        let st = self.state.borrow();
        if let Some(h) = preferred {
            let c = st.hosts.get(h)?;
            return (c.free_cores() >= cores && c.free_ram() >= ram).then(|| h.clone());
        }
        let fitting =
            st.hosts.iter().filter(|(_, c)| c.free_cores() >= cores && c.free_ram() >= ram);
        match self.placement {
            VmPlacement::FirstFit => fitting.map(|(h, _)| h.clone()).next(),
            VmPlacement::BestFitRamFirst => fitting
                .min_by_key(|(_, c)| (c.free_ram() - ram, c.free_cores() - cores))
                .map(|(h, _)| h.clone()),
            VmPlacement::BestFitCoresFirst => fitting
                .min_by_key(|(_, c)| (c.free_cores() - cores, c.free_ram() - ram))
                .map(|(h, _)| h.clone()),
        }
    }

    fn suspend_vm_record(&self, vm: &ServiceName) -> Result<(), FailureCause> {
        let st = self.state.borrow();
        let record = self.running_vm(&st, vm)?;
        if let Some(inner) = &record.inner {
            inner.suspend();
        }
        drop(st);
        self.state.borrow_mut().vms[vm].state = VmState::Suspended;
        Ok(())
    }

    fn resume_vm_record(&self, vm: &ServiceName) -> Result<(), FailureCause> {
        {
            let st = self.state.borrow();
            let record = st.vms.get(vm).ok_or_else(|| self.unknown_vm(vm))?;
            if record.state != VmState::Suspended {
                return Err(self.wrong_state(vm, record.state));
            }
            if let Some(inner) = &record.inner {
                inner.resume();
            }
        }
        self.state.borrow_mut().vms[vm].state = VmState::Running;
        Ok(())
    }

    fn shutdown_vm_record(
        &self,
        ctx: &SimContext,
        vm: &ServiceName,
        send_failure_notifications: bool,
        cause: FailureCause,
    ) -> Result<(), FailureCause> {
        let (inner, physical, cores, ram) = {
            let st = self.state.borrow();
            let record = st.vms.get(vm).ok_or_else(|| self.unknown_vm(vm))?;
            if !matches!(record.state, VmState::Running | VmState::Suspended) {
                return Err(self.wrong_state(vm, record.state));
            }
            (
                record.inner.clone(),
                record.physical.clone(),
                record.cores,
                record.ram,
            )
        };
        if let Some(inner) = inner {
            inner.resume();
            inner.terminate_all(ctx, send_failure_notifications.then_some(cause));
        }
        let mut st = self.state.borrow_mut();
        if let Some(host) = physical {
            if let Some(commit) = st.hosts.get_mut(&host) {
                commit.used_cores -= cores;
                commit.used_ram -= ram;
            }
        }
        if let Some(record) = st.vms.get_mut(vm) {
            record.state = VmState::ShutDown;
            record.physical = None;
            record.inner = None;
        }
        Ok(())
    }

    fn destroy_vm_record(&self, vm: &ServiceName) -> Result<(), FailureCause> {
        let mut st = self.state.borrow_mut();
        let record = st.vms.get(vm).ok_or_else(|| self.unknown_vm(vm))?;
        if !matches!(record.state, VmState::ShutDown | VmState::Created) {
            return Err(self.wrong_state(vm, record.state));
        }
        st.vms.shift_remove(vm);
        Ok(())
    }

    fn running_vm<'a>(
        &self,
        st: &'a std::cell::Ref<'_, CloudState>,
        vm: &ServiceName,
    ) -> Result<&'a VmRecord, FailureCause> {
        let record = st.vms.get(vm).ok_or_else(|| self.unknown_vm(vm))?;
        if record.state != VmState::Running {
            return Err(self.wrong_state(vm, record.state));
        }
        Ok(record)
    }

    fn unknown_vm(&self, vm: &ServiceName) -> FailureCause {
        FailureCause::JobTypeNotSupported {
            service: self.name.clone(),
            reason: format!("unknown VM {vm}"),
        }
    }

    fn wrong_state(&self, vm: &ServiceName, state: VmState) -> FailureCause {
        FailureCause::JobCannotBeTerminated { state: format!("VM {vm} is {state}") }
    }
}

// --- client helpers ----------------------------------------------------

pub async fn create_vm(
    ctx: &SimContext,
    ep: &ComputeEndpoint,
    cores: u32,
    ram: u64,
    preferred_host: Option<HostName>,
) -> Result<ServiceName, FailureCause> {
    let reply_to = ctx.create_commport("vm-create").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        VmCreateRequest { reply_to: reply_to.clone(), cores, ram, preferred_host },
        ep.payloads.get(MessagePayload::VmCreateRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer = ctx.expect::<VmCreateAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    answer.result
}

pub async fn start_vm(
    ctx: &SimContext,
    ep: &ComputeEndpoint,
    vm: &ServiceName,
) -> Result<Rc<BareMetalComputeService>, FailureCause> {
    let reply_to = ctx.create_commport("vm-start").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        VmStartRequest { reply_to: reply_to.clone(), vm: vm.clone() },
        ep.payloads.get(MessagePayload::VmLifecycleRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer = ctx.expect::<VmStartAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    answer.result
}

async fn lifecycle(
    ctx: &SimContext,
    ep: &ComputeEndpoint,
    vm: &ServiceName,
    op: VmLifecycleOp,
) -> Result<(), FailureCause> {
    let reply_to = ctx.create_commport("vm-op").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        VmLifecycleRequest { reply_to: reply_to.clone(), vm: vm.clone(), op },
        ep.payloads.get(MessagePayload::VmLifecycleRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer =
        ctx.expect::<VmLifecycleAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    answer.result
}

pub async fn suspend_vm(
    ctx: &SimContext,
    ep: &ComputeEndpoint,
    vm: &ServiceName,
) -> Result<(), FailureCause> {
    lifecycle(ctx, ep, vm, VmLifecycleOp::Suspend).await
}

pub async fn resume_vm(
    ctx: &SimContext,
    ep: &ComputeEndpoint,
    vm: &ServiceName,
) -> Result<(), FailureCause> {
    lifecycle(ctx, ep, vm, VmLifecycleOp::Resume).await
}

pub async fn destroy_vm(
    ctx: &SimContext,
    ep: &ComputeEndpoint,
    vm: &ServiceName,
) -> Result<(), FailureCause> {
    lifecycle(ctx, ep, vm, VmLifecycleOp::Destroy).await
}

pub async fn shutdown_vm(
    ctx: &SimContext,
    ep: &ComputeEndpoint,
    vm: &ServiceName,
    send_failure_notifications: bool,
    termination_cause: FailureCause,
) -> Result<(), FailureCause> {
    let reply_to = ctx.create_commport("vm-shutdown").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        VmShutdownRequest {
            reply_to: reply_to.clone(),
            vm: vm.clone(),
            send_failure_notifications,
            termination_cause,
        },
        ep.payloads.get(MessagePayload::VmLifecycleRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer =
        ctx.expect::<VmLifecycleAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    answer.result
}

#[cfg(test)]
#[path = "cloud_tests.rs"]
mod tests;
