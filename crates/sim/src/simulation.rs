// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The simulation façade: the one object holding a run's state.
//!
//! Lifecycle: `new` -> `init(args)` -> `instantiate_platform` -> add
//! files, services, and controllers -> `launch`. Skipping `init` or the
//! platform step is a hard error. Everything module-wide (file table,
//! service registry, kernel handle) lives here and dies with the
//! object, so only one simulation is ever live per instance.

use crate::controller::{ControllerEnv, ExecutionController};
use crate::registry::{ComputeRef, RegistryRef, ServiceRegistry};
use gantry_compute::{
    BareMetalComputeService, BatchComputeService, CloudComputeService, CondorTarget,
    ComputeError, HtcondorComputeService,
};
use gantry_core::{
    FailureCause, File, FileId, HostName, JobRef, Location, PayloadMap, PropertyMap,
    ServiceName,
};
use gantry_kernel::{
    Kernel, KernelConfig, KernelError, Platform, PlatformBuilder, PlatformError,
};
use gantry_storage::{
    FileRegistryService, ProxyStorageService, SimpleStorageService, StorageEndpoint,
    StorageError,
};
use indexmap::IndexMap;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("init() has not been called")]
    NotInitialized,
    #[error("init() was already called")]
    AlreadyInitialized,
    #[error("no platform has been instantiated")]
    NoPlatform,
    #[error("a platform was already instantiated")]
    PlatformAlreadyInstantiated,
    #[error("file {0} is already registered")]
    DuplicateFile(FileId),
    #[error("unknown file {0}")]
    UnknownFile(FileId),
    #[error("unknown service {0}")]
    UnknownService(ServiceName),
    #[error("bad value in {flag}: {value}")]
    BadFlag { flag: String, value: String },
    #[error("help requested")]
    HelpRequested,
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Compute(#[from] ComputeError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Failure(#[from] FailureCause),
}

/// Flags recognised ahead of user code; everything else is forwarded.
#[derive(Debug, Clone)]
struct SimConfig {
    commport_pool_size: usize,
    full_log: bool,
    pagecache_simulation: bool,
    host_shutdown_simulation: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            commport_pool_size: KernelConfig::default().commport_pool_size,
            full_log: false,
            pagecache_simulation: false,
            host_shutdown_simulation: false,
        }
    }
}

pub const HELP_TEXT: &str = "\
gantry simulation flags:
  --gantry-commport-pool-size=N   commport name pool size
  --gantry-full-log               enable all log categories
  --gantry-pagecache-simulation   enable per-host page-cache modelling
  --gantry-host-shutdown-simulation  enable host-crash events
  --gantry-help                   print this help
unrecognised flags are forwarded to the platform layer";

pub struct Simulation {
    config: SimConfig,
    initialized: bool,
    kernel: Option<Kernel>,
    registry: RegistryRef,
    files: RefCell<IndexMap<FileId, File>>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn new() -> Self {
        Self {
            config: SimConfig::default(),
            initialized: false,
            kernel: None,
            registry: Rc::new(ServiceRegistry::default()),
            files: RefCell::new(IndexMap::new()),
        }
    }

    /// Parse the recognised flags; returns the leftover arguments for
    /// the platform layer / user code.
    pub fn init(&mut self, args: &[String]) -> Result<Vec<String>, SimError> {
        if self.initialized {
            return Err(SimError::AlreadyInitialized);
        }
        let mut leftover = Vec::new();
        for arg in args {
            if let Some(v) = arg.strip_prefix("--gantry-commport-pool-size=") {
                self.config.commport_pool_size =
                    v.parse().map_err(|_| SimError::BadFlag {
                        flag: "--gantry-commport-pool-size".into(),
                        value: v.to_string(),
                    })?;
            } else if arg == "--gantry-full-log" {
                self.config.full_log = true;
            } else if arg == "--gantry-pagecache-simulation" {
                self.config.pagecache_simulation = true;
            } else if arg == "--gantry-host-shutdown-simulation" {
                self.config.host_shutdown_simulation = true;
            } else if arg == "--gantry-help" {
                return Err(SimError::HelpRequested);
            } else {
                leftover.push(arg.clone());
            }
        }
        self.initialized = true;
        Ok(leftover)
    }

    /// Build the platform and bring the kernel up.
    pub fn instantiate_platform(
        &mut self,
        build: impl FnOnce(PlatformBuilder) -> PlatformBuilder,
    ) -> Result<(), SimError> {
        if !self.initialized {
            return Err(SimError::NotInitialized);
        }
        if self.kernel.is_some() {
            return Err(SimError::PlatformAlreadyInstantiated);
        }
        let platform = build(Platform::builder()).build()?;
        self.kernel = Some(Kernel::new(
            platform,
            KernelConfig { commport_pool_size: self.config.commport_pool_size },
        ));
        Ok(())
    }

    pub fn kernel(&self) -> Result<&Kernel, SimError> {
        self.kernel.as_ref().ok_or(SimError::NoPlatform)
    }

    pub fn registry(&self) -> &RegistryRef {
        &self.registry
    }

    /// Current simulated date.
    pub fn now(&self) -> f64 {
        self.kernel.as_ref().map(Kernel::now).unwrap_or(0.0)
    }

    // --- files ---------------------------------------------------------

    /// Register a file once; duplicate ids are an error.
    pub fn add_file(&self, id: &str, size: u64) -> Result<File, SimError> {
        let file = File::new(id, size);
        let mut files = self.files.borrow_mut();
        if files.contains_key(file.id()) {
            return Err(SimError::DuplicateFile(file.id().clone()));
        }
        files.insert(file.id().clone(), file.clone());
        Ok(file)
    }

    pub fn file(&self, id: &str) -> Result<File, SimError> {
        self.files
            .borrow()
            .get(&FileId::new(id))
            .cloned()
            .ok_or_else(|| SimError::UnknownFile(FileId::new(id)))
    }

    /// Place a file at a location before launch (no simulated time
    /// spent) and record it in every file registry.
    pub fn stage_file(&self, location: &Location) -> Result<(), SimError> {
        let service = location
            .service()
            .ok_or_else(|| SimError::UnknownService(ServiceName::new("scratch")))?;
        let storage = self
            .registry
            .storage_handle(service)
            .ok_or_else(|| SimError::UnknownService(service.clone()))?;
        storage.stage_file(location)?;
        for name in self.registry.file_registry_names() {
            if let Some(handle) = self.registry.registry_handle(&name) {
                handle.stage_entry(location);
            }
        }
        Ok(())
    }

    // --- services ------------------------------------------------------

    pub fn add_storage_service(
        &self,
        name: &str,
        host: &str,
        mounts: &[&str],
        props: &PropertyMap,
        payloads: PayloadMap,
    ) -> Result<Rc<SimpleStorageService>, SimError> {
        let kernel = self.kernel()?;
        let svc = SimpleStorageService::new(kernel, name, host, mounts, props, payloads)?;
        svc.start()?;
        self.registry.register_storage(svc.clone());
        Ok(svc)
    }

    pub fn add_proxy_storage_service(
        &self,
        name: &str,
        host: &str,
        children: Vec<StorageEndpoint>,
        props: &PropertyMap,
        payloads: PayloadMap,
    ) -> Result<Rc<ProxyStorageService>, SimError> {
        let kernel = self.kernel()?;
        let svc = ProxyStorageService::new(kernel, name, host, children, props, payloads)?;
        svc.start()?;
        self.registry.register_proxy(svc.clone());
        Ok(svc)
    }

    pub fn add_file_registry_service(
        &self,
        name: &str,
        host: &str,
        payloads: PayloadMap,
    ) -> Result<Rc<FileRegistryService>, SimError> {
        let kernel = self.kernel()?;
        let svc = FileRegistryService::new(kernel, name, host, payloads)?;
        svc.start()?;
        self.registry.register_file_registry(svc.clone());
        Ok(svc)
    }

    pub fn add_bare_metal_service(
        &self,
        name: &str,
        host: &str,
        exec_hosts: &[&str],
        scratch: Option<Rc<SimpleStorageService>>,
        payloads: PayloadMap,
    ) -> Result<Rc<BareMetalComputeService>, SimError> {
        let kernel = self.kernel()?;
        let svc = BareMetalComputeService::new(
            kernel,
            name,
            host,
            exec_hosts,
            self.registry.storage_resolver(),
            self.registry.registry_resolver(),
            scratch,
            payloads,
        )?;
        svc.start()?;
        self.registry.register_compute(ComputeRef::BareMetal(svc.clone()));
        Ok(svc)
    }

    pub fn add_batch_service(
        &self,
        name: &str,
        host: &str,
        nodes: &[&str],
        props: &PropertyMap,
        payloads: PayloadMap,
    ) -> Result<Rc<BatchComputeService>, SimError> {
        let kernel = self.kernel()?;
        let svc = BatchComputeService::new(
            kernel,
            name,
            host,
            nodes,
            props,
            self.registry.storage_resolver(),
            self.registry.registry_resolver(),
            payloads,
        )?;
        svc.start()?;
        self.registry.register_compute(ComputeRef::Batch(svc.clone()));
        Ok(svc)
    }

    pub fn add_cloud_service(
        &self,
        name: &str,
        host: &str,
        exec_hosts: &[&str],
        props: &PropertyMap,
        payloads: PayloadMap,
    ) -> Result<Rc<CloudComputeService>, SimError> {
        let kernel = self.kernel()?;
        let svc = CloudComputeService::new(
            kernel,
            name,
            host,
            exec_hosts,
            props,
            self.registry.storage_resolver(),
            self.registry.registry_resolver(),
            payloads,
        )?;
        svc.start()?;
        self.registry.register_compute(ComputeRef::Cloud(svc.clone()));
        Ok(svc)
    }

    pub fn add_htcondor_service(
        &self,
        name: &str,
        host: &str,
        targets: Vec<CondorTarget>,
        props: &PropertyMap,
        payloads: PayloadMap,
    ) -> Result<Rc<HtcondorComputeService>, SimError> {
        let kernel = self.kernel()?;
        let svc = HtcondorComputeService::new(kernel, name, host, targets, props, payloads)?;
        svc.start()?;
        self.registry.register_compute(ComputeRef::Htcondor(svc.clone()));
        Ok(svc)
    }

    /// Spawn a controller actor on `host`. It starts running at
    /// `launch`.
    pub fn add_controller(
        &self,
        name: &str,
        host: &str,
        controller: impl ExecutionController,
    ) -> Result<(), SimError> {
        let kernel = self.kernel()?;
        let host = HostName::new(host);
        let event_port = kernel.create_commport(&format!("controller-{name}"), &host)?;
        let registry = self.registry.clone();
        let boxed: Box<dyn ExecutionController> = Box::new(controller);
        kernel.spawn(&format!("controller-{name}"), &host, false, move |ctx| async move {
            let env = ControllerEnv::new(ctx, event_port, registry);
            boxed.run(env).await.map_err(KernelError::from)
        })?;
        Ok(())
    }

    /// Run the kernel until every non-daemon actor (controllers,
    /// executors, transfers) has returned.
    pub fn launch(&mut self) -> Result<(), SimError> {
        if !self.initialized {
            return Err(SimError::NotInitialized);
        }
        let kernel = self.kernel()?;
        tracing::info!("simulation launched");
        kernel.run()?;
        Ok(())
    }

    // --- queries -------------------------------------------------------

    pub fn host_num_cores(&self, host: &str) -> Result<u32, SimError> {
        Ok(self.kernel()?.platform(|p| p.num_cores(&HostName::new(host)))?)
    }

    pub fn host_memory_capacity(&self, host: &str) -> Result<u64, SimError> {
        Ok(self.kernel()?.platform(|p| p.ram(&HostName::new(host)))?)
    }

    pub fn host_flop_rate(&self, host: &str) -> Result<f64, SimError> {
        Ok(self.kernel()?.platform(|p| p.core_speed(&HostName::new(host)))?)
    }

    /// Joules consumed by `host` so far.
    pub fn energy_consumed(&self, host: &str) -> Result<f64, SimError> {
        Ok(self
            .kernel()?
            .platform_mut(|p, now| p.energy_consumed(&HostName::new(host), now))?)
    }

    /// Serialisable run trace for a set of jobs: one record per action
    /// attempt.
    pub fn dump_jobs_json(&self, jobs: &[JobRef]) -> serde_json::Value {
        let records: Vec<ActionTraceRecord> = jobs
            .iter()
            .flat_map(|job| {
                let j = job.borrow();
                let job_name = j.name().to_string();
                (0..j.action_count())
                    .flat_map(|i| {
                        let action = j.action(i);
                        action
                            .history()
                            .iter()
                            .map(|frame| ActionTraceRecord {
                                job: job_name.clone(),
                                action: action.name().to_string(),
                                kind: action.kind().to_string(),
                                state: format!("{}", frame.state),
                                host: frame.host.as_ref().map(ToString::to_string),
                                num_cores: frame.num_cores,
                                start_date: frame.start_date,
                                end_date: frame.end_date,
                                failure: frame.failure.as_ref().map(|c| c.code().to_string()),
                            })
                            .collect::<Vec<_>>()
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        serde_json::json!({ "actions": records })
    }
}

#[derive(Debug, Serialize)]
struct ActionTraceRecord {
    job: String,
    action: String,
    kind: String,
    state: String,
    host: Option<String>,
    num_cores: u32,
    start_date: Option<f64>,
    end_date: Option<f64>,
    failure: Option<String>,
}

#[cfg(test)]
#[path = "simulation_tests.rs"]
mod tests;
