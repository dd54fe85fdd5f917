// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The service registry: name -> handle resolution shared by the
//! façade, the managers, and the executors' storage resolvers.

use gantry_compute::{
    BareMetalComputeService, BatchComputeService, CloudComputeService, ComputeEndpoint,
    HtcondorComputeService,
};
use gantry_core::ServiceName;
use gantry_storage::registry::RegistryEndpoint;
use gantry_storage::{
    FileRegistryService, ProxyStorageService, SimpleStorageService, StorageEndpoint,
};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

/// A compute service of any concrete kind.
#[derive(Clone)]
pub enum ComputeRef {
    BareMetal(Rc<BareMetalComputeService>),
    Batch(Rc<BatchComputeService>),
    Cloud(Rc<CloudComputeService>),
    Htcondor(Rc<HtcondorComputeService>),
}

impl ComputeRef {
    pub fn name(&self) -> &ServiceName {
        match self {
            ComputeRef::BareMetal(s) => s.name(),
            ComputeRef::Batch(s) => s.name(),
            ComputeRef::Cloud(s) => s.name(),
            ComputeRef::Htcondor(s) => s.name(),
        }
    }

    pub fn endpoint(&self) -> ComputeEndpoint {
        match self {
            ComputeRef::BareMetal(s) => s.endpoint(),
            ComputeRef::Batch(s) => s.endpoint(),
            ComputeRef::Cloud(s) => s.endpoint(),
            ComputeRef::Htcondor(s) => s.endpoint(),
        }
    }

    pub fn is_up(&self) -> bool {
        match self {
            ComputeRef::BareMetal(s) => s.is_up(),
            ComputeRef::Batch(s) => s.is_up(),
            // Cloud and condor services stay up until stopped.
            ComputeRef::Cloud(_) | ComputeRef::Htcondor(_) => true,
        }
    }
}

#[derive(Default)]
pub struct ServiceRegistry {
    storages: RefCell<IndexMap<ServiceName, StorageEndpoint>>,
    storage_handles: RefCell<IndexMap<ServiceName, Rc<SimpleStorageService>>>,
    proxy_handles: RefCell<IndexMap<ServiceName, Rc<ProxyStorageService>>>,
    file_registries: RefCell<IndexMap<ServiceName, RegistryEndpoint>>,
    registry_handles: RefCell<IndexMap<ServiceName, Rc<FileRegistryService>>>,
    computes: RefCell<IndexMap<ServiceName, ComputeRef>>,
}

pub type RegistryRef = Rc<ServiceRegistry>;

impl ServiceRegistry {
    pub fn register_storage(&self, handle: Rc<SimpleStorageService>) {
        self.storages.borrow_mut().insert(handle.name().clone(), handle.endpoint());
        self.storage_handles.borrow_mut().insert(handle.name().clone(), handle);
    }

    /// Proxies speak the storage protocol; they register as storage
    /// endpoints too.
    pub fn register_proxy(&self, handle: Rc<ProxyStorageService>) {
        self.storages.borrow_mut().insert(handle.name().clone(), handle.endpoint());
        self.proxy_handles.borrow_mut().insert(handle.name().clone(), handle);
    }

    pub fn register_file_registry(&self, handle: Rc<FileRegistryService>) {
        self.file_registries.borrow_mut().insert(handle.name().clone(), handle.endpoint());
        self.registry_handles.borrow_mut().insert(handle.name().clone(), handle);
    }

    pub fn register_compute(&self, compute: ComputeRef) {
        self.computes.borrow_mut().insert(compute.name().clone(), compute);
    }

    pub fn storage_endpoint(&self, name: &ServiceName) -> Option<StorageEndpoint> {
        self.storages.borrow().get(name).cloned()
    }

    pub fn storage_handle(&self, name: &ServiceName) -> Option<Rc<SimpleStorageService>> {
        self.storage_handles.borrow().get(name).cloned()
    }

    pub fn storage_names(&self) -> Vec<ServiceName> {
        self.storages.borrow().keys().cloned().collect()
    }

    pub fn file_registry_endpoint(&self, name: &ServiceName) -> Option<RegistryEndpoint> {
        self.file_registries.borrow().get(name).cloned()
    }

    pub fn file_registry_names(&self) -> Vec<ServiceName> {
        self.file_registries.borrow().keys().cloned().collect()
    }

    pub fn registry_handle(&self, name: &ServiceName) -> Option<Rc<FileRegistryService>> {
        self.registry_handles.borrow().get(name).cloned()
    }

    pub fn compute(&self, name: &ServiceName) -> Option<ComputeRef> {
        self.computes.borrow().get(name).cloned()
    }

    /// Resolver closures handed to compute services for their
    /// executors.
    pub fn storage_resolver(self: &Rc<Self>) -> gantry_compute::StorageResolver {
        let reg = self.clone();
        Rc::new(move |name| reg.storage_endpoint(name))
    }

    pub fn registry_resolver(self: &Rc<Self>) -> gantry_compute::RegistryResolver {
        let reg = self.clone();
        Rc::new(move |name| reg.file_registry_endpoint(name))
    }
}
