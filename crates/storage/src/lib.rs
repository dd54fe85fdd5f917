// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gantry-storage: logical file systems, the simple storage service,
//! the cache-through proxy, and the file registry

pub mod client;
pub mod lfs;
pub mod messages;
pub mod proxy;
pub mod registry;
pub mod simple;

use gantry_core::{HostName, PayloadMap, PropertyError, ServiceName};
use gantry_kernel::{Commport, KernelError};
use thiserror::Error;

/// Everything a client needs to talk to a storage service.
#[derive(Debug, Clone)]
pub struct StorageEndpoint {
    pub name: ServiceName,
    pub host: HostName,
    pub port: Commport,
    pub payloads: PayloadMap,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("mounts {a} and {b} overlap on the same service")]
    OverlappingMounts { a: String, b: String },
    #[error("host {host} has no disk mounted at {mount}")]
    NoSuchDisk { host: HostName, mount: String },
    #[error("unknown eviction policy {0:?}")]
    UnknownPolicy(String),
    #[error("proxy {0} has no children")]
    NoChildren(String),
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

pub use lfs::{EvictionPolicy, FileMeta, LogicalFileSystem};
pub use proxy::{ProxyLocation, ProxyStorageService};
pub use registry::{FileRegistryService, RegistryEndpoint};
pub use simple::SimpleStorageService;
