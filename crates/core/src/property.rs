// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service configuration maps.
//!
//! Services accept two string-keyed mappings at construction: semantic
//! *property* knobs and per-RPC *message payload* byte sizes. The surface
//! stays mapping-shaped; internally the keys are enums so typos fail at
//! construction instead of being silently ignored.

use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("unknown service property {0:?}")]
    UnknownProperty(String),
    #[error("unknown message payload {0:?}")]
    UnknownPayload(String),
    #[error("property {key}: cannot parse {value:?} as {wanted}")]
    BadValue { key: &'static str, value: String, wanted: &'static str },
}

/// Semantic configuration knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceProperty {
    /// Batch: `fcfs`, `easy_bf`, `conservative_bf`.
    BatchSchedulingAlgorithm,
    /// Batch host choice: `first_fit`, `best_fit`, `round_robin`.
    /// Cloud VM placement: `first_fit`, `best_fit_ram`, `best_fit_cores`.
    HostSelectionAlgorithm,
    /// Storage streaming chunk size in bytes; `0` means one-shot.
    BufferSize,
    /// Storage LFS eviction: `none`, `lru`.
    CachingBehavior,
    SupportsPilotJobs,
    /// Proxy: seconds a cached replica entry stays fresh.
    CacheMaxLifetime,
    /// Proxy: collapse the tree walk into a best-child lookup.
    ReducedSimulation,
    /// HTCondor overheads, seconds.
    NegotiatorStartupOverhead,
    PreGridJobOverhead,
    PreNonGridJobOverhead,
    /// Cloud: seconds charged when a VM boots.
    VmBootOverhead,
    /// Batch: seconds added to every walltime before enforcement.
    WalltimePadding,
    /// Service restarts when its host comes back up.
    AutoRestart,
}

impl ServiceProperty {
    pub fn key(self) -> &'static str {
        match self {
            ServiceProperty::BatchSchedulingAlgorithm => "BATCH_SCHEDULING_ALGORITHM",
            ServiceProperty::HostSelectionAlgorithm => "HOST_SELECTION_ALGORITHM",
            ServiceProperty::BufferSize => "BUFFER_SIZE",
            ServiceProperty::CachingBehavior => "CACHING_BEHAVIOR",
            ServiceProperty::SupportsPilotJobs => "SUPPORTS_PILOT_JOBS",
            ServiceProperty::CacheMaxLifetime => "CACHE_MAX_LIFETIME",
            ServiceProperty::ReducedSimulation => "REDUCED_SIMULATION",
            ServiceProperty::NegotiatorStartupOverhead => "NEGOTIATOR_STARTUP_OVERHEAD",
            ServiceProperty::PreGridJobOverhead => "PRE_GRID_JOB_OVERHEAD",
            ServiceProperty::PreNonGridJobOverhead => "PRE_NON_GRID_JOB_OVERHEAD",
            ServiceProperty::VmBootOverhead => "VM_BOOT_OVERHEAD",
            ServiceProperty::WalltimePadding => "WALLTIME_PADDING",
            ServiceProperty::AutoRestart => "AUTO_RESTART",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        const ALL: [ServiceProperty; 13] = [
            ServiceProperty::BatchSchedulingAlgorithm,
            ServiceProperty::HostSelectionAlgorithm,
            ServiceProperty::BufferSize,
            ServiceProperty::CachingBehavior,
            ServiceProperty::SupportsPilotJobs,
            ServiceProperty::CacheMaxLifetime,
            ServiceProperty::ReducedSimulation,
            ServiceProperty::NegotiatorStartupOverhead,
            ServiceProperty::PreGridJobOverhead,
            ServiceProperty::PreNonGridJobOverhead,
            ServiceProperty::VmBootOverhead,
            ServiceProperty::WalltimePadding,
            ServiceProperty::AutoRestart,
        ];
        ALL.into_iter().find(|p| p.key() == key)
    }
}

/// Typed view over a string-keyed property mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap {
    values: IndexMap<ServiceProperty, String>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(key, value)` string pairs; unknown keys are rejected.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, PropertyError> {
        let mut map = Self::new();
        for (k, v) in pairs {
            let key = ServiceProperty::from_key(k)
                .ok_or_else(|| PropertyError::UnknownProperty(k.to_string()))?;
            map.values.insert(key, v.to_string());
        }
        Ok(map)
    }

    pub fn set(&mut self, key: ServiceProperty, value: impl Into<String>) -> &mut Self {
        self.values.insert(key, value.into());
        self
    }

    pub fn with(mut self, key: ServiceProperty, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    pub fn get(&self, key: ServiceProperty) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn get_or(&self, key: ServiceProperty, default: &'static str) -> &str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_f64(&self, key: ServiceProperty, default: f64) -> Result<f64, PropertyError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| PropertyError::BadValue {
                key: key.key(),
                value: v.to_string(),
                wanted: "f64",
            }),
        }
    }

    pub fn get_u64(&self, key: ServiceProperty, default: u64) -> Result<u64, PropertyError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| PropertyError::BadValue {
                key: key.key(),
                value: v.to_string(),
                wanted: "u64",
            }),
        }
    }

    pub fn get_bool(&self, key: ServiceProperty, default: bool) -> Result<bool, PropertyError> {
        match self.get(key) {
            None => Ok(default),
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            Some(v) => Err(PropertyError::BadValue {
                key: key.key(),
                value: v.to_string(),
                wanted: "bool",
            }),
        }
    }
}

/// RPC kinds whose control messages carry a configurable byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessagePayload {
    DaemonStopped,
    JobSubmitRequest,
    JobSubmitAnswer,
    JobDoneNotification,
    JobFailedNotification,
    JobKillRequest,
    JobKillAnswer,
    ResourceInfoRequest,
    ResourceInfoAnswer,
    FreeSpaceRequest,
    FreeSpaceAnswer,
    FileLookupRequest,
    FileLookupAnswer,
    FileDeleteRequest,
    FileDeleteAnswer,
    FileReadRequest,
    FileReadAnswer,
    FileWriteRequest,
    FileWriteAnswer,
    FileCopyRequest,
    FileCopyAnswer,
    RegistryAddRequest,
    RegistryAddAnswer,
    RegistryLookupRequest,
    RegistryLookupAnswer,
    RegistryRemoveRequest,
    RegistryRemoveAnswer,
    VmCreateRequest,
    VmCreateAnswer,
    VmLifecycleRequest,
    VmLifecycleAnswer,
}

impl MessagePayload {
    pub fn key(self) -> &'static str {
        match self {
            MessagePayload::DaemonStopped => "DAEMON_STOPPED_PAYLOAD",
            MessagePayload::JobSubmitRequest => "JOB_SUBMIT_REQUEST_PAYLOAD",
            MessagePayload::JobSubmitAnswer => "JOB_SUBMIT_ANSWER_PAYLOAD",
            MessagePayload::JobDoneNotification => "JOB_DONE_PAYLOAD",
            MessagePayload::JobFailedNotification => "JOB_FAILED_PAYLOAD",
            MessagePayload::JobKillRequest => "JOB_KILL_REQUEST_PAYLOAD",
            MessagePayload::JobKillAnswer => "JOB_KILL_ANSWER_PAYLOAD",
            MessagePayload::ResourceInfoRequest => "RESOURCE_INFO_REQUEST_PAYLOAD",
            MessagePayload::ResourceInfoAnswer => "RESOURCE_INFO_ANSWER_PAYLOAD",
            MessagePayload::FreeSpaceRequest => "FREE_SPACE_REQUEST_PAYLOAD",
            MessagePayload::FreeSpaceAnswer => "FREE_SPACE_ANSWER_PAYLOAD",
            MessagePayload::FileLookupRequest => "FILE_LOOKUP_REQUEST_PAYLOAD",
            MessagePayload::FileLookupAnswer => "FILE_LOOKUP_ANSWER_PAYLOAD",
            MessagePayload::FileDeleteRequest => "FILE_DELETE_REQUEST_PAYLOAD",
            MessagePayload::FileDeleteAnswer => "FILE_DELETE_ANSWER_PAYLOAD",
            MessagePayload::FileReadRequest => "FILE_READ_REQUEST_PAYLOAD",
            MessagePayload::FileReadAnswer => "FILE_READ_ANSWER_PAYLOAD",
            MessagePayload::FileWriteRequest => "FILE_WRITE_REQUEST_PAYLOAD",
            MessagePayload::FileWriteAnswer => "FILE_WRITE_ANSWER_PAYLOAD",
            MessagePayload::FileCopyRequest => "FILE_COPY_REQUEST_PAYLOAD",
            MessagePayload::FileCopyAnswer => "FILE_COPY_ANSWER_PAYLOAD",
            MessagePayload::RegistryAddRequest => "REGISTRY_ADD_REQUEST_PAYLOAD",
            MessagePayload::RegistryAddAnswer => "REGISTRY_ADD_ANSWER_PAYLOAD",
            MessagePayload::RegistryLookupRequest => "REGISTRY_LOOKUP_REQUEST_PAYLOAD",
            MessagePayload::RegistryLookupAnswer => "REGISTRY_LOOKUP_ANSWER_PAYLOAD",
            MessagePayload::RegistryRemoveRequest => "REGISTRY_REMOVE_REQUEST_PAYLOAD",
            MessagePayload::RegistryRemoveAnswer => "REGISTRY_REMOVE_ANSWER_PAYLOAD",
            MessagePayload::VmCreateRequest => "VM_CREATE_REQUEST_PAYLOAD",
            MessagePayload::VmCreateAnswer => "VM_CREATE_ANSWER_PAYLOAD",
            MessagePayload::VmLifecycleRequest => "VM_LIFECYCLE_REQUEST_PAYLOAD",
            MessagePayload::VmLifecycleAnswer => "VM_LIFECYCLE_ANSWER_PAYLOAD",
        }
    }
}

/// Per-RPC control-message byte sizes. Missing entries fall back to the
/// map's default (0 B: control messages cost only latency).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadMap {
    values: IndexMap<MessagePayload, u64>,
    default: u64,
}

impl PayloadMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uniform payload for every RPC kind (handy in tests).
    pub fn uniform(bytes: u64) -> Self {
        Self { values: IndexMap::new(), default: bytes }
    }

    pub fn set(&mut self, kind: MessagePayload, bytes: u64) -> &mut Self {
        self.values.insert(kind, bytes);
        self
    }

    pub fn with(mut self, kind: MessagePayload, bytes: u64) -> Self {
        self.values.insert(kind, bytes);
        self
    }

    pub fn get(&self, kind: MessagePayload) -> u64 {
        self.values.get(&kind).copied().unwrap_or(self.default)
    }
}

#[cfg(test)]
#[path = "property_tests.rs"]
mod tests;
