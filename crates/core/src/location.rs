// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File locations: where a file lives (or will live) on the platform.
//!
//! A location ties a file to a `(storage service, mount point, path)`
//! triple. The *scratch* sentinel is resolved by a compute service against
//! its own scratch space at execution time; it is an error anywhere else.

use crate::file::File;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Name of a service instance (storage or compute).
    pub struct ServiceName("svc-");
}

crate::define_id! {
    /// Name of a simulated host.
    pub struct HostName("host");
}

/// A file location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Location {
    /// A concrete slot on a storage service.
    Storage {
        service: ServiceName,
        /// Mount point of the target logical file system, canonicalised.
        mount: String,
        /// Directory path under the mount point, canonicalised.
        path: String,
        file: File,
    },
    /// Sentinel resolved against the executing compute service's scratch.
    Scratch { file: File },
}

impl Location {
    /// Location at `path` under the given mount point of `service`.
    pub fn new(service: impl Into<ServiceName>, mount: &str, path: &str, file: File) -> Self {
        Location::Storage {
            service: service.into(),
            mount: canonical_path(mount),
            path: canonical_path(path),
            file,
        }
    }

    /// Location at the root directory of the service's sole mount point.
    ///
    /// The mount is resolved by the storage service when the location is
    /// first used; until then it is the catch-all `/`.
    pub fn at_root(service: impl Into<ServiceName>, file: File) -> Self {
        Location::Storage {
            service: service.into(),
            mount: "/".to_string(),
            path: "/".to_string(),
            file,
        }
    }

    /// Scratch sentinel, valid only inside a compute service with scratch.
    pub fn scratch(file: File) -> Self {
        Location::Scratch { file }
    }

    pub fn file(&self) -> &File {
        match self {
            Location::Storage { file, .. } | Location::Scratch { file } => file,
        }
    }

    pub fn is_scratch(&self) -> bool {
        matches!(self, Location::Scratch { .. })
    }

    /// The storage service this location names, if not scratch.
    pub fn service(&self) -> Option<&ServiceName> {
        match self {
            Location::Storage { service, .. } => Some(service),
            Location::Scratch { .. } => None,
        }
    }

    /// Directory path under the mount point (`/` for scratch).
    pub fn path(&self) -> &str {
        match self {
            Location::Storage { path, .. } => path,
            Location::Scratch { .. } => "/",
        }
    }

    pub fn mount(&self) -> &str {
        match self {
            Location::Storage { mount, .. } => mount,
            Location::Scratch { .. } => "/",
        }
    }

    /// Two locations denote the same physical slot when their canonical
    /// forms are equal. Construction canonicalises, so this is plain
    /// equality; exposed for intent at call sites.
    pub fn same_slot(&self, other: &Location) -> bool {
        self == other
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Storage { service, mount, path, file } => {
                write!(f, "{}:{}{}/{}", service, mount_prefix(mount), path, file.id())
            }
            Location::Scratch { file } => write!(f, "scratch:{}", file.id()),
        }
    }
}

fn mount_prefix(mount: &str) -> &str {
    if mount == "/" {
        ""
    } else {
        mount
    }
}

/// Canonicalise a directory path: leading `/`, collapsed separators,
/// `.` segments dropped, no trailing `/` (except the root itself).
pub fn canonical_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// True when `outer` equals `inner` or is a proper path prefix of it.
///
/// `/data` is a prefix of `/data/set1` but not of `/database`.
pub fn path_is_prefix(outer: &str, inner: &str) -> bool {
    let outer = canonical_path(outer);
    let inner = canonical_path(inner);
    if outer == "/" {
        return true;
    }
    inner == outer || inner.starts_with(&format!("{outer}/"))
}

#[cfg(test)]
#[path = "location_tests.rs"]
mod tests;
