// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Simulated data files.
//!
//! A file is pure identity plus a declared size; its content is never
//! simulated. Files are registered once with the simulation and may then
//! exist at zero or more [`Location`](crate::location::Location)s.

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a simulated file.
    ///
    /// Usually a user-chosen name (`"input.dat"`); `generate()` is used for
    /// internal scratch files.
    pub struct FileId("file");
}

/// A simulated file: immutable identity and declared byte size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct File {
    id: FileId,
    size: u64,
}

impl File {
    pub fn new(id: impl Into<FileId>, size: u64) -> Self {
        Self { id: id.into(), size }
    }

    pub fn id(&self) -> &FileId {
        &self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl std::fmt::Display for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} B)", self.id, self.size)
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
