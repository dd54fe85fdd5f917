// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logical file systems: per-mount-point bookkeeping of stored files,
//! reservations, pinning, and eviction.
//!
//! Space conservation invariant, checked in tests:
//! `free + sum(stored sizes) + reserved == total`.

use gantry_core::{canonical_path, FailureCause, File, FileId, ServiceName};
use indexmap::IndexMap;

/// What happens when a reservation does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// The reservation fails.
    #[default]
    None,
    /// Unpinned files are evicted in ascending last-read order until the
    /// reservation fits or nothing evictable remains.
    Lru,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileMeta {
    pub size: u64,
    pub last_write_date: f64,
    pub last_read_date: f64,
    pub pinned: u32,
}

/// One mount point's worth of storage state.
#[derive(Debug)]
pub struct LogicalFileSystem {
    mount: String,
    total: u64,
    free: u64,
    reserved: u64,
    policy: EvictionPolicy,
    /// directory path -> file -> metadata
    dirs: IndexMap<String, IndexMap<FileId, FileMeta>>,
    /// `/dev/null` sink: infinite capacity, no state retained.
    sink: bool,
}

impl LogicalFileSystem {
    pub fn new(mount: &str, total_capacity: u64, policy: EvictionPolicy) -> Self {
        let mount = canonical_path(mount);
        let sink = mount == "/dev/null";
        Self {
            mount,
            total: total_capacity,
            free: total_capacity,
            reserved: 0,
            policy,
            dirs: IndexMap::new(),
            sink,
        }
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    pub fn total_capacity(&self) -> u64 {
        self.total
    }

    pub fn free_space(&self) -> u64 {
        if self.sink {
            u64::MAX
        } else {
            self.free
        }
    }

    pub fn reserved_space(&self) -> u64 {
        self.reserved
    }

    pub fn occupied_space(&self) -> u64 {
        self.dirs.values().flat_map(|d| d.values()).map(|m| m.size).sum()
    }

    pub fn is_sink(&self) -> bool {
        self.sink
    }

    /// Reserve `size` bytes ahead of a write, evicting per policy.
    pub fn reserve(
        &mut self,
        size: u64,
        service: &ServiceName,
        now: f64,
    ) -> Result<(), FailureCause> {
        if self.sink {
            return Ok(());
        }
        if self.free < size && self.policy == EvictionPolicy::Lru {
            self.evict_lru_until(size, now);
        }
        if self.free < size {
            return Err(FailureCause::StorageNotEnoughSpace {
                service: service.clone(),
                needed: size,
                available: self.free,
            });
        }
        self.free -= size;
        self.reserved += size;
        Ok(())
    }

    /// Return a reservation unused (failed or aborted write). A no-op
    /// beyond what is actually reserved.
    pub fn release_reservation(&mut self, size: u64) {
        if self.sink {
            return;
        }
        let returned = size.min(self.reserved);
        self.reserved -= returned;
        self.free += returned;
    }

    /// Convert a reservation into a stored file.
    pub fn commit(&mut self, path: &str, file: &File, now: f64) {
        if self.sink {
            return;
        }
        let size = file.size().min(self.reserved);
        self.reserved -= size;
        self.dirs.entry(canonical_path(path)).or_default().insert(
            file.id().clone(),
            FileMeta { size: file.size(), last_write_date: now, last_read_date: now, pinned: 0 },
        );
    }

    /// Store a file directly (staging before launch); requires free
    /// space, no eviction, no overwrite.
    pub fn store(
        &mut self,
        path: &str,
        file: &File,
        service: &ServiceName,
        now: f64,
    ) -> Result<(), FailureCause> {
        if self.sink {
            return Ok(());
        }
        if self.contains(path, file.id()) {
            return Err(FailureCause::FileAlreadyThere {
                file: file.id().clone(),
                location: format!("{}:{}", self.mount, canonical_path(path)),
            });
        }
        if self.free < file.size() {
            return Err(FailureCause::StorageNotEnoughSpace {
                service: service.clone(),
                needed: file.size(),
                available: self.free,
            });
        }
        self.free -= file.size();
        self.dirs.entry(canonical_path(path)).or_default().insert(
            file.id().clone(),
            FileMeta { size: file.size(), last_write_date: now, last_read_date: now, pinned: 0 },
        );
        Ok(())
    }

    pub fn contains(&self, path: &str, file: &FileId) -> bool {
        if self.sink {
            return false;
        }
        self.dirs
            .get(&canonical_path(path))
            .map(|d| d.contains_key(file))
            .unwrap_or(false)
    }

    pub fn meta(&self, path: &str, file: &FileId) -> Option<&FileMeta> {
        self.dirs.get(&canonical_path(path))?.get(file)
    }

    /// Remove a stored file, returning its size.
    pub fn remove(&mut self, path: &str, file: &FileId) -> Result<u64, FailureCause> {
        if self.sink {
            return Err(FailureCause::FileNotFound {
                file: file.clone(),
                location: format!("{}:{}", self.mount, path),
            });
        }
        let dir = canonical_path(path);
        let meta = self
            .dirs
            .get_mut(&dir)
            .and_then(|d| d.shift_remove(file))
            .ok_or_else(|| FailureCause::FileNotFound {
                file: file.clone(),
                location: format!("{}:{}", self.mount, dir),
            })?;
        self.free += meta.size;
        Ok(meta.size)
    }

    pub fn touch_read(&mut self, path: &str, file: &FileId, now: f64) {
        if let Some(m) = self.dirs.get_mut(&canonical_path(path)).and_then(|d| d.get_mut(file)) {
            m.last_read_date = now;
        }
    }

    /// Pin a file against eviction (and concurrent deletion) while a
    /// transfer is in flight.
    pub fn pin(&mut self, path: &str, file: &FileId) {
        if let Some(m) = self.dirs.get_mut(&canonical_path(path)).and_then(|d| d.get_mut(file)) {
            m.pinned += 1;
        }
    }

    pub fn unpin(&mut self, path: &str, file: &FileId) {
        if let Some(m) = self.dirs.get_mut(&canonical_path(path)).and_then(|d| d.get_mut(file)) {
            m.pinned = m.pinned.saturating_sub(1);
        }
    }

    /// All files under the mount (for scratch cleanup).
    pub fn all_files(&self) -> Vec<(String, FileId)> {
        self.dirs
            .iter()
            .flat_map(|(dir, files)| files.keys().map(move |f| (dir.clone(), f.clone())))
            .collect()
    }

    fn evict_lru_until(&mut self, needed: u64, _now: f64) {
        while self.free < needed {
            // Oldest unpinned read date across every directory.
            let victim = self
                .dirs
                .iter()
                .flat_map(|(dir, files)| {
                    files
                        .iter()
                        .filter(|(_, m)| m.pinned == 0)
                        .map(move |(id, m)| (dir.clone(), id.clone(), m.last_read_date))
                })
                .min_by(|a, b| a.2.total_cmp(&b.2));
            let Some((dir, id, _)) = victim else { return };
            if let Some(meta) = self.dirs.get_mut(&dir).and_then(|d| d.shift_remove(&id)) {
                tracing::debug!(mount = %self.mount, file = %id, "evicted (lru)");
                self.free += meta.size;
            }
        }
    }
}

#[cfg(test)]
#[path = "lfs_tests.rs"]
mod tests;
