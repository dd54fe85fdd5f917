// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The simple storage service: one actor serving the §storage protocol
//! over a set of logical file systems (one per mount point).
//!
//! Transfers are streamed by short-lived child actors so the main loop
//! keeps serving requests; chunked streams pipeline disk and network by
//! construction (one stage per actor).

use crate::lfs::{EvictionPolicy, LogicalFileSystem};
use crate::messages::*;
use crate::{StorageEndpoint, StorageError};
use gantry_core::{
    canonical_path, path_is_prefix, FailureCause, FileId, HostName, Location, MessagePayload,
    PayloadMap, PropertyMap, ServiceProperty,
};
use gantry_kernel::{ActorId, Commport, Kernel, KernelError, SimContext};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Default streaming chunk size, bytes.
const DEFAULT_BUFFER_SIZE: u64 = 1_048_576;

struct Mount {
    lfs: LogicalFileSystem,
    read_bw: f64,
    write_bw: f64,
}

struct State {
    mounts: IndexMap<String, Mount>,
    /// Write exclusion per `(mount, path, file)` slot.
    writes_in_progress: BTreeSet<(String, String, FileId)>,
}

/// A storage service instance. Create, then `start`, then hand the
/// [`StorageEndpoint`] to clients.
pub struct SimpleStorageService {
    name: gantry_core::ServiceName,
    host: HostName,
    port: Commport,
    payloads: PayloadMap,
    buffer_size: u64,
    kernel: Kernel,
    state: Rc<RefCell<State>>,
    actor: RefCell<Option<ActorId>>,
}

impl std::fmt::Debug for SimpleStorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleStorageService")
            .field("name", &self.name)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl SimpleStorageService {
    /// Build a service exposing `mount_points` of `host`'s disks.
    ///
    /// Each mount must name a disk on the host (except the `/dev/null`
    /// sink); mounts may not repeat or prefix one another.
    pub fn new(
        kernel: &Kernel,
        name: &str,
        host: &str,
        mount_points: &[&str],
        props: &PropertyMap,
        payloads: PayloadMap,
    ) -> Result<Rc<Self>, StorageError> {
        let host = HostName::new(host);
        let policy = match props.get_or(ServiceProperty::CachingBehavior, "none") {
            "none" => EvictionPolicy::None,
            "lru" => EvictionPolicy::Lru,
            other => return Err(StorageError::UnknownPolicy(other.to_string())),
        };
        let buffer_size = props.get_u64(ServiceProperty::BufferSize, DEFAULT_BUFFER_SIZE)?;

        let mut mounts: IndexMap<String, Mount> = IndexMap::new();
        for &raw in mount_points {
            let mount = canonical_path(raw);
            for existing in mounts.keys() {
                if path_is_prefix(existing, &mount) || path_is_prefix(&mount, existing) {
                    return Err(StorageError::OverlappingMounts {
                        a: existing.clone(),
                        b: mount.clone(),
                    });
                }
            }
            let (capacity, read_bw, write_bw) = if mount == "/dev/null" {
                (u64::MAX, f64::INFINITY, f64::INFINITY)
            } else {
                let disk = kernel
                    .platform(|p| p.disk(&host, &mount).cloned())
                    .ok_or_else(|| StorageError::NoSuchDisk {
                        host: host.clone(),
                        mount: mount.clone(),
                    })?;
                (disk.capacity, disk.read_bw, disk.write_bw)
            };
            mounts.insert(
                mount.clone(),
                Mount { lfs: LogicalFileSystem::new(&mount, capacity, policy), read_bw, write_bw },
            );
        }

        let port = kernel.create_commport(&format!("storage-{name}"), &host)?;
        Ok(Rc::new(Self {
            name: gantry_core::ServiceName::new(name),
            host,
            port,
            payloads,
            buffer_size,
            kernel: kernel.clone(),
            state: Rc::new(RefCell::new(State { mounts, writes_in_progress: BTreeSet::new() })),
            actor: RefCell::new(None),
        }))
    }

    pub fn name(&self) -> &gantry_core::ServiceName {
        &self.name
    }

    pub fn host(&self) -> &HostName {
        &self.host
    }

    pub fn endpoint(&self) -> StorageEndpoint {
        StorageEndpoint {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port.clone(),
            payloads: self.payloads.clone(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.actor.borrow().map(|a| self.kernel.is_live(a)).unwrap_or(false)
    }

    /// Free space across all mounts (setup/inspection; clients use the
    /// `FreeSpaceRequest` RPC).
    pub fn free_space(&self) -> u64 {
        self.state.borrow().mounts.values().map(|m| m.lfs.free_space()).sum()
    }

    pub fn has_file(&self, location: &Location) -> bool {
        let st = self.state.borrow();
        match resolve(&st, location) {
            Ok((mount, dir)) => st.mounts[&mount].lfs.contains(&dir, location.file().id()),
            Err(_) => false,
        }
    }

    /// Place a file directly, bypassing the protocol (pre-launch
    /// staging).
    pub fn stage_file(&self, location: &Location) -> Result<(), FailureCause> {
        let mut st = self.state.borrow_mut();
        let (mount, dir) = resolve(&st, location)?;
        let now = self.kernel.now();
        let name = self.name.clone();
        st.mounts[&mount].lfs.store(&dir, location.file(), &name, now)
    }

    /// Drop every file under `dir` on all mounts (scratch cleanup at
    /// job end).
    pub fn purge_dir(&self, dir: &str) {
        let mut st = self.state.borrow_mut();
        let dir = canonical_path(dir);
        for mount in st.mounts.values_mut() {
            for (d, id) in mount.lfs.all_files() {
                if path_is_prefix(&dir, &d) {
                    let _ = mount.lfs.remove(&d, &id);
                }
            }
        }
    }

    /// Spawn the service actor.
    pub fn start(self: &Rc<Self>) -> Result<(), KernelError> {
        let svc = self.clone();
        let port = self.port.clone();
        let id = self.kernel.spawn(
            &format!("storage-{}", self.name),
            &self.host.clone(),
            true,
            move |ctx| async move {
                tracing::info!(service = %svc.name, host = %svc.host, "storage service up");
                loop {
                    let msg = ctx.get(&port).await?;
                    svc.dispatch(&ctx, msg)?;
                }
            },
        )?;
        *self.actor.borrow_mut() = Some(id);
        Ok(())
    }

    /// Stop the service actor; in-flight transfers are abandoned.
    pub fn stop(&self) {
        if let Some(id) = self.actor.borrow_mut().take() {
            self.kernel.kill(id);
        }
    }

    fn dispatch(self: &Rc<Self>, ctx: &SimContext, msg: gantry_kernel::AnyMessage) -> Result<(), KernelError> {
        let msg = match msg.downcast::<FreeSpaceRequest>() {
            Ok(req) => {
                let free = self.free_space_for(req.path.as_deref());
                return ctx.dput(
                    &req.reply_to,
                    FreeSpaceAnswer { free_space: free },
                    self.payloads.get(MessagePayload::FreeSpaceAnswer),
                );
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<FileLookupRequest>() {
            Ok(req) => {
                let found = self.has_file(&req.location);
                if found {
                    let mut st = self.state.borrow_mut();
                    if let Ok((mount, dir)) = resolve(&st, &req.location) {
                        let now = ctx.now();
                        st.mounts[&mount].lfs.touch_read(&dir, req.location.file().id(), now);
                    }
                }
                return ctx.dput(
                    &req.reply_to,
                    FileLookupAnswer { found },
                    self.payloads.get(MessagePayload::FileLookupAnswer),
                );
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<FileDeleteRequest>() {
            Ok(req) => {
                let result = self.delete(&req.location);
                return ctx.dput(
                    &req.reply_to,
                    FileDeleteAnswer { result },
                    self.payloads.get(MessagePayload::FileDeleteAnswer),
                );
            }
            Err(m) => m,
        };
        let msg = match msg.downcast::<FileWriteRequest>() {
            Ok(req) => return self.start_write(ctx, req),
            Err(m) => m,
        };
        let msg = match msg.downcast::<FileReadRequest>() {
            Ok(req) => return self.start_read(ctx, req),
            Err(m) => m,
        };
        let msg = match msg.downcast::<FileCopyRequest>() {
            Ok(req) => return self.start_copy(ctx, req),
            Err(m) => m,
        };
        tracing::warn!(service = %self.name, got = msg.type_name(), "unexpected message");
        Ok(())
    }

    fn free_space_for(&self, path: Option<&str>) -> u64 {
        let st = self.state.borrow();
        match path {
            None => st.mounts.values().map(|m| m.lfs.free_space()).sum(),
            Some(p) => st
                .mounts
                .iter()
                .filter(|(mount, _)| path_is_prefix(mount, p))
                .map(|(_, m)| m.lfs.free_space())
                .sum(),
        }
    }

    fn delete(&self, location: &Location) -> Result<(), FailureCause> {
        let mut st = self.state.borrow_mut();
        let (mount, dir) = resolve(&st, location)?;
        let id = location.file().id().clone();
        if st.mounts[&mount].lfs.meta(&dir, &id).map(|m| m.pinned > 0).unwrap_or(false) {
            return Err(FailureCause::FileAlreadyBeingCopied {
                file: id,
                location: location.to_string(),
            });
        }
        st.mounts[&mount].lfs.remove(&dir, &id).map(|_| ())
    }

    /// Reserve space and spawn the writer child; answers the client with
    /// a ticket (or the failure).
    fn start_write(
        self: &Rc<Self>,
        ctx: &SimContext,
        req: FileWriteRequest,
    ) -> Result<(), KernelError> {
        let answer_payload = self.payloads.get(MessagePayload::FileWriteAnswer);
        let prep = self.prepare_write(ctx.now(), &req.location, req.num_bytes);
        let (mount, dir) = match prep {
            Err(cause) => {
                return ctx.dput(
                    &req.reply_to,
                    FileWriteAnswer { result: Err(cause) },
                    answer_payload,
                );
            }
            Ok(v) => v,
        };
        let data_port = ctx.create_commport("write-stream")?;
        ctx.dput(
            &req.reply_to,
            FileWriteAnswer {
                result: Ok(WriteTicket {
                    data_port: data_port.clone(),
                    buffer_size: self.buffer_size,
                }),
            },
            answer_payload,
        )?;
        let svc = self.clone();
        let write_bw = self.state.borrow().mounts[&mount].write_bw;
        ctx.spawn_daemon(
            &format!("{}-writer", self.name),
            &self.host.clone(),
            move |cctx| async move {
                let outcome = svc.run_writer(&cctx, &data_port, write_bw).await;
                svc.finish_write(&cctx, &mount, &dir, &req.location, outcome.clone());
                cctx.dput(
                    &req.reply_to,
                    FileWriteFinished { result: outcome },
                    svc.payloads.get(MessagePayload::FileWriteAnswer),
                )?;
                Ok(())
            },
        )?;
        Ok(())
    }

    fn prepare_write(
        &self,
        now: f64,
        location: &Location,
        num_bytes: u64,
    ) -> Result<(String, String), FailureCause> {
        let mut st = self.state.borrow_mut();
        let (mount, dir) = resolve(&st, location)?;
        let id = location.file().id().clone();
        let slot = (mount.clone(), dir.clone(), id.clone());
        if st.writes_in_progress.contains(&slot) {
            return Err(FailureCause::FileAlreadyBeingCopied {
                file: id,
                location: location.to_string(),
            });
        }
        // Overwrite: the previous copy is dropped before reserving.
        if st.mounts[&mount].lfs.contains(&dir, &id) {
            let _ = st.mounts[&mount].lfs.remove(&dir, &id);
        }
        let name = self.name.clone();
        st.mounts[&mount].lfs.reserve(num_bytes, &name, now)?;
        st.writes_in_progress.insert(slot);
        Ok((mount, dir))
    }

    async fn run_writer(
        &self,
        ctx: &SimContext,
        data_port: &Commport,
        write_bw: f64,
    ) -> Result<(), FailureCause> {
        loop {
            let chunk = match ctx.expect::<FileChunk>(data_port).await {
                Ok(c) => c,
                Err(e) => return Err(e.into()),
            };
            if write_bw.is_finite() && chunk.bytes > 0 {
                if let Err(e) = ctx.sleep(chunk.bytes as f64 / write_bw).await {
                    return Err(e.into());
                }
            }
            if chunk.last {
                return Ok(());
            }
        }
    }

    fn finish_write(
        &self,
        ctx: &SimContext,
        mount: &str,
        dir: &str,
        location: &Location,
        outcome: Result<(), FailureCause>,
    ) {
        let mut st = self.state.borrow_mut();
        let slot = (mount.to_string(), dir.to_string(), location.file().id().clone());
        st.writes_in_progress.remove(&slot);
        match outcome {
            Ok(()) => st.mounts[mount].lfs.commit(dir, location.file(), ctx.now()),
            Err(_) => st.mounts[mount].lfs.release_reservation(location.file().size()),
        }
    }

    /// Look the file up and spawn the two-stage reader pipeline.
    fn start_read(
        self: &Rc<Self>,
        ctx: &SimContext,
        req: FileReadRequest,
    ) -> Result<(), KernelError> {
        let answer_payload = self.payloads.get(MessagePayload::FileReadAnswer);
        let (mount, dir) = {
            let mut st = self.state.borrow_mut();
            match resolve(&st, &req.location) {
                Err(cause) => {
                    return ctx.dput(
                        &req.reply_to,
                        FileReadAnswer { result: Err(cause) },
                        answer_payload,
                    );
                }
                Ok((mount, dir)) => {
                    let id = req.location.file().id();
                    if !st.mounts[&mount].lfs.contains(&dir, id) {
                        let cause = FailureCause::FileNotFound {
                            file: id.clone(),
                            location: req.location.to_string(),
                        };
                        return ctx.dput(
                            &req.reply_to,
                            FileReadAnswer { result: Err(cause) },
                            answer_payload,
                        );
                    }
                    let now = ctx.now();
                    st.mounts[&mount].lfs.touch_read(&dir, id, now);
                    st.mounts[&mount].lfs.pin(&dir, id);
                    (mount, dir)
                }
            }
        };
        let num_bytes = req.num_bytes.unwrap_or(req.location.file().size());
        ctx.dput(
            &req.reply_to,
            FileReadAnswer {
                result: Ok(ReadTicket { buffer_size: self.buffer_size, num_bytes }),
            },
            answer_payload,
        )?;

        // Stage 1 reads the disk, stage 2 owns the network; together the
        // stream pipelines max(disk, net) per chunk.
        let read_bw = self.state.borrow().mounts[&mount].read_bw;
        let stage_port = ctx.create_commport("read-stage")?;
        let svc = self.clone();
        let sender_port = stage_port.clone();
        let client_port = req.data_port.clone();
        ctx.spawn_daemon(&format!("{}-read-net", self.name), &self.host.clone(), move |cctx| async move {
            loop {
                let chunk = cctx.expect::<FileChunk>(&sender_port).await?;
                let last = chunk.last;
                let bytes = chunk.bytes;
                cctx.put(&client_port, chunk, bytes).await?;
                if last {
                    return Ok(());
                }
            }
        })?;
        let location = req.location.clone();
        ctx.spawn_daemon(&format!("{}-read-disk", self.name), &self.host.clone(), move |cctx| async move {
            let buffer = svc.buffer_size;
            let mut remaining = num_bytes;
            loop {
                let chunk = if buffer == 0 { remaining } else { remaining.min(buffer) };
                remaining -= chunk;
                if read_bw.is_finite() && chunk > 0 {
                    cctx.sleep(chunk as f64 / read_bw).await?;
                }
                let last = remaining == 0;
                cctx.dput(&stage_port, FileChunk { bytes: chunk, last }, 0)?;
                if last {
                    break;
                }
            }
            let mut st = svc.state.borrow_mut();
            st.mounts[&mount].lfs.unpin(&dir, location.file().id());
            Ok(())
        })?;
        Ok(())
    }

    /// Copy = a write to self fed by a read from the source service.
    fn start_copy(
        self: &Rc<Self>,
        ctx: &SimContext,
        req: FileCopyRequest,
    ) -> Result<(), KernelError> {
        let answer_payload = self.payloads.get(MessagePayload::FileCopyAnswer);
        let num_bytes = req.src.file().size();
        let prep = self.prepare_write(ctx.now(), &req.dst, num_bytes);
        let (mount, dir) = match prep {
            Err(cause) => {
                return ctx.dput(
                    &req.reply_to,
                    FileCopyAnswer { result: Err(cause) },
                    answer_payload,
                );
            }
            Ok(v) => v,
        };
        let svc = self.clone();
        let write_bw = self.state.borrow().mounts[&mount].write_bw;
        ctx.spawn_daemon(&format!("{}-copier", self.name), &self.host.clone(), move |cctx| async move {
            let outcome = svc.run_copy(&cctx, &req, write_bw).await;
            svc.finish_write(&cctx, &mount, &dir, &req.dst, outcome.clone());
            if outcome.is_ok() {
                tracing::debug!(service = %svc.name, file = %req.src.file().id(), "copy complete");
            }
            cctx.dput(
                &req.reply_to,
                FileCopyAnswer { result: outcome },
                svc.payloads.get(MessagePayload::FileCopyAnswer),
            )?;
            Ok(())
        })?;
        Ok(())
    }

    async fn run_copy(
        &self,
        ctx: &SimContext,
        req: &FileCopyRequest,
        write_bw: f64,
    ) -> Result<(), FailureCause> {
        let reply_to = ctx.create_commport("copy-reply").map_err(FailureCause::from)?;
        let data_port = ctx.create_commport("copy-data").map_err(FailureCause::from)?;
        ctx.put(
            &req.src_endpoint.port,
            FileReadRequest {
                reply_to: reply_to.clone(),
                data_port: data_port.clone(),
                location: req.src.clone(),
                num_bytes: Some(req.src.file().size()),
            },
            req.src_endpoint.payloads.get(MessagePayload::FileReadRequest),
        )
        .await
        .map_err(FailureCause::from)?;
        let answer =
            ctx.expect::<FileReadAnswer>(&reply_to).await.map_err(FailureCause::from)?;
        answer.result?;
        loop {
            let chunk =
                ctx.expect::<FileChunk>(&data_port).await.map_err(FailureCause::from)?;
            if write_bw.is_finite() && chunk.bytes > 0 {
                ctx.sleep(chunk.bytes as f64 / write_bw).await.map_err(FailureCause::from)?;
            }
            if chunk.last {
                return Ok(());
            }
        }
    }
}

/// Map a location onto `(mount key, directory path)`.
///
/// The mount stated in the location wins when it matches; otherwise the
/// path is matched against mounts by prefix; a single-mount service
/// absorbs root locations.
fn resolve(st: &State, location: &Location) -> Result<(String, String), FailureCause> {
    if location.is_scratch() {
        return Err(FailureCause::NoScratchSpace {
            service: location.service().cloned().unwrap_or_else(|| gantry_core::ServiceName::new("storage")),
        });
    }
    let mount = location.mount();
    let path = location.path();
    if st.mounts.contains_key(mount) {
        return Ok((mount.to_string(), canonical_path(path)));
    }
    // Mount unset ("/"): locate by path prefix, longest mount first.
    let mut candidates: Vec<&String> = st.mounts.keys().collect();
    candidates.sort_by_key(|m| std::cmp::Reverse(m.len()));
    for m in candidates {
        if path_is_prefix(m, path) {
            let dir = path.strip_prefix(m.as_str()).unwrap_or("/");
            return Ok((m.clone(), canonical_path(dir)));
        }
    }
    if st.mounts.len() == 1 {
        if let Some(m) = st.mounts.keys().next() {
            return Ok((m.clone(), canonical_path(path)));
        }
    }
    Err(FailureCause::FileNotFound {
        file: location.file().id().clone(),
        location: location.to_string(),
    })
}

#[cfg(test)]
#[path = "simple_tests.rs"]
mod tests;
