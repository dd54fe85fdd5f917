// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side composite operations over the storage protocol.
//!
//! These are the suspension-point helpers action executors and
//! controllers call; each runs a full request/stream/acknowledge
//! exchange against a [`StorageEndpoint`].

use crate::messages::*;
use crate::StorageEndpoint;
use gantry_core::{FailureCause, Location, MessagePayload};
use gantry_kernel::SimContext;

/// Free space on the service, optionally restricted to the LFS holding
/// `path`.
pub async fn free_space(
    ctx: &SimContext,
    ep: &StorageEndpoint,
    path: Option<&str>,
) -> Result<u64, FailureCause> {
    let reply_to = ctx.create_commport("free-space").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        FreeSpaceRequest { reply_to: reply_to.clone(), path: path.map(str::to_string) },
        ep.payloads.get(MessagePayload::FreeSpaceRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer = ctx.expect::<FreeSpaceAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    Ok(answer.free_space)
}

/// True iff the file is stored at `location`.
pub async fn lookup(
    ctx: &SimContext,
    ep: &StorageEndpoint,
    location: &Location,
) -> Result<bool, FailureCause> {
    let reply_to = ctx.create_commport("lookup").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        FileLookupRequest { reply_to: reply_to.clone(), location: location.clone() },
        ep.payloads.get(MessagePayload::FileLookupRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer = ctx.expect::<FileLookupAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    Ok(answer.found)
}

pub async fn delete(
    ctx: &SimContext,
    ep: &StorageEndpoint,
    location: &Location,
) -> Result<(), FailureCause> {
    let reply_to = ctx.create_commport("delete").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        FileDeleteRequest { reply_to: reply_to.clone(), location: location.clone() },
        ep.payloads.get(MessagePayload::FileDeleteRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer = ctx.expect::<FileDeleteAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    answer.result
}

/// Write the location's file: request a ticket, stream chunks, await the
/// final acknowledgement.
pub async fn write_file(
    ctx: &SimContext,
    ep: &StorageEndpoint,
    location: &Location,
) -> Result<(), FailureCause> {
    let reply_to = ctx.create_commport("write").map_err(FailureCause::from)?;
    let num_bytes = location.file().size();
    ctx.put(
        &ep.port,
        FileWriteRequest { reply_to: reply_to.clone(), location: location.clone(), num_bytes },
        ep.payloads.get(MessagePayload::FileWriteRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer = ctx.expect::<FileWriteAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    let ticket = answer.result?;

    let mut remaining = num_bytes;
    loop {
        let chunk = if ticket.buffer_size == 0 {
            remaining
        } else {
            remaining.min(ticket.buffer_size)
        };
        remaining -= chunk;
        let last = remaining == 0;
        ctx.put(&ticket.data_port, FileChunk { bytes: chunk, last }, chunk)
            .await
            .map_err(FailureCause::from)?;
        if last {
            break;
        }
    }
    let finished =
        ctx.expect::<FileWriteFinished>(&reply_to).await.map_err(FailureCause::from)?;
    finished.result
}

/// Read `num_bytes` (whole file when `None`) from `location`; the bytes
/// themselves are not materialised, only their timing. Returns the bytes
/// read.
pub async fn read_file(
    ctx: &SimContext,
    ep: &StorageEndpoint,
    location: &Location,
    num_bytes: Option<u64>,
) -> Result<u64, FailureCause> {
    let reply_to = ctx.create_commport("read").map_err(FailureCause::from)?;
    let data_port = ctx.create_commport("read-data").map_err(FailureCause::from)?;
    ctx.put(
        &ep.port,
        FileReadRequest {
            reply_to: reply_to.clone(),
            data_port: data_port.clone(),
            location: location.clone(),
            num_bytes,
        },
        ep.payloads.get(MessagePayload::FileReadRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer = ctx.expect::<FileReadAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    let ticket = answer.result?;

    let mut received = 0;
    loop {
        let chunk = ctx.expect::<FileChunk>(&data_port).await.map_err(FailureCause::from)?;
        received += chunk.bytes;
        if chunk.last {
            break;
        }
    }
    Ok(received)
}

/// Copy `src` to `dst`: the destination service orchestrates the pull.
pub async fn copy_file(
    ctx: &SimContext,
    dst_ep: &StorageEndpoint,
    src_ep: &StorageEndpoint,
    src: &Location,
    dst: &Location,
) -> Result<(), FailureCause> {
    let reply_to = ctx.create_commport("copy").map_err(FailureCause::from)?;
    ctx.put(
        &dst_ep.port,
        FileCopyRequest {
            reply_to: reply_to.clone(),
            src: src.clone(),
            dst: dst.clone(),
            src_endpoint: src_ep.clone(),
        },
        dst_ep.payloads.get(MessagePayload::FileCopyRequest),
    )
    .await
    .map_err(FailureCause::from)?;
    let answer = ctx.expect::<FileCopyAnswer>(&reply_to).await.map_err(FailureCause::from)?;
    answer.result
}
