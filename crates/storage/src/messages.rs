// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The storage-service wire protocol: request/answer pairs plus the
//! chunk stream used by buffered transfers.

use gantry_core::{FailureCause, Location};
use gantry_kernel::Commport;

#[derive(Debug)]
pub struct FreeSpaceRequest {
    pub reply_to: Commport,
    /// Restrict to the LFS whose mount holds this path; `None` sums all.
    pub path: Option<String>,
}

#[derive(Debug)]
pub struct FreeSpaceAnswer {
    pub free_space: u64,
}

#[derive(Debug)]
pub struct FileLookupRequest {
    pub reply_to: Commport,
    pub location: Location,
}

#[derive(Debug)]
pub struct FileLookupAnswer {
    pub found: bool,
}

#[derive(Debug)]
pub struct FileDeleteRequest {
    pub reply_to: Commport,
    pub location: Location,
}

#[derive(Debug)]
pub struct FileDeleteAnswer {
    pub result: Result<(), FailureCause>,
}

#[derive(Debug)]
pub struct FileWriteRequest {
    pub reply_to: Commport,
    pub location: Location,
    pub num_bytes: u64,
}

/// Success answer to a write request: stream chunks of at most
/// `buffer_size` bytes to `data_port`; `buffer_size == 0` means a single
/// one-shot chunk.
#[derive(Debug)]
pub struct FileWriteAnswer {
    pub result: Result<WriteTicket, FailureCause>,
}

#[derive(Debug)]
pub struct WriteTicket {
    pub data_port: Commport,
    pub buffer_size: u64,
}

/// Acknowledgement on `reply_to` once the final chunk has been written
/// to disk and the file committed.
#[derive(Debug)]
pub struct FileWriteFinished {
    pub result: Result<(), FailureCause>,
}

#[derive(Debug)]
pub struct FileReadRequest {
    pub reply_to: Commport,
    /// Client-side port the service streams chunks to.
    pub data_port: Commport,
    pub location: Location,
    /// Bytes to read; `None` reads the whole file.
    pub num_bytes: Option<u64>,
}

#[derive(Debug)]
pub struct FileReadAnswer {
    pub result: Result<ReadTicket, FailureCause>,
}

#[derive(Debug)]
pub struct ReadTicket {
    pub buffer_size: u64,
    pub num_bytes: u64,
}

/// One chunk of a streamed transfer, in either direction.
#[derive(Debug)]
pub struct FileChunk {
    pub bytes: u64,
    pub last: bool,
}

/// Sent to the destination service, which pulls from `src`.
#[derive(Debug)]
pub struct FileCopyRequest {
    pub reply_to: Commport,
    pub src: Location,
    pub dst: Location,
    /// Endpoint of the source service (the destination needs its port).
    pub src_endpoint: crate::StorageEndpoint,
}

#[derive(Debug)]
pub struct FileCopyAnswer {
    pub result: Result<(), FailureCause>,
}
