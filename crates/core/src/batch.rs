// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batch-layer job wrapper.
//!
//! A [`BatchJob`] ties a compound job to its batch-scheduling metadata:
//! the `(nodes, cores-per-node, walltime)` request, arrival order, the
//! allocation once placed, and (under conservative backfilling) the
//! reserved execution window.

use crate::job::JobRef;
use crate::location::HostName;
use indexmap::IndexMap;

crate::define_id! {
    /// Identifier a batch service assigns to a queued job.
    pub struct BatchJobId("bat-");
}

/// Reserved execution window under conservative backfilling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reservation {
    pub start_date: f64,
    pub expected_end_date: f64,
}

/// A compound job queued at a batch service.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: BatchJobId,
    pub job: JobRef,
    pub num_nodes: u32,
    pub cores_per_node: u32,
    /// Requested walltime, seconds.
    pub walltime: f64,
    pub arrival_date: f64,
    /// Hosts granted once the job starts (host -> cores).
    pub allocation: IndexMap<HostName, u32>,
    pub reservation: Option<Reservation>,
    pub start_date: Option<f64>,
}

impl BatchJob {
    pub fn new(
        job: JobRef,
        num_nodes: u32,
        cores_per_node: u32,
        walltime: f64,
        arrival_date: f64,
    ) -> Self {
        Self {
            id: BatchJobId::generate(),
            job,
            num_nodes,
            cores_per_node,
            walltime,
            arrival_date,
            allocation: IndexMap::new(),
            reservation: None,
            start_date: None,
        }
    }

    /// Reserve the window `[start, start + walltime)`.
    pub fn reserve(&mut self, start_date: f64) {
        self.reservation =
            Some(Reservation { start_date, expected_end_date: start_date + self.walltime });
    }

    /// Latest date the job may still be running once started.
    pub fn deadline(&self) -> Option<f64> {
        self.start_date.map(|s| s + self.walltime)
    }

    pub fn is_running(&self) -> bool {
        self.start_date.is_some()
    }
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
