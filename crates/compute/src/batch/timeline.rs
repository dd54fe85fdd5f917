// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node-availability timeline: a piecewise-constant `free_nodes(t)`
//! profile with embedded per-job commitments, used by conservative
//! backfilling and by start-time estimation.

/// Commitments are half-open `[start, end)` node counts.
#[derive(Debug, Clone)]
pub struct AvailabilityTimeline {
    total_nodes: u32,
    commitments: Vec<(f64, f64, u32)>,
}

impl AvailabilityTimeline {
    pub fn new(total_nodes: u32) -> Self {
        Self { total_nodes, commitments: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.commitments.clear();
    }

    pub fn commit(&mut self, start: f64, end: f64, nodes: u32) {
        if end > start && nodes > 0 {
            self.commitments.push((start, end, nodes));
        }
    }

    pub fn free_at(&self, t: f64) -> u32 {
        let used: u32 = self
            .commitments
            .iter()
            .filter(|(s, e, _)| *s <= t && t < *e)
            .map(|(_, _, n)| n)
            .sum();
        self.total_nodes.saturating_sub(used)
    }

    /// Minimum free nodes over `[t, t + duration)`.
    fn min_free_over(&self, t: f64, duration: f64) -> u32 {
        let end = t + duration;
        let mut min = self.free_at(t);
        for &(s, _, _) in &self.commitments {
            if s > t && s < end {
                min = min.min(self.free_at(s));
            }
        }
        min
    }

    /// Earliest `t >= from` at which `nodes` nodes stay free for
    /// `duration` seconds. Candidate dates are `from` and every
    /// commitment release.
    pub fn earliest_start(&self, from: f64, nodes: u32, duration: f64) -> f64 {
        let mut candidates: Vec<f64> = vec![from];
        candidates.extend(self.commitments.iter().map(|&(_, e, _)| e).filter(|&e| e > from));
        candidates.sort_by(f64::total_cmp);
        for t in candidates {
            if self.min_free_over(t, duration) >= nodes {
                return t;
            }
        }
        // Unreachable for nodes <= total: the date after the last
        // release always qualifies (and is in the candidate list).
        from
    }
}

#[cfg(test)]
#[path = "timeline_tests.rs"]
mod tests;
