//! Lineage between bubbles of consecutive runs.
//!
//! Group local ids are arbitrary k-means labels and are not stable across
//! runs; lineage rows (voter-set overlap, classified) are the only correct
//! way to relate bubbles over time.

use serde::{Deserialize, Serialize};

use super::run::RunId;

/// How a bubble of the previous run relates to a bubble of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageKind {
    /// Both directions retain more than 80% of their members.
    Continuation,
    /// More than 30% of the old bubble flowed here.
    Split,
    /// More than 30% of the new bubble came from there.
    Merge,
    /// A small but non-trivial overlap (more than five voters).
    Minor,
}

/// One classified edge in the run-to-run lineage graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    pub from_run: RunId,
    pub from_group: u32,
    pub to_run: RunId,
    pub to_group: u32,
    /// Members shared by both bubbles, by voter-identity equality.
    pub overlap: usize,
    /// `overlap / |old bubble|`.
    pub pct_from: f64,
    /// `overlap / |new bubble|`.
    pub pct_to: f64,
    pub kind: LineageKind,
}

/// Overlap-weighted retention between two consecutive runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityIndex {
    /// Weighted mean of `pct_from` over all lineage edges, in [0, 1].
    pub voter_retention: f64,
    /// Voters present in both runs.
    pub n_common_voters: usize,
    pub n_voters_from: usize,
    pub n_voters_to: usize,
}
