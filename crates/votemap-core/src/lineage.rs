//! Run-to-run bubble lineage.
//!
//! Group labels are arbitrary per run, so continuity is established purely by
//! voter-set overlap between the previous run's bubbles and the new run's.
//! Each overlapping pair is classified; downstream Sankey-style
//! visualizations consume the rows directly.

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::types::{LineageKind, LineageRecord, RunId, StabilityIndex, VoterId};

/// Both retention directions must exceed this for a continuation.
pub const CONTINUATION_THRESHOLD: f64 = 0.8;

/// One-directional flow share above which a pair is a split (from the old
/// bubble's perspective) or a merge (from the new one's).
pub const FLOW_THRESHOLD: f64 = 0.3;

/// Overlaps at or below this are too small to emit as `Minor`.
pub const MIN_MINOR_OVERLAP: usize = 5;

/// Member sets of one run's bubbles, keyed by group local id.
pub type GroupMembers = HashMap<u32, HashSet<VoterId>>;

/// Classify every overlapping pair of old/new bubbles.
///
/// Pairs with no shared voters are trivial and omitted; overlaps that match
/// no threshold are emitted as [`LineageKind::Minor`] only above
/// [`MIN_MINOR_OVERLAP`] voters.
pub fn compute_lineage(
    from_run: RunId,
    from_groups: &GroupMembers,
    to_run: RunId,
    to_groups: &GroupMembers,
) -> Vec<LineageRecord> {
    let mut from_ids: Vec<u32> = from_groups.keys().copied().collect();
    from_ids.sort_unstable();
    let mut to_ids: Vec<u32> = to_groups.keys().copied().collect();
    to_ids.sort_unstable();

    let mut records = Vec::new();
    for &from_group in &from_ids {
        let old_members = &from_groups[&from_group];
        if old_members.is_empty() {
            continue;
        }
        for &to_group in &to_ids {
            let new_members = &to_groups[&to_group];
            if new_members.is_empty() {
                continue;
            }
            let overlap = old_members.intersection(new_members).count();
            if overlap == 0 {
                continue;
            }
            let pct_from = overlap as f64 / old_members.len() as f64;
            let pct_to = overlap as f64 / new_members.len() as f64;

            let kind = if pct_from > CONTINUATION_THRESHOLD && pct_to > CONTINUATION_THRESHOLD {
                LineageKind::Continuation
            } else if pct_from > FLOW_THRESHOLD {
                LineageKind::Split
            } else if pct_to > FLOW_THRESHOLD {
                LineageKind::Merge
            } else if overlap > MIN_MINOR_OVERLAP {
                LineageKind::Minor
            } else {
                continue;
            };

            records.push(LineageRecord {
                from_run,
                from_group,
                to_run,
                to_group,
                overlap,
                pct_from,
                pct_to,
                kind,
            });
        }
    }

    info!(
        from = %from_run,
        to = %to_run,
        edges = records.len(),
        "computed bubble lineage"
    );
    records
}

/// Overlap-weighted retention between two consecutive runs.
///
/// 1.0 means every old bubble flowed intact into the new run; values sink as
/// members reshuffle or leave.
pub fn stability_index(from_groups: &GroupMembers, to_groups: &GroupMembers) -> StabilityIndex {
    let from_voters: HashSet<&VoterId> = from_groups.values().flatten().collect();
    let to_voters: HashSet<&VoterId> = to_groups.values().flatten().collect();
    let n_common_voters = from_voters.intersection(&to_voters).count();

    let mut weighted = 0.0;
    let mut total_overlap = 0usize;
    for old_members in from_groups.values() {
        if old_members.is_empty() {
            continue;
        }
        for new_members in to_groups.values() {
            let overlap = old_members.intersection(new_members).count();
            if overlap == 0 {
                continue;
            }
            weighted += overlap as f64 * (overlap as f64 / old_members.len() as f64);
            total_overlap += overlap;
        }
    }

    StabilityIndex {
        voter_retention: if total_overlap > 0 {
            weighted / total_overlap as f64
        } else {
            0.0
        },
        n_common_voters,
        n_voters_from: from_voters.len(),
        n_voters_to: to_voters.len(),
    }
}
