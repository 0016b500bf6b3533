//! Bubble selection: reduce the voter projection to 2-5 displayed groups.
//!
//! Every candidate k in the configured range is clustered on the *voter-level*
//! projection (not on base centroids) and scored by silhouette. Selection is
//! deliberately conservative: start at the smallest k and move up only when
//! the silhouette improves by more than a hysteresis threshold. A plain
//! argmax would oscillate between 3 and 4 bubbles across daily runs as the
//! data shifts; the threshold trades a little score for stability.

use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::error::{ClusterError, ClusterResult};
use crate::kmeans::weighted_kmeans;
use crate::metrics::silhouette;
use crate::types::RunParams;

/// Outcome of bubble selection.
#[derive(Debug, Clone)]
pub struct GroupingResult {
    /// The chosen number of bubbles.
    pub k_group: usize,
    /// Group label per voter, in `0..k_group`.
    pub labels: Vec<u32>,
    /// Group centroids (label-indexed).
    pub centroids: Vec<[f64; 2]>,
    /// Silhouette of the chosen clustering (stored on the run).
    pub silhouette: f64,
    /// Silhouette per candidate k, for diagnostics.
    pub scores_by_k: Vec<(usize, f64)>,
}

/// Cluster the projection for each candidate k and pick one.
pub fn select_groups(
    points: &[[f64; 2]],
    params: &RunParams,
    rng: &mut StdRng,
) -> ClusterResult<GroupingResult> {
    let n = points.len();
    if n < 2 {
        return Err(ClusterError::Numerical(format!(
            "group clustering needs at least 2 voters, got {n}"
        )));
    }

    let min_k = params.k_group_min.max(2);
    // k cannot exceed the voter count; below min_k + 1 voters the range
    // collapses to min_k.
    let max_k = params
        .k_group_max
        .min(n.saturating_sub(1))
        .max(min_k)
        .min(n);

    let weights = vec![1.0f64; n];
    let mut candidates = Vec::with_capacity(max_k - min_k + 1);
    let mut scores_by_k = Vec::with_capacity(max_k - min_k + 1);

    for k in min_k..=max_k {
        let result = weighted_kmeans(
            points,
            &weights,
            k,
            params.kmeans_restarts,
            params.kmeans_max_iters,
            rng,
        );
        let score = silhouette(points, &result.labels);
        debug!(k, silhouette = score, "scored candidate bubble count");
        scores_by_k.push((k, score));
        candidates.push(result);
    }

    let k_group = select_k(&scores_by_k, params.silhouette_threshold);
    let chosen = candidates.swap_remove(k_group - min_k);
    let score = scores_by_k[k_group - min_k].1;

    info!(
        k_group,
        silhouette = score,
        ?scores_by_k,
        "selected bubble count"
    );

    Ok(GroupingResult {
        k_group,
        labels: chosen.labels,
        centroids: chosen.centroids,
        silhouette: score,
        scores_by_k,
    })
}

/// The hysteresis rule: accept a larger k only when its silhouette beats the
/// best-so-far by more than `threshold`.
///
/// `scores` must be ordered by ascending k.
fn select_k(scores: &[(usize, f64)], threshold: f64) -> usize {
    let (mut best_k, mut best_score) = scores[0];
    for &(k, score) in &scores[1..] {
        if score > best_score + threshold {
            best_k = k;
            best_score = score;
        }
    }
    best_k
}

/// Assign each base cluster to the group its members plurality-vote for.
///
/// Ties go to the lowest group id. Base clusters with no members map to
/// group 0; they are dropped before persistence anyway.
pub fn assign_base_to_groups(
    base_labels: &[u32],
    group_labels: &[u32],
    k_base: usize,
    k_group: usize,
) -> Vec<u32> {
    let mut counts = vec![vec![0usize; k_group]; k_base];
    for (&base, &group) in base_labels.iter().zip(group_labels) {
        counts[base as usize][group as usize] += 1;
    }

    counts
        .iter()
        .map(|row| {
            let mut best = 0usize;
            for (group, &count) in row.iter().enumerate().skip(1) {
                if count > row[best] {
                    best = group;
                }
            }
            best as u32
        })
        .collect()
}
