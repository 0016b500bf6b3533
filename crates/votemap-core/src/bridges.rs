//! Bridge-voter identification.
//!
//! Some voters sit between bubbles: their projection is close to several
//! group centroids, meaning they share voting patterns with more than one
//! camp. Surfacing them supports the product's "who connects the bubbles"
//! research view. Pure analysis over persisted run rows; nothing here feeds
//! back into clustering.

use std::collections::HashMap;

use tracing::debug;

use crate::config::BridgeConfig;
use crate::kmeans::dist;
use crate::types::{ClusterKind, ClusterRecord, VoterId, VoterProjection};

/// A voter connecting two or more bubbles.
#[derive(Debug, Clone)]
pub struct BridgeVoter {
    pub voter: VoterId,
    /// The bubble the voter actually belongs to.
    pub assigned_group: u32,
    /// Bubbles whose centroid lies within the distance threshold, ascending.
    pub connected_groups: Vec<u32>,
    /// Distance to every bubble centroid, by group id.
    pub distances: Vec<(u32, f64)>,
    /// `1 - avg(connected distances) / threshold`, clamped to [0, 1].
    pub strength: f64,
    pub n_votes: usize,
    pub x: f64,
    pub y: f64,
}

/// Find voters within `cfg.distance_threshold` of at least
/// `cfg.min_connections` group centroids.
///
/// Returns bridges ordered by descending strength (voter identity as the
/// deterministic tie-break).
pub fn identify_bridges(
    projections: &[VoterProjection],
    group_of: &HashMap<VoterId, u32>,
    clusters: &[ClusterRecord],
    cfg: &BridgeConfig,
) -> Vec<BridgeVoter> {
    let mut centroids: Vec<(u32, [f64; 2])> = clusters
        .iter()
        .filter(|c| c.kind == ClusterKind::Group)
        .map(|c| (c.local_id, [c.centroid_x, c.centroid_y]))
        .collect();
    centroids.sort_by_key(|&(id, _)| id);

    if centroids.len() < cfg.min_connections {
        return Vec::new();
    }

    let mut bridges = Vec::new();
    for projection in projections {
        let Some(&assigned_group) = group_of.get(&projection.voter) else {
            continue;
        };
        let position = [projection.x, projection.y];

        let distances: Vec<(u32, f64)> = centroids
            .iter()
            .map(|&(group, centroid)| (group, dist(&position, &centroid)))
            .collect();
        let connected: Vec<u32> = distances
            .iter()
            .filter(|&&(_, d)| d <= cfg.distance_threshold)
            .map(|&(group, _)| group)
            .collect();

        if connected.len() < cfg.min_connections {
            continue;
        }

        let avg_connected: f64 = distances
            .iter()
            .filter(|(group, _)| connected.contains(group))
            .map(|&(_, d)| d)
            .sum::<f64>()
            / connected.len() as f64;
        let strength = (1.0 - avg_connected / cfg.distance_threshold).clamp(0.0, 1.0);

        bridges.push(BridgeVoter {
            voter: projection.voter.clone(),
            assigned_group,
            connected_groups: connected,
            distances,
            strength,
            n_votes: projection.n_votes_cast,
            x: projection.x,
            y: projection.y,
        });
    }

    bridges.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.voter.cmp(&b.voter))
    });
    debug!(n_bridges = bridges.len(), "identified bridge voters");
    bridges
}
