//! Weighted k-means on 2D projections.
//!
//! Lloyd iterations with k-means++ seeding, multiple restarts keeping the
//! lowest inertia, and a hard iteration cap. Voters are weighted by their
//! vote count so high-participation voters pull centroids harder. All
//! randomness flows from the caller's seeded RNG; equal-distance assignment
//! ties go to the smallest centroid id, which keeps runs reproducible.

use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

/// Result of one k-means invocation (best of all restarts).
#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// Cluster label per point, in `0..k`.
    pub labels: Vec<u32>,
    /// Cluster centers; entries for empty clusters keep their seed position.
    pub centroids: Vec<[f64; 2]>,
    /// Weighted within-cluster sum of squares.
    pub inertia: f64,
}

/// Run weighted k-means with restarts.
///
/// `k` must be in `1..=points.len()`; callers clamp before invoking.
pub fn weighted_kmeans(
    points: &[[f64; 2]],
    weights: &[f64],
    k: usize,
    restarts: usize,
    max_iters: usize,
    rng: &mut StdRng,
) -> KMeansResult {
    debug_assert!(!points.is_empty());
    debug_assert!(k >= 1 && k <= points.len());
    debug_assert_eq!(points.len(), weights.len());

    let mut best = lloyd(points, weights, k, max_iters, rng);
    for restart in 1..restarts {
        let result = lloyd(points, weights, k, max_iters, rng);
        if result.inertia < best.inertia {
            debug!(restart, inertia = result.inertia, "k-means restart improved");
            best = result;
        }
    }
    best
}

fn lloyd(
    points: &[[f64; 2]],
    weights: &[f64],
    k: usize,
    max_iters: usize,
    rng: &mut StdRng,
) -> KMeansResult {
    let mut centroids = plus_plus_init(points, weights, k, rng);
    let mut labels = vec![0u32; points.len()];

    for _ in 0..max_iters {
        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let label = nearest_centroid(point, &centroids);
            if labels[i] != label {
                labels[i] = label;
                changed = true;
            }
        }

        let mut sums = vec![[0.0f64; 2]; k];
        let mut totals = vec![0.0f64; k];
        for (i, point) in points.iter().enumerate() {
            let c = labels[i] as usize;
            sums[c][0] += weights[i] * point[0];
            sums[c][1] += weights[i] * point[1];
            totals[c] += weights[i];
        }
        for c in 0..k {
            // An empty cluster keeps its previous position.
            if totals[c] > 0.0 {
                centroids[c] = [sums[c][0] / totals[c], sums[c][1] / totals[c]];
            }
        }

        if !changed {
            break;
        }
    }

    // Final assignment against the updated centroids.
    for (i, point) in points.iter().enumerate() {
        labels[i] = nearest_centroid(point, &centroids);
    }

    let inertia = points
        .iter()
        .zip(weights)
        .zip(&labels)
        .map(|((p, &w), &l)| w * dist_sq(p, &centroids[l as usize]))
        .sum();

    KMeansResult {
        labels,
        centroids,
        inertia,
    }
}

/// k-means++ seeding: first center by weighted choice, subsequent centers
/// with probability proportional to `weight * D^2`.
fn plus_plus_init(
    points: &[[f64; 2]],
    weights: &[f64],
    k: usize,
    rng: &mut StdRng,
) -> Vec<[f64; 2]> {
    let mut centroids = Vec::with_capacity(k);
    let first = weighted_choice(weights, rng);
    centroids.push(points[first]);

    let mut d2: Vec<f64> = points
        .iter()
        .map(|p| dist_sq(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let scores: Vec<f64> = d2
            .iter()
            .zip(weights)
            .map(|(&d, &w)| d * w)
            .collect();
        let next = if scores.iter().sum::<f64>() > 0.0 {
            weighted_choice(&scores, rng)
        } else {
            // All remaining points coincide with a chosen center.
            weighted_choice(weights, rng)
        };
        let center = points[next];
        for (i, point) in points.iter().enumerate() {
            let d = dist_sq(point, &center);
            if d < d2[i] {
                d2[i] = d;
            }
        }
        centroids.push(center);
    }
    centroids
}

fn weighted_choice(weights: &[f64], rng: &mut StdRng) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return rng.gen_range(0..weights.len());
    }
    let mut target = rng.gen_range(0.0..total);
    for (i, &w) in weights.iter().enumerate() {
        target -= w;
        if target < 0.0 {
            return i;
        }
    }
    weights.len() - 1
}

/// Index of the nearest centroid; strict `<` keeps the smallest id on ties.
fn nearest_centroid(point: &[f64; 2], centroids: &[[f64; 2]]) -> u32 {
    let mut best = 0usize;
    let mut best_d = dist_sq(point, &centroids[0]);
    for (c, centroid) in centroids.iter().enumerate().skip(1) {
        let d = dist_sq(point, centroid);
        if d < best_d {
            best = c;
            best_d = d;
        }
    }
    best as u32
}

pub(crate) fn dist_sq(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

pub(crate) fn dist(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    dist_sq(a, b).sqrt()
}
