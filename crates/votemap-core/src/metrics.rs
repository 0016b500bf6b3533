//! Consensus, voting patterns, similarity, and clustering-quality metrics.
//!
//! All vote aggregation here reads matrix values through
//! [`Opinion::from_stored`], so the neutral sentinel counts as a neutral
//! *vote* and never as a numeric contribution. Items a cluster never voted on
//! contribute nothing; missing is absent from both value and count.

use std::collections::HashMap;

use crate::config::NamingConfig;
use crate::kmeans::dist;
use crate::matrix::VoteMatrix;
use crate::types::{
    ClusterKind, EntityKind, EntityMention, EntityTag, ItemId, Majority, Opinion, Sentiment,
    VotingPattern,
};

/// Per-item consensus from vote counts: `1 - H / H_max` over the three-way
/// split, in [0, 1]. Unanimity gives 1, an even three-way split gives 0.
pub fn item_consensus(pos: u32, neg: u32, neu: u32) -> f64 {
    let total = (pos + neg + neu) as f64;
    if total == 0.0 {
        return 0.0;
    }
    let h_max = 3f64.ln();
    let mut entropy = 0.0;
    for count in [pos, neg, neu] {
        if count > 0 {
            let q = count as f64 / total;
            entropy -= q * q.ln();
        }
    }
    (1.0 - entropy / h_max).clamp(0.0, 1.0)
}

/// Aggregated voting behavior of one cluster.
#[derive(Debug, Clone)]
pub struct ClusterVotes {
    /// One pattern per item that received at least one member vote,
    /// in item order.
    pub patterns: Vec<VotingPattern>,
    /// Mean of the per-item consensus values; 0 when the cluster voted on
    /// nothing.
    pub consensus: f64,
}

/// Count a cluster's votes per item and derive patterns.
///
/// `members` are matrix row indices. Only stored entries are counted, so an
/// item with no votes from the members yields no pattern row.
pub fn aggregate_cluster_votes(
    matrix: &VoteMatrix,
    members: &[usize],
    kind: ClusterKind,
    local_id: u32,
) -> ClusterVotes {
    // col -> [pos, neg, neu]
    let mut counts: HashMap<usize, [u32; 3]> = HashMap::new();
    for &row in members {
        for (col, opinion) in matrix.row_opinions(row) {
            let slot = counts.entry(col).or_insert([0, 0, 0]);
            match opinion {
                Opinion::Positive => slot[0] += 1,
                Opinion::Negative => slot[1] += 1,
                Opinion::Neutral => slot[2] += 1,
            }
        }
    }

    let mut cols: Vec<usize> = counts.keys().copied().collect();
    cols.sort_unstable();

    let mut patterns = Vec::with_capacity(cols.len());
    let mut consensus_sum = 0.0;
    for col in cols {
        let [pos, neg, neu] = counts[&col];
        let consensus = item_consensus(pos, neg, neu);
        consensus_sum += consensus;
        patterns.push(VotingPattern {
            kind,
            local_id,
            item: matrix.item_at(col),
            count_pos: pos,
            count_neg: neg,
            count_neu: neu,
            consensus,
            majority: Majority::from_counts(pos, neg, neu),
        });
    }

    let consensus = if patterns.is_empty() {
        0.0
    } else {
        consensus_sum / patterns.len() as f64
    };

    ClusterVotes {
        patterns,
        consensus,
    }
}

/// Pairwise voter similarity: exact-opinion agreement over co-voted items.
///
/// `None` when the voters share no items; the distinction between "no
/// overlap" and "total disagreement" matters to consumers.
pub fn voter_similarity(matrix: &VoteMatrix, row_a: usize, row_b: usize) -> Option<f64> {
    let a = matrix.row(row_a);
    let b = matrix.row(row_b);

    let mut co_voted = 0usize;
    let mut agreements = 0usize;
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        let (col_a, val_a) = a[i];
        let (col_b, val_b) = b[j];
        match col_a.cmp(&col_b) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                co_voted += 1;
                if Opinion::from_stored(val_a) == Opinion::from_stored(val_b) {
                    agreements += 1;
                }
                i += 1;
                j += 1;
            }
        }
    }

    if co_voted == 0 {
        None
    } else {
        Some(agreements as f64 / co_voted as f64)
    }
}

/// Mean silhouette coefficient of a labeled 2D point set, in [-1, 1].
///
/// `s(i) = (b(i) - a(i)) / max(a(i), b(i))` with `a` the mean intra-cluster
/// distance and `b` the smallest mean distance to another cluster. Returns 0
/// when fewer than two clusters are populated. O(n^2) time, O(n*k) memory.
pub fn silhouette(points: &[[f64; 2]], labels: &[u32]) -> f64 {
    let n = points.len();
    if n == 0 {
        return 0.0;
    }
    let k = labels.iter().map(|&l| l as usize + 1).max().unwrap_or(0);
    let mut sizes = vec![0usize; k];
    for &l in labels {
        sizes[l as usize] += 1;
    }
    if sizes.iter().filter(|&&s| s > 0).count() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut dist_sums = vec![0.0f64; k];
    for i in 0..n {
        for sum in dist_sums.iter_mut() {
            *sum = 0.0;
        }
        for j in 0..n {
            if i != j {
                dist_sums[labels[j] as usize] += dist(&points[i], &points[j]);
            }
        }

        let own = labels[i] as usize;
        let a = if sizes[own] > 1 {
            dist_sums[own] / (sizes[own] - 1) as f64
        } else {
            0.0
        };
        let b = (0..k)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| dist_sums[c] / sizes[c] as f64)
            .min_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or(0.0);

        let max_ab = a.max(b);
        if max_ab > f64::EPSILON {
            total += (b - a) / max_ab;
        }
    }
    total / n as f64
}

/// Euclidean distance from a projected voter to a cluster centroid.
pub fn distance_to_centroid(point: &[f64; 2], centroid: &[f64; 2]) -> f64 {
    dist(point, centroid)
}

/// Top entities a cluster views positively and negatively.
///
/// Looks at the cluster's high-consensus patterns: items the cluster rates
/// positively contribute their positive-sentiment entities, items rated
/// negatively contribute their negative-sentiment entities. Returns
/// `(positive, negative)` mentions, each capped at `cfg.top_entities` and
/// ordered by descending item count (name as the deterministic tie-break).
pub fn top_entities(
    patterns: &[VotingPattern],
    tags: &HashMap<ItemId, Vec<EntityTag>>,
    cfg: &NamingConfig,
) -> (Vec<EntityMention>, Vec<EntityMention>) {
    let mut positive: HashMap<(String, EntityKind), usize> = HashMap::new();
    let mut negative: HashMap<(String, EntityKind), usize> = HashMap::new();

    for pattern in patterns {
        if pattern.consensus < cfg.min_pattern_consensus {
            continue;
        }
        let (counter, wanted) = match pattern.majority {
            Majority::Positive => (&mut positive, Sentiment::Positive),
            Majority::Negative => (&mut negative, Sentiment::Negative),
            _ => continue,
        };
        let Some(item_tags) = tags.get(&pattern.item) else {
            continue;
        };
        for tag in item_tags {
            if tag.sentiment == wanted {
                *counter.entry((tag.name.clone(), tag.kind)).or_insert(0) += 1;
            }
        }
    }

    let rank = |counter: HashMap<(String, EntityKind), usize>| {
        let mut mentions: Vec<EntityMention> = counter
            .into_iter()
            .map(|((name, kind), count)| EntityMention { name, kind, count })
            .collect();
        mentions.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        mentions.truncate(cfg.top_entities);
        mentions
    };

    (rank(positive), rank(negative))
}
