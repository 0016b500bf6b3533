//! Cross-bubble consensus analysis.
//!
//! Within-cluster consensus (in [`crate::metrics`]) measures agreement
//! *inside* one bubble; this module measures agreement *between* bubbles:
//! which items do most bubbles rate the same way, and which split them. The
//! product insight is the former ("we agree more than we think"); the
//! divisive list feeds editorial review.

use std::collections::HashMap;

use crate::config::ConsensusConfig;
use crate::types::{ClusterKind, ItemId, Majority, VotingPattern};

/// One bubble's vote distribution on one item.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupVoteShare {
    pub group: u32,
    pub share_pos: f64,
    pub share_neg: f64,
    pub share_neu: f64,
    pub total_votes: u32,
    pub majority: Majority,
}

/// Cross-bubble agreement on one item.
#[derive(Debug, Clone)]
pub struct ItemAgreement {
    pub item: ItemId,
    /// Fraction of participating bubbles sharing the overall majority.
    pub consensus_rate: f64,
    /// Population variance of the positive share across bubbles.
    pub polarization: f64,
    /// Majority opinion held by the most bubbles (`+ > - > 0` on ties).
    pub majority: Majority,
    /// Bubbles with enough votes to participate.
    pub n_groups: usize,
    pub group_shares: Vec<GroupVoteShare>,
}

/// Run-level cross-bubble summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsensusSummary {
    pub avg_consensus: f64,
    pub avg_polarization: f64,
    pub n_consensus_items: usize,
    pub n_divisive_items: usize,
    pub n_items: usize,
}

/// Compute cross-bubble agreement for every item at least two bubbles voted
/// on with `cfg.min_votes_per_cluster` or more votes each.
///
/// Returns items ordered by descending consensus rate (item id as the
/// deterministic tie-break).
pub fn cross_group_consensus(
    patterns: &[VotingPattern],
    cfg: &ConsensusConfig,
) -> Vec<ItemAgreement> {
    // item -> shares of each qualifying group
    let mut by_item: HashMap<ItemId, Vec<GroupVoteShare>> = HashMap::new();
    for pattern in patterns {
        if pattern.kind != ClusterKind::Group {
            continue;
        }
        let total = pattern.total_votes();
        if total < cfg.min_votes_per_cluster {
            continue;
        }
        let t = total as f64;
        by_item.entry(pattern.item).or_default().push(GroupVoteShare {
            group: pattern.local_id,
            share_pos: f64::from(pattern.count_pos) / t,
            share_neg: f64::from(pattern.count_neg) / t,
            share_neu: f64::from(pattern.count_neu) / t,
            total_votes: total,
            majority: pattern.majority,
        });
    }

    let mut items: Vec<ItemAgreement> = by_item
        .into_iter()
        .filter(|(_, shares)| shares.len() >= 2)
        .map(|(item, mut shares)| {
            shares.sort_by_key(|s| s.group);

            // Majority held by the most bubbles, + > - > 0 on ties.
            let tally = |wanted: Majority| shares.iter().filter(|s| s.majority == wanted).count();
            let (pos, neg, neu) = (
                tally(Majority::Positive),
                tally(Majority::Negative),
                tally(Majority::Neutral),
            );
            let (majority, agreeing) = if pos >= neg && pos >= neu {
                (Majority::Positive, pos)
            } else if neg >= neu {
                (Majority::Negative, neg)
            } else {
                (Majority::Neutral, neu)
            };

            let n_groups = shares.len();
            let consensus_rate = agreeing as f64 / n_groups as f64;

            let mean_pos: f64 =
                shares.iter().map(|s| s.share_pos).sum::<f64>() / n_groups as f64;
            let polarization = shares
                .iter()
                .map(|s| (s.share_pos - mean_pos).powi(2))
                .sum::<f64>()
                / n_groups as f64;

            ItemAgreement {
                item,
                consensus_rate,
                polarization,
                majority,
                n_groups,
                group_shares: shares,
            }
        })
        .collect();

    items.sort_by(|a, b| {
        b.consensus_rate
            .partial_cmp(&a.consensus_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.item.cmp(&b.item))
    });
    items
}

/// Items where most bubbles agree, above the configured rate.
pub fn top_consensus_items<'a>(
    items: &'a [ItemAgreement],
    cfg: &ConsensusConfig,
    limit: usize,
) -> Vec<&'a ItemAgreement> {
    items
        .iter()
        .filter(|i| i.consensus_rate >= cfg.consensus_threshold)
        .take(limit)
        .collect()
}

/// Items with the highest cross-bubble polarization.
pub fn most_divisive_items(items: &[ItemAgreement], limit: usize) -> Vec<&ItemAgreement> {
    let mut sorted: Vec<&ItemAgreement> = items.iter().collect();
    sorted.sort_by(|a, b| {
        b.polarization
            .partial_cmp(&a.polarization)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.item.cmp(&b.item))
    });
    sorted.truncate(limit);
    sorted
}

/// Averages and threshold counts over all scored items.
pub fn consensus_summary(items: &[ItemAgreement], cfg: &ConsensusConfig) -> ConsensusSummary {
    if items.is_empty() {
        return ConsensusSummary::default();
    }
    let n = items.len() as f64;
    ConsensusSummary {
        avg_consensus: items.iter().map(|i| i.consensus_rate).sum::<f64>() / n,
        avg_polarization: items.iter().map(|i| i.polarization).sum::<f64>() / n,
        n_consensus_items: items
            .iter()
            .filter(|i| i.consensus_rate >= cfg.consensus_threshold)
            .count(),
        n_divisive_items: items
            .iter()
            .filter(|i| i.polarization >= cfg.polarization_threshold)
            .count(),
        n_items: items.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(group: u32, item: i64, pos: u32, neg: u32, neu: u32) -> VotingPattern {
        VotingPattern {
            kind: ClusterKind::Group,
            local_id: group,
            item: ItemId(item),
            count_pos: pos,
            count_neg: neg,
            count_neu: neu,
            consensus: crate::metrics::item_consensus(pos, neg, neu),
            majority: Majority::from_counts(pos, neg, neu),
        }
    }

    #[test]
    fn test_agreeing_bubbles_score_full_consensus() {
        let patterns = vec![pattern(0, 1, 9, 1, 0), pattern(1, 1, 8, 0, 2)];
        let items = cross_group_consensus(&patterns, &ConsensusConfig::default());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].consensus_rate, 1.0);
        assert_eq!(items[0].majority, Majority::Positive);
        assert!(items[0].polarization < 0.01);
    }

    #[test]
    fn test_opposed_bubbles_are_polarized() {
        let patterns = vec![pattern(0, 1, 10, 0, 0), pattern(1, 1, 0, 10, 0)];
        let items = cross_group_consensus(&patterns, &ConsensusConfig::default());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].consensus_rate, 0.5);
        // shares_pos are 1.0 and 0.0: population variance 0.25.
        assert!((items[0].polarization - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_min_votes_per_cluster_filters_groups() {
        let patterns = vec![
            pattern(0, 1, 5, 0, 0),
            pattern(1, 1, 1, 0, 0), // only 1 vote: below the default of 3
        ];
        let items = cross_group_consensus(&patterns, &ConsensusConfig::default());
        assert!(items.is_empty(), "an item needs two qualifying bubbles");
    }

    #[test]
    fn test_base_patterns_are_ignored() {
        let mut base = pattern(0, 1, 5, 0, 0);
        base.kind = ClusterKind::Base;
        let patterns = vec![base, pattern(1, 1, 5, 0, 0)];
        let items = cross_group_consensus(&patterns, &ConsensusConfig::default());
        assert!(items.is_empty());
    }

    #[test]
    fn test_summary_counts_thresholds() {
        let cfg = ConsensusConfig::default();
        let patterns = vec![
            pattern(0, 1, 9, 0, 0),
            pattern(1, 1, 9, 1, 0),
            pattern(0, 2, 10, 0, 0),
            pattern(1, 2, 0, 10, 0),
        ];
        let items = cross_group_consensus(&patterns, &cfg);
        let summary = consensus_summary(&items, &cfg);
        assert_eq!(summary.n_items, 2);
        assert_eq!(summary.n_consensus_items, 1);
        assert_eq!(summary.n_divisive_items, 1);

        let top = top_consensus_items(&items, &cfg, 10);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].item, ItemId(1));

        let divisive = most_divisive_items(&items, 1);
        assert_eq!(divisive[0].item, ItemId(2));
    }
}
