//! Sparse vote-matrix construction.
//!
//! Turns the filtered vote stream into a row-major sparse matrix plus index
//! maps. Two details carry the semantics of everything downstream:
//!
//! - **Identity reconciliation happens first.** A session that has been
//!   claimed by a registered account is substituted with the registered
//!   identity before any counting, so one person never occupies two rows.
//!   Duplicate `(voter, item)` votes produced by the substitution keep the
//!   registered-origin vote, else the most recent one.
//! - **Neutral is not missing.** Explicit neutral votes are stored as the
//!   sentinel ε (sparse containers drop literal zeros); absent entries mean
//!   the voter never saw or skipped the item. Aggregators read stored values
//!   through [`Opinion::stored_to_numeric`], which folds ε back to `0.0`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::types::{ItemId, Opinion, RunParams, VoteRecord, VoterId, VoterKind};

/// Sparse voters x items matrix with explicit-neutral sentinels.
///
/// Rows are sorted by voter identity and columns by item id, which makes the
/// layout a pure function of the input snapshot.
#[derive(Debug, Clone)]
pub struct VoteMatrix {
    voters: Vec<VoterId>,
    items: Vec<ItemId>,
    voter_rows: HashMap<VoterId, usize>,
    item_cols: HashMap<ItemId, usize>,
    /// Per row: `(column, stored value)` sorted by column.
    rows: Vec<Vec<(usize, f32)>>,
    col_nnz: Vec<usize>,
    epsilon: f32,
}

impl VoteMatrix {
    pub fn n_voters(&self) -> usize {
        self.voters.len()
    }

    pub fn n_items(&self) -> usize {
        self.items.len()
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn voter_at(&self, row: usize) -> &VoterId {
        &self.voters[row]
    }

    pub fn item_at(&self, col: usize) -> ItemId {
        self.items[col]
    }

    pub fn row_of(&self, voter: &VoterId) -> Option<usize> {
        self.voter_rows.get(voter).copied()
    }

    pub fn col_of(&self, item: ItemId) -> Option<usize> {
        self.item_cols.get(&item).copied()
    }

    /// Stored entries of one row: `(column, raw stored value)`.
    pub fn row(&self, row: usize) -> &[(usize, f32)] {
        &self.rows[row]
    }

    /// Votes cast by voter `row` (the row's stored-entry count).
    pub fn row_nnz(&self, row: usize) -> usize {
        self.rows[row].len()
    }

    /// Votes received per item (stored-entry count per column).
    pub fn col_nnz(&self) -> &[usize] {
        &self.col_nnz
    }

    /// Decoded entries of one row as `(column, opinion)`.
    pub fn row_opinions(&self, row: usize) -> impl Iterator<Item = (usize, Opinion)> + '_ {
        self.rows[row]
            .iter()
            .map(|&(col, v)| (col, Opinion::from_stored(v)))
    }

    /// Total stored entries.
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Fraction of cells that hold a vote, in [0, 1].
    pub fn density(&self) -> f64 {
        let cells = self.n_voters() * self.n_items();
        if cells == 0 {
            return 0.0;
        }
        self.nnz() as f64 / cells as f64
    }

    /// Decode the whole matrix back into `(voter, item, opinion)` triples.
    ///
    /// Exact inverse of construction: the sentinel maps back to neutral and
    /// absent entries stay absent.
    pub fn decode(&self) -> Vec<(VoterId, ItemId, Opinion)> {
        let mut out = Vec::with_capacity(self.nnz());
        for row in 0..self.n_voters() {
            for (col, opinion) in self.row_opinions(row) {
                out.push((self.voters[row].clone(), self.items[col], opinion));
            }
        }
        out
    }
}

/// Build the vote matrix for one run.
///
/// Applies, in order: window filtering, session-to-registered reconciliation,
/// per-`(voter, item)` dedup, the minimum-votes voter filter, and index
/// construction. Fails with [`ClusterError::InsufficientVoters`] when fewer
/// than `params.min_voters` voters survive; nothing partial is returned.
pub fn build_vote_matrix(
    votes: Vec<VoteRecord>,
    claims: &HashMap<String, String>,
    params: &RunParams,
    now: DateTime<Utc>,
) -> ClusterResult<VoteMatrix> {
    let cutoff = now - Duration::days(i64::from(params.window_days));

    // (voter, item) -> (opinion, cast_at, registered_origin)
    let mut dedup: HashMap<(VoterId, ItemId), (Opinion, DateTime<Utc>, bool)> = HashMap::new();
    let mut n_window = 0usize;
    let mut n_claimed = 0usize;

    for vote in votes {
        if vote.cast_at <= cutoff || vote.cast_at > now {
            continue;
        }
        n_window += 1;

        let registered_origin = vote.voter.kind == VoterKind::Registered;
        let voter = match vote.voter.kind {
            VoterKind::Session => match claims.get(&vote.voter.id) {
                Some(registered_id) => {
                    n_claimed += 1;
                    VoterId::registered(registered_id.clone())
                }
                None => vote.voter,
            },
            VoterKind::Registered => vote.voter,
        };

        let key = (voter, vote.item);
        match dedup.get(&key) {
            Some(&(_, kept_at, kept_registered)) => {
                // Registered-origin beats claimed-session; ties go to the
                // most recent timestamp.
                let wins = (registered_origin, vote.cast_at) > (kept_registered, kept_at);
                if wins {
                    dedup.insert(key, (vote.opinion, vote.cast_at, registered_origin));
                }
            }
            None => {
                dedup.insert(key, (vote.opinion, vote.cast_at, registered_origin));
            }
        }
    }

    if n_claimed > 0 {
        debug!(n_claimed, "reconciled claimed-session votes to registered identities");
    }

    // Votes per voter, then the minimum-votes filter.
    let mut counts: HashMap<&VoterId, usize> = HashMap::new();
    for (voter, _) in dedup.keys() {
        *counts.entry(voter).or_insert(0) += 1;
    }
    let total_voters = counts.len();

    let mut voters: Vec<VoterId> = counts
        .iter()
        .filter(|&(_, &count)| count >= params.min_votes_per_voter)
        .map(|(voter, _)| (*voter).clone())
        .collect();
    voters.sort();

    info!(
        total_voters,
        qualified = voters.len(),
        min_votes = params.min_votes_per_voter,
        "filtered voters by minimum vote count"
    );

    if voters.len() < params.min_voters {
        warn!(
            found = voters.len(),
            required = params.min_voters,
            "not enough voters to cluster"
        );
        return Err(ClusterError::InsufficientVoters {
            found: voters.len(),
            required: params.min_voters,
        });
    }

    let voter_rows: HashMap<VoterId, usize> = voters
        .iter()
        .enumerate()
        .map(|(row, voter)| (voter.clone(), row))
        .collect();

    // Items are those voted on by qualified voters, sorted for determinism.
    let mut items: Vec<ItemId> = {
        let mut set: Vec<ItemId> = dedup
            .keys()
            .filter(|(voter, _)| voter_rows.contains_key(voter))
            .map(|(_, item)| *item)
            .collect();
        set.sort();
        set.dedup();
        set
    };
    items.shrink_to_fit();
    let item_cols: HashMap<ItemId, usize> = items
        .iter()
        .enumerate()
        .map(|(col, item)| (*item, col))
        .collect();

    let mut rows: Vec<Vec<(usize, f32)>> = vec![Vec::new(); voters.len()];
    let mut col_nnz = vec![0usize; items.len()];
    for ((voter, item), (opinion, _, _)) in &dedup {
        let Some(&row) = voter_rows.get(voter) else {
            continue;
        };
        let col = item_cols[item];
        rows[row].push((col, opinion.encode(params.neutral_epsilon)));
        col_nnz[col] += 1;
    }
    for row in &mut rows {
        row.sort_unstable_by_key(|&(col, _)| col);
    }

    let matrix = VoteMatrix {
        voters,
        items,
        voter_rows,
        item_cols,
        rows,
        col_nnz,
        epsilon: params.neutral_epsilon,
    };

    info!(
        n_voters = matrix.n_voters(),
        n_items = matrix.n_items(),
        nnz = matrix.nnz(),
        density_pct = matrix.density() * 100.0,
        votes_in_window = n_window,
        "built vote matrix"
    );

    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(days_ago: i64) -> DateTime<Utc> {
        now() - Duration::days(days_ago)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn vote(voter: VoterId, item: i64, opinion: Opinion, days_ago: i64) -> VoteRecord {
        VoteRecord {
            voter,
            item: ItemId(item),
            opinion,
            cast_at: at(days_ago),
        }
    }

    fn loose_params() -> RunParams {
        RunParams {
            min_voters: 2,
            min_votes_per_voter: 1,
            ..RunParams::default()
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let votes = vec![
            vote(VoterId::registered("a"), 1, Opinion::Positive, 1),
            vote(VoterId::registered("a"), 2, Opinion::Neutral, 2),
            vote(VoterId::registered("b"), 1, Opinion::Negative, 3),
            vote(VoterId::session("s"), 2, Opinion::Positive, 1),
        ];
        let m = build_vote_matrix(votes.clone(), &HashMap::new(), &loose_params(), now())
            .expect("matrix");

        let mut decoded = m.decode();
        decoded.sort();
        let mut expected: Vec<_> = votes
            .into_iter()
            .map(|v| (v.voter, v.item, v.opinion))
            .collect();
        expected.sort();
        assert_eq!(decoded, expected, "decode must reproduce the vote triples");
    }

    #[test]
    fn test_window_excludes_old_and_future_votes() {
        let votes = vec![
            vote(VoterId::registered("a"), 1, Opinion::Positive, 1),
            vote(VoterId::registered("a"), 2, Opinion::Positive, 31), // outside window
            vote(VoterId::registered("b"), 1, Opinion::Negative, -1), // in the future
            vote(VoterId::registered("b"), 2, Opinion::Negative, 2),
        ];
        let m = build_vote_matrix(votes, &HashMap::new(), &loose_params(), now()).expect("matrix");
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.n_items(), 2);
    }

    #[test]
    fn test_claimed_session_merges_into_registered_row() {
        let claims = HashMap::from([("sess1".to_string(), "u1".to_string())]);
        let votes = vec![
            vote(VoterId::session("sess1"), 1, Opinion::Positive, 1),
            vote(VoterId::session("sess1"), 2, Opinion::Neutral, 1),
            vote(VoterId::registered("u1"), 3, Opinion::Negative, 1),
            vote(VoterId::registered("u2"), 1, Opinion::Negative, 1),
        ];
        let m = build_vote_matrix(votes, &claims, &loose_params(), now()).expect("matrix");

        assert_eq!(m.n_voters(), 2, "claimed session must not occupy its own row");
        let row = m.row_of(&VoterId::registered("u1")).expect("u1 row");
        assert_eq!(m.row_nnz(row), 3);
    }

    #[test]
    fn test_dedup_registered_vote_wins_over_claimed_session() {
        let claims = HashMap::from([("sess1".to_string(), "u1".to_string())]);
        let votes = vec![
            // The session vote is more recent, but the registered vote wins.
            vote(VoterId::session("sess1"), 1, Opinion::Positive, 1),
            vote(VoterId::registered("u1"), 1, Opinion::Negative, 5),
            vote(VoterId::registered("u2"), 1, Opinion::Neutral, 1),
        ];
        let m = build_vote_matrix(votes, &claims, &loose_params(), now()).expect("matrix");
        let row = m.row_of(&VoterId::registered("u1")).expect("u1 row");
        let entries: Vec<_> = m.row_opinions(row).collect();
        assert_eq!(entries, vec![(m.col_of(ItemId(1)).unwrap(), Opinion::Negative)]);
    }

    #[test]
    fn test_dedup_same_origin_keeps_most_recent() {
        let claims = HashMap::from([
            ("s1".to_string(), "u1".to_string()),
            ("s2".to_string(), "u1".to_string()),
        ]);
        let votes = vec![
            vote(VoterId::session("s1"), 1, Opinion::Positive, 5),
            vote(VoterId::session("s2"), 1, Opinion::Negative, 1), // newer
            vote(VoterId::registered("u2"), 1, Opinion::Neutral, 1),
        ];
        let m = build_vote_matrix(votes, &claims, &loose_params(), now()).expect("matrix");
        let row = m.row_of(&VoterId::registered("u1")).expect("u1 row");
        let (_, opinion) = m.row_opinions(row).next().expect("entry");
        assert_eq!(opinion, Opinion::Negative);
    }

    #[test]
    fn test_min_votes_per_voter_filter() {
        let mut params = loose_params();
        params.min_votes_per_voter = 2;
        let votes = vec![
            vote(VoterId::registered("a"), 1, Opinion::Positive, 1),
            vote(VoterId::registered("a"), 2, Opinion::Positive, 1),
            vote(VoterId::registered("b"), 1, Opinion::Negative, 1),
            vote(VoterId::registered("c"), 1, Opinion::Negative, 1),
            vote(VoterId::registered("c"), 2, Opinion::Negative, 1),
        ];
        let m = build_vote_matrix(votes, &HashMap::new(), &params, now()).expect("matrix");
        assert_eq!(m.n_voters(), 2);
        assert!(m.row_of(&VoterId::registered("b")).is_none());
    }

    #[test]
    fn test_insufficient_voters_is_an_error() {
        let mut params = loose_params();
        params.min_voters = 3;
        let votes = vec![
            vote(VoterId::registered("a"), 1, Opinion::Positive, 1),
            vote(VoterId::registered("b"), 1, Opinion::Negative, 1),
        ];
        let err = build_vote_matrix(votes, &HashMap::new(), &params, now()).unwrap_err();
        match err {
            ClusterError::InsufficientVoters { found, required } => {
                assert_eq!((found, required), (2, 3));
            }
            other => panic!("expected InsufficientVoters, got {other:?}"),
        }
    }

    #[test]
    fn test_neutral_votes_are_present_entries() {
        let votes = vec![
            vote(VoterId::registered("a"), 1, Opinion::Neutral, 1),
            vote(VoterId::registered("a"), 2, Opinion::Neutral, 1),
            vote(VoterId::registered("b"), 1, Opinion::Positive, 1),
        ];
        let m = build_vote_matrix(votes, &HashMap::new(), &loose_params(), now()).expect("matrix");
        let row = m.row_of(&VoterId::registered("a")).expect("row");
        assert_eq!(m.row_nnz(row), 2, "neutral votes must be stored entries");
        for &(_, v) in m.row(row) {
            assert!(v > 0.0 && v < 0.5, "neutral stored as the sentinel");
            assert_eq!(Opinion::stored_to_numeric(v), 0.0);
        }
    }

    #[test]
    fn test_items_only_from_qualified_voters() {
        let mut params = loose_params();
        params.min_votes_per_voter = 2;
        let votes = vec![
            vote(VoterId::registered("a"), 1, Opinion::Positive, 1),
            vote(VoterId::registered("a"), 2, Opinion::Positive, 1),
            // item 99 is only voted by "b", who falls below the vote minimum
            vote(VoterId::registered("b"), 99, Opinion::Positive, 1),
            vote(VoterId::registered("c"), 1, Opinion::Positive, 1),
            vote(VoterId::registered("c"), 3, Opinion::Positive, 1),
        ];
        let m = build_vote_matrix(votes, &HashMap::new(), &params, now()).expect("matrix");
        assert!(m.col_of(ItemId(99)).is_none());
        assert_eq!(m.n_items(), 3);
    }
}
