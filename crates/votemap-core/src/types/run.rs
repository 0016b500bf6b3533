//! Run records: one immutable execution of the clustering pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClusterError, ClusterResult};

use super::cluster::{ClusterRecord, MembershipRecord, VotingPattern};
use super::projection::{ItemProjection, VoterProjection};

/// Unique run id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run lifecycle state.
///
/// `Completed` and `Failed` are terminal. Readers treat only `Completed`
/// runs as visible; a crashed coordinator leaves a `Running` row behind,
/// which is harmless because the query layer filters on status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Tunable parameters of one run, stored on the run for reproducibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    /// Votes older than this many days are ignored.
    pub window_days: u32,
    /// Minimum voters surviving filters for the run to proceed.
    pub min_voters: usize,
    /// Voters with fewer votes than this are dropped.
    pub min_votes_per_voter: usize,
    /// Sentinel value encoding explicit-neutral votes in the sparse matrix.
    pub neutral_epsilon: f32,
    /// Inclusive lower bound of the bubble-count search.
    pub k_group_min: usize,
    /// Inclusive upper bound of the bubble-count search.
    pub k_group_max: usize,
    /// Silhouette improvement a larger k must clear to be accepted.
    pub silhouette_threshold: f64,
    /// Random restarts per k-means invocation; lowest inertia wins.
    pub kmeans_restarts: usize,
    /// Lloyd iteration cap per restart.
    pub kmeans_max_iters: usize,
    /// RNG seed for PCA start vectors and k-means initialization.
    pub seed: u64,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            window_days: 30,
            min_voters: 50,
            min_votes_per_voter: 3,
            neutral_epsilon: 1e-4,
            k_group_min: 2,
            k_group_max: 5,
            silhouette_threshold: 0.02,
            kmeans_restarts: 10,
            kmeans_max_iters: 20,
            seed: 42,
        }
    }
}

impl RunParams {
    /// Fail fast on parameter combinations the pipeline cannot honor.
    pub fn validate(&self) -> ClusterResult<()> {
        if self.window_days == 0 {
            return Err(ClusterError::InvalidParameter(
                "window_days must be >= 1".to_string(),
            ));
        }
        if self.min_voters < 2 {
            return Err(ClusterError::InvalidParameter(format!(
                "min_voters must be >= 2, got {}",
                self.min_voters
            )));
        }
        if self.min_votes_per_voter == 0 {
            return Err(ClusterError::InvalidParameter(
                "min_votes_per_voter must be >= 1".to_string(),
            ));
        }
        if !(self.neutral_epsilon > 0.0 && self.neutral_epsilon < 0.5) {
            return Err(ClusterError::InvalidParameter(format!(
                "neutral_epsilon must be in (0, 0.5), got {}",
                self.neutral_epsilon
            )));
        }
        if self.k_group_min < 2 || self.k_group_max < self.k_group_min {
            return Err(ClusterError::InvalidParameter(format!(
                "k_group range [{}, {}] is invalid",
                self.k_group_min, self.k_group_max
            )));
        }
        if self.kmeans_restarts == 0 || self.kmeans_max_iters == 0 {
            return Err(ClusterError::InvalidParameter(
                "kmeans_restarts and kmeans_max_iters must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Base cluster count: one per ten voters, clamped to [10, 100] and to
    /// the voter count itself.
    pub fn k_base_for(&self, n_voters: usize) -> usize {
        (n_voters / 10).clamp(10, 100).min(n_voters)
    }
}

/// Aggregate statistics recorded on a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunAggregates {
    pub n_voters: usize,
    pub n_items: usize,
    pub n_base_clusters: usize,
    /// The chosen bubble count (k_group), always in `[k_group_min, k_group_max]`.
    pub n_groups: usize,
    /// Silhouette of the chosen group clustering.
    pub silhouette: f64,
    /// Share of total variance captured by each of the two components.
    pub variance_explained: [f64; 2],
    pub computation_ms: u64,
}

/// Persisted run row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub params: RunParams,
    pub aggregates: RunAggregates,
    pub error_message: Option<String>,
}

impl RunRecord {
    /// A fresh `Running` row, written before the pipeline starts.
    pub fn started(params: RunParams, now: DateTime<Utc>) -> Self {
        Self {
            id: RunId::new(),
            created_at: now,
            completed_at: None,
            status: RunStatus::Running,
            params,
            aggregates: RunAggregates::default(),
            error_message: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Everything a completed run persists, staged in memory and committed as
/// one atomic write.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub run: RunRecord,
    pub projections: Vec<VoterProjection>,
    pub item_projections: Vec<ItemProjection>,
    pub clusters: Vec<ClusterRecord>,
    pub memberships: Vec<MembershipRecord>,
    pub patterns: Vec<VotingPattern>,
}

/// Compact result handed back to the caller of the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub n_voters: usize,
    pub n_items: usize,
    pub n_base_clusters: usize,
    pub n_groups: usize,
    pub silhouette: f64,
    pub computation_ms: u64,
}

impl RunSummary {
    pub fn from_record(run: &RunRecord) -> Self {
        Self {
            run_id: run.id,
            n_voters: run.aggregates.n_voters,
            n_items: run.aggregates.n_items,
            n_base_clusters: run.aggregates.n_base_clusters,
            n_groups: run.aggregates.n_groups,
            silhouette: run.aggregates.silhouette,
            computation_ms: run.aggregates.computation_ms,
        }
    }
}

/// Read-model for the "latest run" query: the run plus the rows the UI maps
/// directly (projections and group clusters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunView {
    pub run: RunRecord,
    pub projections: Vec<VoterProjection>,
    pub item_projections: Vec<ItemProjection>,
    pub group_clusters: Vec<ClusterRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_match_documented_defaults() {
        let p = RunParams::default();
        assert_eq!(p.window_days, 30);
        assert_eq!(p.min_voters, 50);
        assert_eq!(p.min_votes_per_voter, 3);
        assert!((p.neutral_epsilon - 1e-4).abs() < 1e-9);
        assert_eq!((p.k_group_min, p.k_group_max), (2, 5));
        assert!((p.silhouette_threshold - 0.02).abs() < 1e-12);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_k_base_clamps() {
        let p = RunParams::default();
        assert_eq!(p.k_base_for(100), 10, "lower clamp");
        assert_eq!(p.k_base_for(200), 20);
        assert_eq!(p.k_base_for(5000), 100, "upper clamp");
        assert_eq!(p.k_base_for(40), 10, "lower clamp beats n/10");
        assert_eq!(p.k_base_for(5), 5, "never more clusters than voters");
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let mut p = RunParams::default();
        p.k_group_min = 6;
        assert!(p.validate().is_err());

        let mut p = RunParams::default();
        p.neutral_epsilon = 0.0;
        assert!(p.validate().is_err());

        let mut p = RunParams::default();
        p.min_voters = 1;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_started_run_is_running() {
        let run = RunRecord::started(RunParams::default(), Utc::now());
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.completed_at.is_none());
        assert!(!run.is_completed());
    }
}
