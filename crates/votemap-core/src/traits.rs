//! Trait seams between the pipeline and its collaborators.
//!
//! The vote store is external and read-only ([`VoteSource`]); run persistence
//! and the query surface sit behind [`RunStore`] so the coordinator never
//! depends on a concrete backend; [`ClusterNamer`] is the optional
//! post-completion hook an LLM-backed naming service can implement.
//!
//! # Object Safety
//!
//! All three traits are object-safe and `Send + Sync`, so they can be shared
//! as `Arc<dyn ...>` across the coordinator and spawned tasks.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ClusterResult;
use crate::lineage::GroupMembers;
use crate::types::{
    ClusterKind, ClusterRecord, EntityMention, EntityTag, ItemId, LineageRecord, RunArtifacts,
    RunId, RunRecord, RunView, VoteRecord, VoterId, VotingPattern,
};

/// A read-committed snapshot of the external vote store.
#[derive(Debug, Clone, Default)]
pub struct VoteSnapshot {
    pub votes: Vec<VoteRecord>,
    /// Session id -> registered id, from processed claim events.
    pub claims: HashMap<String, String>,
    /// Entity tags per item, from external enrichment (may be empty).
    pub entity_tags: HashMap<ItemId, Vec<EntityTag>>,
}

/// Read access to the authoritative vote store.
#[async_trait]
pub trait VoteSource: Send + Sync {
    /// Read all votes within the window ending at `now`, plus claim events
    /// and entity tags. Whatever this read observes is the run's snapshot;
    /// concurrent writes by external systems are not coordinated.
    ///
    /// # Errors
    ///
    /// `ClusterError::StoreUnavailable` when the store cannot be read.
    async fn snapshot(&self, window_days: u32, now: DateTime<Utc>) -> ClusterResult<VoteSnapshot>;
}

/// Persistence and query surface for runs.
///
/// # Visibility contract
///
/// Readers only ever observe `Completed` runs through the query methods; a
/// run published via [`RunStore::publish_run`] must become visible with all
/// of its dependent rows or not at all.
#[async_trait]
pub trait RunStore: Send + Sync {
    // === Lease ===

    /// Try to acquire the named lease for `holder`. Returns `false` without
    /// waiting when another holder owns an unexpired lease.
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> ClusterResult<bool>;

    /// Release the lease if `holder` still owns it; otherwise a no-op.
    async fn release_lease(&self, name: &str, holder: Uuid) -> ClusterResult<()>;

    // === Run lifecycle ===

    /// Persist a fresh `Running` run row.
    async fn create_run(&self, run: &RunRecord) -> ClusterResult<()>;

    /// Atomically persist a completed run and every dependent row.
    async fn publish_run(&self, artifacts: &RunArtifacts) -> ClusterResult<()>;

    /// Mark a run `Failed` with an operator-readable reason.
    async fn mark_run_failed(&self, run_id: RunId, error: &str) -> ClusterResult<()>;

    /// Remove any dependent rows of a run (rollback path). The run row
    /// itself is kept for the failure record.
    async fn clear_run_artifacts(&self, run_id: RunId) -> ClusterResult<()>;

    /// Delete a run and everything it owns.
    async fn delete_run(&self, run_id: RunId) -> ClusterResult<()>;

    /// Persist lineage rows (written after the run completed).
    async fn store_lineage(&self, records: &[LineageRecord]) -> ClusterResult<()>;

    /// Attach a name/description produced by the naming hook to a group
    /// cluster. The only mutation allowed after publication.
    async fn attach_group_name(
        &self,
        run_id: RunId,
        local_id: u32,
        name: &str,
        description: &str,
    ) -> ClusterResult<()>;

    // === Queries (read-only, completed runs only) ===

    /// The current run: most recent `Completed` by creation time.
    async fn latest_completed(&self) -> ClusterResult<Option<RunRecord>>;

    /// Most recent `Completed` run created strictly before `created_at`.
    async fn latest_completed_before(
        &self,
        created_at: DateTime<Utc>,
    ) -> ClusterResult<Option<RunRecord>>;

    /// Up to `limit` completed runs, newest first.
    async fn completed_runs(&self, limit: usize) -> ClusterResult<Vec<RunRecord>>;

    /// A run row by id, regardless of status.
    async fn run(&self, run_id: RunId) -> ClusterResult<Option<RunRecord>>;

    /// Run summary plus projections and group clusters; `None` unless the
    /// run exists and is completed.
    async fn run_view(&self, run_id: RunId) -> ClusterResult<Option<RunView>>;

    /// Group-cluster member sets of a completed run.
    async fn group_members(&self, run_id: RunId) -> ClusterResult<GroupMembers>;

    /// The voter's group cluster in the latest completed run, if any.
    async fn voter_bubble(&self, voter: &VoterId) -> ClusterResult<Option<ClusterRecord>>;

    /// Voting patterns of one cluster, ordered by descending consensus.
    async fn cluster_patterns(
        &self,
        run_id: RunId,
        kind: ClusterKind,
        local_id: u32,
    ) -> ClusterResult<Vec<VotingPattern>>;

    /// Lineage rows pointing *into* the given run.
    async fn lineage_for(&self, to_run: RunId) -> ClusterResult<Vec<LineageRecord>>;

    /// Delete old runs, keeping the `keep` most recent completed ones (the
    /// latest completed run is never deleted). Returns the number removed.
    async fn prune_runs(&self, keep: usize) -> ClusterResult<usize>;
}

/// Payload handed to the naming hook for one group cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingRequest {
    pub run_id: RunId,
    pub local_id: u32,
    pub size: usize,
    pub consensus: f64,
    /// The cluster's strongest patterns, ordered by descending consensus.
    pub top_patterns: Vec<VotingPattern>,
    pub entities_positive: Vec<EntityMention>,
    pub entities_negative: Vec<EntityMention>,
}

/// Name and description for one bubble, as returned by the naming service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupName {
    pub name: String,
    pub description: String,
}

/// Optional post-completion naming hook.
///
/// Invoked fire-and-forget after a run is published; failures are logged and
/// never fail the run. Caching of names is the implementor's concern.
#[async_trait]
pub trait ClusterNamer: Send + Sync {
    async fn name_group(&self, request: NamingRequest) -> ClusterResult<GroupName>;
}
