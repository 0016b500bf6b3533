//! In-memory stub implementations for development and testing.
//!
//! **Test only.** These implementations are deterministic and unpersisted:
//! data lives in process memory and is lost on drop. Production deployments
//! use the RocksDB-backed store from `votemap-storage`.
//!
//! - [`StaticVoteSource`]: serves a fixed [`VoteSnapshot`]
//! - [`InMemoryRunStore`]: full [`RunStore`] over hash maps, including the
//!   lease
//! - [`RecordingNamer`]: naming hook that records requests and returns a
//!   canned name

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{ClusterError, ClusterResult};
use crate::lineage::GroupMembers;
use crate::traits::{
    ClusterNamer, GroupName, NamingRequest, RunStore, VoteSnapshot, VoteSource,
};
use crate::types::{
    ClusterKind, ClusterRecord, ItemProjection, LineageRecord, MembershipRecord, RunArtifacts,
    RunId, RunRecord, RunStatus, RunView, VoterId, VoterProjection, VotingPattern,
};

/// Vote source that returns a fixed snapshot, ignoring the window.
#[derive(Debug, Clone, Default)]
pub struct StaticVoteSource {
    snapshot: VoteSnapshot,
}

impl StaticVoteSource {
    pub fn new(snapshot: VoteSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl VoteSource for StaticVoteSource {
    async fn snapshot(
        &self,
        _window_days: u32,
        _now: DateTime<Utc>,
    ) -> ClusterResult<VoteSnapshot> {
        Ok(self.snapshot.clone())
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    runs: HashMap<RunId, RunRecord>,
    projections: HashMap<RunId, Vec<VoterProjection>>,
    item_projections: HashMap<RunId, Vec<ItemProjection>>,
    clusters: HashMap<RunId, Vec<ClusterRecord>>,
    memberships: HashMap<RunId, Vec<MembershipRecord>>,
    patterns: HashMap<RunId, Vec<VotingPattern>>,
    lineage: Vec<LineageRecord>,
}

#[derive(Debug, Clone, Copy)]
struct LeaseEntry {
    holder: Uuid,
    expires_at: Instant,
}

/// In-memory [`RunStore`]. O(n) scans everywhere; fine for tests.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    inner: RwLock<StoreInner>,
    leases: Mutex<HashMap<String, LeaseEntry>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of run rows of any status (test support).
    pub fn run_count(&self) -> usize {
        self.inner.read().runs.len()
    }

    /// All memberships of a run (test support).
    pub fn memberships(&self, run_id: RunId) -> Vec<MembershipRecord> {
        self.inner
            .read()
            .memberships
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    /// All clusters of a run (test support).
    pub fn clusters(&self, run_id: RunId) -> Vec<ClusterRecord> {
        self.inner
            .read()
            .clusters
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    /// All voting patterns of a run (test support).
    pub fn patterns(&self, run_id: RunId) -> Vec<VotingPattern> {
        self.inner
            .read()
            .patterns
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    /// All projections of a run (test support).
    pub fn projections(&self, run_id: RunId) -> Vec<VoterProjection> {
        self.inner
            .read()
            .projections
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    fn completed_sorted(&self) -> Vec<RunRecord> {
        let inner = self.inner.read();
        let mut runs: Vec<RunRecord> = inner
            .runs
            .values()
            .filter(|r| r.status == RunStatus::Completed)
            .cloned()
            .collect();
        // Newest first; run id breaks creation-time ties deterministically.
        runs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.0.cmp(&a.id.0))
        });
        runs
    }

    fn remove_run(inner: &mut StoreInner, run_id: RunId) {
        inner.runs.remove(&run_id);
        Self::remove_dependents(inner, run_id);
    }

    fn remove_dependents(inner: &mut StoreInner, run_id: RunId) {
        inner.projections.remove(&run_id);
        inner.item_projections.remove(&run_id);
        inner.clusters.remove(&run_id);
        inner.memberships.remove(&run_id);
        inner.patterns.remove(&run_id);
        inner
            .lineage
            .retain(|l| l.from_run != run_id && l.to_run != run_id);
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> ClusterResult<bool> {
        let mut leases = self.leases.lock();
        let now = Instant::now();
        if let Some(entry) = leases.get(name) {
            if entry.expires_at > now && entry.holder != holder {
                return Ok(false);
            }
        }
        leases.insert(
            name.to_string(),
            LeaseEntry {
                holder,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, name: &str, holder: Uuid) -> ClusterResult<()> {
        let mut leases = self.leases.lock();
        if leases.get(name).is_some_and(|entry| entry.holder == holder) {
            leases.remove(name);
        }
        Ok(())
    }

    async fn create_run(&self, run: &RunRecord) -> ClusterResult<()> {
        self.inner.write().runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn publish_run(&self, artifacts: &RunArtifacts) -> ClusterResult<()> {
        let mut inner = self.inner.write();
        let run_id = artifacts.run.id;
        inner.runs.insert(run_id, artifacts.run.clone());
        inner
            .projections
            .insert(run_id, artifacts.projections.clone());
        inner
            .item_projections
            .insert(run_id, artifacts.item_projections.clone());
        inner.clusters.insert(run_id, artifacts.clusters.clone());
        inner
            .memberships
            .insert(run_id, artifacts.memberships.clone());
        inner.patterns.insert(run_id, artifacts.patterns.clone());
        Ok(())
    }

    async fn mark_run_failed(&self, run_id: RunId, error: &str) -> ClusterResult<()> {
        let mut inner = self.inner.write();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| ClusterError::Internal(format!("unknown run {run_id}")))?;
        run.status = RunStatus::Failed;
        run.error_message = Some(error.to_string());
        Ok(())
    }

    async fn clear_run_artifacts(&self, run_id: RunId) -> ClusterResult<()> {
        Self::remove_dependents(&mut self.inner.write(), run_id);
        Ok(())
    }

    async fn delete_run(&self, run_id: RunId) -> ClusterResult<()> {
        Self::remove_run(&mut self.inner.write(), run_id);
        Ok(())
    }

    async fn store_lineage(&self, records: &[LineageRecord]) -> ClusterResult<()> {
        self.inner.write().lineage.extend_from_slice(records);
        Ok(())
    }

    async fn attach_group_name(
        &self,
        run_id: RunId,
        local_id: u32,
        name: &str,
        description: &str,
    ) -> ClusterResult<()> {
        let mut inner = self.inner.write();
        let clusters = inner
            .clusters
            .get_mut(&run_id)
            .ok_or_else(|| ClusterError::Internal(format!("unknown run {run_id}")))?;
        let cluster = clusters
            .iter_mut()
            .find(|c| c.kind == ClusterKind::Group && c.local_id == local_id)
            .ok_or_else(|| {
                ClusterError::Internal(format!("unknown group {local_id} in run {run_id}"))
            })?;
        cluster.name = Some(name.to_string());
        cluster.description = Some(description.to_string());
        Ok(())
    }

    async fn latest_completed(&self) -> ClusterResult<Option<RunRecord>> {
        Ok(self.completed_sorted().into_iter().next())
    }

    async fn latest_completed_before(
        &self,
        created_at: DateTime<Utc>,
    ) -> ClusterResult<Option<RunRecord>> {
        Ok(self
            .completed_sorted()
            .into_iter()
            .find(|r| r.created_at < created_at))
    }

    async fn completed_runs(&self, limit: usize) -> ClusterResult<Vec<RunRecord>> {
        let mut runs = self.completed_sorted();
        runs.truncate(limit);
        Ok(runs)
    }

    async fn run(&self, run_id: RunId) -> ClusterResult<Option<RunRecord>> {
        Ok(self.inner.read().runs.get(&run_id).cloned())
    }

    async fn run_view(&self, run_id: RunId) -> ClusterResult<Option<RunView>> {
        let inner = self.inner.read();
        let Some(run) = inner.runs.get(&run_id) else {
            return Ok(None);
        };
        if run.status != RunStatus::Completed {
            return Ok(None);
        }
        Ok(Some(RunView {
            run: run.clone(),
            projections: inner.projections.get(&run_id).cloned().unwrap_or_default(),
            item_projections: inner
                .item_projections
                .get(&run_id)
                .cloned()
                .unwrap_or_default(),
            group_clusters: inner
                .clusters
                .get(&run_id)
                .map(|clusters| {
                    clusters
                        .iter()
                        .filter(|c| c.kind == ClusterKind::Group)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        }))
    }

    async fn group_members(&self, run_id: RunId) -> ClusterResult<GroupMembers> {
        let inner = self.inner.read();
        let mut members = GroupMembers::new();
        for membership in inner.memberships.get(&run_id).into_iter().flatten() {
            if membership.kind == ClusterKind::Group {
                members
                    .entry(membership.local_id)
                    .or_default()
                    .insert(membership.voter.clone());
            }
        }
        Ok(members)
    }

    async fn voter_bubble(&self, voter: &VoterId) -> ClusterResult<Option<ClusterRecord>> {
        let Some(latest) = self.latest_completed().await? else {
            return Ok(None);
        };
        let inner = self.inner.read();
        let Some(memberships) = inner.memberships.get(&latest.id) else {
            return Ok(None);
        };
        let Some(membership) = memberships
            .iter()
            .find(|m| m.kind == ClusterKind::Group && &m.voter == voter)
        else {
            return Ok(None);
        };
        Ok(inner
            .clusters
            .get(&latest.id)
            .and_then(|clusters| {
                clusters
                    .iter()
                    .find(|c| c.kind == ClusterKind::Group && c.local_id == membership.local_id)
            })
            .cloned())
    }

    async fn cluster_patterns(
        &self,
        run_id: RunId,
        kind: ClusterKind,
        local_id: u32,
    ) -> ClusterResult<Vec<VotingPattern>> {
        let inner = self.inner.read();
        let mut patterns: Vec<VotingPattern> = inner
            .patterns
            .get(&run_id)
            .into_iter()
            .flatten()
            .filter(|p| p.kind == kind && p.local_id == local_id)
            .cloned()
            .collect();
        patterns.sort_by(|a, b| {
            b.consensus
                .partial_cmp(&a.consensus)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item.cmp(&b.item))
        });
        Ok(patterns)
    }

    async fn lineage_for(&self, to_run: RunId) -> ClusterResult<Vec<LineageRecord>> {
        Ok(self
            .inner
            .read()
            .lineage
            .iter()
            .filter(|l| l.to_run == to_run)
            .cloned()
            .collect())
    }

    async fn prune_runs(&self, keep: usize) -> ClusterResult<usize> {
        let kept: Vec<RunId> = self
            .completed_sorted()
            .into_iter()
            .take(keep.max(1))
            .map(|r| r.id)
            .collect();
        let oldest_kept = kept
            .last()
            .and_then(|id| self.inner.read().runs.get(id).map(|r| r.created_at));

        let mut inner = self.inner.write();
        let doomed: Vec<RunId> = inner
            .runs
            .values()
            .filter(|run| match run.status {
                RunStatus::Completed => !kept.contains(&run.id),
                // Terminal failures older than the retention horizon go too;
                // running/pending rows are never touched.
                RunStatus::Failed => {
                    oldest_kept.map(|cutoff| run.created_at < cutoff).unwrap_or(false)
                }
                RunStatus::Running | RunStatus::Pending => false,
            })
            .map(|run| run.id)
            .collect();
        for run_id in &doomed {
            Self::remove_run(&mut inner, *run_id);
        }
        Ok(doomed.len())
    }
}

/// Naming hook that records every request and returns a canned name.
#[derive(Debug, Default)]
pub struct RecordingNamer {
    requests: Mutex<Vec<NamingRequest>>,
}

impl RecordingNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<NamingRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ClusterNamer for RecordingNamer {
    async fn name_group(&self, request: NamingRequest) -> ClusterResult<GroupName> {
        let local_id = request.local_id;
        self.requests.lock().push(request);
        Ok(GroupName {
            name: format!("bubble-{local_id}"),
            description: "stub description".to_string(),
        })
    }
}
