//! RocksDB-backed [`RunStore`] implementation.
//!
//! One database holds every run and its dependent rows. Publication is a
//! single `WriteBatch` (RocksDB batches are atomic), so readers can never
//! observe a `Completed` run without its rows. All query methods filter on
//! run status; `Running` rows left behind by a crash are invisible.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{Cache, ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use votemap_core::error::{ClusterError, ClusterResult};
use votemap_core::lineage::GroupMembers;
use votemap_core::traits::RunStore;
use votemap_core::types::{
    ClusterKind, ClusterRecord, LineageRecord, MembershipRecord, RunArtifacts, RunId, RunRecord,
    RunStatus, RunView, VoterId, VoterProjection, VotingPattern,
};

use crate::column_families::{cf_names, get_all_column_family_descriptors};
use crate::lease::LeaseRecord;
use crate::serialization::{
    cluster_key, decode_row, encode_row, item_projection_key, lease_key, lineage_key,
    membership_key, parse_run_index_key, pattern_key, projection_key, run_index_key,
    run_index_upper_bound, run_key, run_kind_prefix, run_prefix, SerializationError,
};

/// Default shared block cache size (64 MiB; run data is small).
pub const DEFAULT_CACHE_SIZE: usize = 64 * 1024 * 1024;

/// Errors raised by the RocksDB backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open database at '{path}': {message}")]
    OpenFailed { path: String, message: String },

    #[error("column family '{name}' not found")]
    ColumnFamilyNotFound { name: String },

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Tunables for opening the database.
#[derive(Debug, Clone)]
pub struct RocksDbStoreConfig {
    /// Shared block cache size in bytes.
    pub block_cache_size: usize,
    /// Create the database if missing.
    pub create_if_missing: bool,
}

impl Default for RocksDbStoreConfig {
    fn default() -> Self {
        Self {
            block_cache_size: DEFAULT_CACHE_SIZE,
            create_if_missing: true,
        }
    }
}

/// RocksDB-backed run store.
///
/// # Thread Safety
///
/// RocksDB is internally thread-safe; share the store as
/// `Arc<RocksDbRunStore>`. The lease read-modify-write is serialized by an
/// in-process mutex (RocksDB's file lock already excludes other processes).
pub struct RocksDbRunStore {
    db: DB,
    lease_mutex: Mutex<()>,
}

impl RocksDbRunStore {
    /// Open (or create) the store at `path` with default configuration.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with_config(path, RocksDbStoreConfig::default())
    }

    /// Open (or create) the store with explicit configuration.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: RocksDbStoreConfig,
    ) -> StorageResult<Self> {
        let cache = Cache::new_lru_cache(config.block_cache_size);
        let descriptors = get_all_column_family_descriptors(&cache);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(config.create_if_missing);
        db_opts.create_missing_column_families(true);

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), descriptors).map_err(|e| {
            StorageError::OpenFailed {
                path: path.as_ref().display().to_string(),
                message: e.to_string(),
            }
        })?;

        info!(path = %path.as_ref().display(), "opened run store");
        Ok(Self {
            db,
            lease_mutex: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> StorageResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound {
                name: name.to_string(),
            })
    }

    fn get_decoded<T: DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> StorageResult<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self
            .db
            .get_cf(cf, key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
        {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Decode all values whose key starts with `prefix`.
    fn collect_prefix<T: DeserializeOwned>(
        &self,
        cf_name: &str,
        prefix: &[u8],
    ) -> StorageResult<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut rows = Vec::new();
        for entry in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = entry.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push(decode_row(&value)?);
        }
        Ok(rows)
    }

    /// Collect raw keys under a prefix (for batched deletes).
    fn collect_prefix_keys(&self, cf_name: &str, prefix: &[u8]) -> StorageResult<Vec<Box<[u8]>>> {
        let cf = self.cf(cf_name)?;
        let mut keys = Vec::new();
        for entry in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, _) = entry.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    fn get_run_sync(&self, run_id: RunId) -> StorageResult<Option<RunRecord>> {
        self.get_decoded(cf_names::RUNS, &run_key(run_id))
    }

    /// Walk the run index newest-first from an optional upper bound, yielding
    /// completed runs.
    fn completed_before(
        &self,
        bound: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StorageResult<Vec<RunRecord>> {
        let cf = self.cf(cf_names::RUN_INDEX)?;
        let upper = bound.map(run_index_upper_bound);
        let mode = match &upper {
            Some(key) => IteratorMode::From(key, Direction::Reverse),
            None => IteratorMode::End,
        };

        let mut runs = Vec::new();
        for entry in self.db.iterator_cf(cf, mode) {
            let (key, _) = entry.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            let (_, run_id) = parse_run_index_key(&key)?;
            if let Some(run) = self.get_run_sync(run_id)? {
                if run.status == RunStatus::Completed {
                    runs.push(run);
                    if runs.len() >= limit {
                        break;
                    }
                }
            }
        }
        Ok(runs)
    }

    /// Queue deletion of every dependent row of a run onto `batch`.
    fn stage_dependent_deletes(&self, batch: &mut WriteBatch, run_id: RunId) -> StorageResult<()> {
        let prefix = run_prefix(run_id);
        for cf_name in [
            cf_names::PROJECTIONS,
            cf_names::ITEM_PROJECTIONS,
            cf_names::CLUSTERS,
            cf_names::MEMBERSHIPS,
            cf_names::PATTERNS,
            cf_names::LINEAGE,
        ] {
            let cf = self.cf(cf_name)?;
            for key in self.collect_prefix_keys(cf_name, &prefix)? {
                batch.delete_cf(cf, key);
            }
        }

        // Lineage rows into *later* runs may reference this run as their
        // source; the column family is small, scan it.
        let lineage_cf = self.cf(cf_names::LINEAGE)?;
        for entry in self.db.iterator_cf(lineage_cf, IteratorMode::Start) {
            let (key, value) = entry.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            let record: LineageRecord = decode_row(&value)?;
            if record.from_run == run_id {
                batch.delete_cf(lineage_cf, key);
            }
        }
        Ok(())
    }

    fn delete_run_sync(&self, run_id: RunId) -> StorageResult<()> {
        let mut batch = WriteBatch::default();
        self.stage_dependent_deletes(&mut batch, run_id)?;
        if let Some(run) = self.get_run_sync(run_id)? {
            batch.delete_cf(
                self.cf(cf_names::RUN_INDEX)?,
                run_index_key(run.created_at, run_id),
            );
        }
        batch.delete_cf(self.cf(cf_names::RUNS)?, run_key(run_id));
        self.db
            .write(batch)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        debug!(run_id = %run_id, "deleted run and dependents");
        Ok(())
    }
}

fn read_err(err: impl std::fmt::Display) -> ClusterError {
    ClusterError::StoreUnavailable(err.to_string())
}

fn write_err(err: impl std::fmt::Display) -> ClusterError {
    ClusterError::WriteConflict(err.to_string())
}

#[async_trait]
impl RunStore for RocksDbRunStore {
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> ClusterResult<bool> {
        let _guard = self.lease_mutex.lock();
        let key = lease_key(name);
        let now = Utc::now();

        let existing: Option<LeaseRecord> =
            self.get_decoded(cf_names::SYSTEM, &key).map_err(read_err)?;
        if let Some(lease) = existing {
            if lease.is_live_at(now) && lease.holder != holder {
                debug!(name, holder = %lease.holder, "lease is held");
                return Ok(false);
            }
            if !lease.is_live_at(now) {
                warn!(name, stale_holder = %lease.holder, "stealing expired lease");
            }
        }

        let record = LeaseRecord::new(holder, now, ttl);
        let bytes = encode_row(&record).map_err(write_err)?;
        self.db
            .put_cf(self.cf(cf_names::SYSTEM).map_err(write_err)?, &key, bytes)
            .map_err(write_err)?;
        Ok(true)
    }

    async fn release_lease(&self, name: &str, holder: Uuid) -> ClusterResult<()> {
        let _guard = self.lease_mutex.lock();
        let key = lease_key(name);
        let existing: Option<LeaseRecord> =
            self.get_decoded(cf_names::SYSTEM, &key).map_err(read_err)?;
        if existing.is_some_and(|lease| lease.holder == holder) {
            self.db
                .delete_cf(self.cf(cf_names::SYSTEM).map_err(write_err)?, &key)
                .map_err(write_err)?;
        }
        Ok(())
    }

    async fn create_run(&self, run: &RunRecord) -> ClusterResult<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(cf_names::RUNS).map_err(write_err)?,
            run_key(run.id),
            encode_row(run).map_err(write_err)?,
        );
        batch.put_cf(
            self.cf(cf_names::RUN_INDEX).map_err(write_err)?,
            run_index_key(run.created_at, run.id),
            b"",
        );
        self.db.write(batch).map_err(write_err)
    }

    async fn publish_run(&self, artifacts: &RunArtifacts) -> ClusterResult<()> {
        let run = &artifacts.run;
        let run_id = run.id;
        let mut batch = WriteBatch::default();

        batch.put_cf(
            self.cf(cf_names::RUNS).map_err(write_err)?,
            run_key(run_id),
            encode_row(run).map_err(write_err)?,
        );
        batch.put_cf(
            self.cf(cf_names::RUN_INDEX).map_err(write_err)?,
            run_index_key(run.created_at, run_id),
            b"",
        );

        let projections_cf = self.cf(cf_names::PROJECTIONS).map_err(write_err)?;
        for projection in &artifacts.projections {
            batch.put_cf(
                projections_cf,
                projection_key(run_id, &projection.voter),
                encode_row(projection).map_err(write_err)?,
            );
        }

        let items_cf = self.cf(cf_names::ITEM_PROJECTIONS).map_err(write_err)?;
        for projection in &artifacts.item_projections {
            batch.put_cf(
                items_cf,
                item_projection_key(run_id, projection.item),
                encode_row(projection).map_err(write_err)?,
            );
        }

        let clusters_cf = self.cf(cf_names::CLUSTERS).map_err(write_err)?;
        for cluster in &artifacts.clusters {
            batch.put_cf(
                clusters_cf,
                cluster_key(run_id, cluster.kind, cluster.local_id),
                encode_row(cluster).map_err(write_err)?,
            );
        }

        let memberships_cf = self.cf(cf_names::MEMBERSHIPS).map_err(write_err)?;
        for membership in &artifacts.memberships {
            batch.put_cf(
                memberships_cf,
                membership_key(run_id, membership.kind, &membership.voter),
                encode_row(membership).map_err(write_err)?,
            );
        }

        let patterns_cf = self.cf(cf_names::PATTERNS).map_err(write_err)?;
        for pattern in &artifacts.patterns {
            batch.put_cf(
                patterns_cf,
                pattern_key(run_id, pattern.kind, pattern.local_id, pattern.item),
                encode_row(pattern).map_err(write_err)?,
            );
        }

        self.db.write(batch).map_err(write_err)?;
        info!(
            run_id = %run_id,
            projections = artifacts.projections.len(),
            clusters = artifacts.clusters.len(),
            memberships = artifacts.memberships.len(),
            patterns = artifacts.patterns.len(),
            "published run"
        );
        Ok(())
    }

    async fn mark_run_failed(&self, run_id: RunId, error: &str) -> ClusterResult<()> {
        let mut run = self
            .get_run_sync(run_id)
            .map_err(read_err)?
            .ok_or_else(|| ClusterError::Internal(format!("unknown run {run_id}")))?;
        run.status = RunStatus::Failed;
        run.error_message = Some(error.to_string());
        self.db
            .put_cf(
                self.cf(cf_names::RUNS).map_err(write_err)?,
                run_key(run_id),
                encode_row(&run).map_err(write_err)?,
            )
            .map_err(write_err)
    }

    async fn clear_run_artifacts(&self, run_id: RunId) -> ClusterResult<()> {
        let mut batch = WriteBatch::default();
        self.stage_dependent_deletes(&mut batch, run_id)
            .map_err(read_err)?;
        self.db.write(batch).map_err(write_err)
    }

    async fn delete_run(&self, run_id: RunId) -> ClusterResult<()> {
        self.delete_run_sync(run_id).map_err(write_err)
    }

    async fn store_lineage(&self, records: &[LineageRecord]) -> ClusterResult<()> {
        let cf = self.cf(cf_names::LINEAGE).map_err(write_err)?;
        let mut batch = WriteBatch::default();
        for record in records {
            batch.put_cf(
                cf,
                lineage_key(record.to_run, record.from_group, record.to_group),
                encode_row(record).map_err(write_err)?,
            );
        }
        self.db.write(batch).map_err(write_err)
    }

    async fn attach_group_name(
        &self,
        run_id: RunId,
        local_id: u32,
        name: &str,
        description: &str,
    ) -> ClusterResult<()> {
        let key = cluster_key(run_id, ClusterKind::Group, local_id);
        let mut cluster: ClusterRecord = self
            .get_decoded(cf_names::CLUSTERS, &key)
            .map_err(read_err)?
            .ok_or_else(|| {
                ClusterError::Internal(format!("unknown group {local_id} in run {run_id}"))
            })?;
        cluster.name = Some(name.to_string());
        cluster.description = Some(description.to_string());
        self.db
            .put_cf(
                self.cf(cf_names::CLUSTERS).map_err(write_err)?,
                key,
                encode_row(&cluster).map_err(write_err)?,
            )
            .map_err(write_err)
    }

    async fn latest_completed(&self) -> ClusterResult<Option<RunRecord>> {
        Ok(self
            .completed_before(None, 1)
            .map_err(read_err)?
            .into_iter()
            .next())
    }

    async fn latest_completed_before(
        &self,
        created_at: DateTime<Utc>,
    ) -> ClusterResult<Option<RunRecord>> {
        Ok(self
            .completed_before(Some(created_at), 1)
            .map_err(read_err)?
            .into_iter()
            .next())
    }

    async fn completed_runs(&self, limit: usize) -> ClusterResult<Vec<RunRecord>> {
        self.completed_before(None, limit).map_err(read_err)
    }

    async fn run(&self, run_id: RunId) -> ClusterResult<Option<RunRecord>> {
        self.get_run_sync(run_id).map_err(read_err)
    }

    async fn run_view(&self, run_id: RunId) -> ClusterResult<Option<RunView>> {
        let Some(run) = self.get_run_sync(run_id).map_err(read_err)? else {
            return Ok(None);
        };
        if run.status != RunStatus::Completed {
            return Ok(None);
        }

        let prefix = run_prefix(run_id);
        let projections: Vec<VoterProjection> = self
            .collect_prefix(cf_names::PROJECTIONS, &prefix)
            .map_err(read_err)?;
        let item_projections = self
            .collect_prefix(cf_names::ITEM_PROJECTIONS, &prefix)
            .map_err(read_err)?;
        let group_clusters: Vec<ClusterRecord> = self
            .collect_prefix(
                cf_names::CLUSTERS,
                &run_kind_prefix(run_id, ClusterKind::Group),
            )
            .map_err(read_err)?;

        Ok(Some(RunView {
            run,
            projections,
            item_projections,
            group_clusters,
        }))
    }

    async fn group_members(&self, run_id: RunId) -> ClusterResult<GroupMembers> {
        let memberships: Vec<MembershipRecord> = self
            .collect_prefix(
                cf_names::MEMBERSHIPS,
                &run_kind_prefix(run_id, ClusterKind::Group),
            )
            .map_err(read_err)?;
        let mut members = GroupMembers::new();
        for membership in memberships {
            members
                .entry(membership.local_id)
                .or_default()
                .insert(membership.voter);
        }
        Ok(members)
    }

    async fn voter_bubble(&self, voter: &VoterId) -> ClusterResult<Option<ClusterRecord>> {
        let Some(latest) = self.latest_completed().await? else {
            return Ok(None);
        };
        let Some(membership) = self
            .get_decoded::<MembershipRecord>(
                cf_names::MEMBERSHIPS,
                &membership_key(latest.id, ClusterKind::Group, voter),
            )
            .map_err(read_err)?
        else {
            return Ok(None);
        };
        self.get_decoded(
            cf_names::CLUSTERS,
            &cluster_key(latest.id, ClusterKind::Group, membership.local_id),
        )
        .map_err(read_err)
    }

    async fn cluster_patterns(
        &self,
        run_id: RunId,
        kind: ClusterKind,
        local_id: u32,
    ) -> ClusterResult<Vec<VotingPattern>> {
        let mut prefix = Vec::with_capacity(21);
        prefix.extend_from_slice(&run_prefix(run_id));
        prefix.push(kind.as_byte());
        prefix.extend_from_slice(&local_id.to_be_bytes());

        let mut patterns: Vec<VotingPattern> = self
            .collect_prefix(cf_names::PATTERNS, &prefix)
            .map_err(read_err)?;
        patterns.sort_by(|a, b| {
            b.consensus
                .partial_cmp(&a.consensus)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item.cmp(&b.item))
        });
        Ok(patterns)
    }

    async fn lineage_for(&self, to_run: RunId) -> ClusterResult<Vec<LineageRecord>> {
        self.collect_prefix(cf_names::LINEAGE, &run_prefix(to_run))
            .map_err(read_err)
    }

    async fn prune_runs(&self, keep: usize) -> ClusterResult<usize> {
        let completed = self.completed_before(None, usize::MAX).map_err(read_err)?;
        let kept: Vec<RunId> = completed.iter().take(keep.max(1)).map(|r| r.id).collect();
        let cutoff = completed
            .get(kept.len().saturating_sub(1))
            .map(|r| r.created_at);

        let mut doomed: Vec<RunId> = completed
            .iter()
            .skip(kept.len())
            .map(|r| r.id)
            .collect();

        // Failed runs older than the retention horizon go too; running rows
        // are never touched.
        if let Some(cutoff) = cutoff {
            let cf = self.cf(cf_names::RUNS).map_err(read_err)?;
            for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
                let (_, value) = entry.map_err(read_err)?;
                let run: RunRecord = decode_row(&value).map_err(read_err)?;
                if run.status == RunStatus::Failed && run.created_at < cutoff {
                    doomed.push(run.id);
                }
            }
        }

        for run_id in &doomed {
            self.delete_run_sync(*run_id).map_err(write_err)?;
        }
        if !doomed.is_empty() {
            info!(removed = doomed.len(), kept = kept.len(), "pruned old runs");
        }
        Ok(doomed.len())
    }
}
