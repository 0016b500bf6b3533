//! The run coordinator: one batch execution of the full pipeline.
//!
//! Sequence: acquire the named lease (or bail with `AlreadyRunning`), read
//! the vote snapshot, run matrix -> projection -> base clustering -> grouping ->
//! metrics, publish the run atomically, then, with the run already
//! `Completed`, compute lineage against the previous run and fire the
//! naming hook. Failures before publication mark the run `Failed`, scrub any
//! dependent rows, and surface a typed error; failures after publication are
//! logged and swallowed because lineage and names are recomputable.
//!
//! The lease carries a TTL; the coordinator checks it between components and
//! aborts at the next boundary once exceeded, so a wedged run cannot block
//! the scheduler forever.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::grouping::{assign_base_to_groups, select_groups};
use crate::kmeans::weighted_kmeans;
use crate::lineage::{compute_lineage, GroupMembers};
use crate::matrix::{build_vote_matrix, VoteMatrix};
use crate::metrics::{aggregate_cluster_votes, distance_to_centroid, top_entities};
use crate::pca::{project, PcaOutput};
use crate::traits::{ClusterNamer, NamingRequest, RunStore, VoteSnapshot, VoteSource};
use crate::types::{
    ClusterKind, ClusterRecord, ItemProjection, MembershipRecord, RunArtifacts, RunParams,
    RunRecord, RunStatus, RunSummary, VoterProjection, VotingPattern,
};

/// Name of the single-leader lease guarding the pipeline.
pub const LEASE_NAME: &str = "voter-clustering";

/// Seed offset applied when retrying a non-converging projection.
const RETRY_SEED_JITTER: u64 = 0x9E37_79B9;

/// Orchestrates one clustering run end to end.
pub struct RunCoordinator<S, R> {
    source: Arc<S>,
    store: Arc<R>,
    config: EngineConfig,
    namer: Option<Arc<dyn ClusterNamer>>,
}

impl<S, R> RunCoordinator<S, R>
where
    S: VoteSource,
    R: RunStore + 'static,
{
    pub fn new(source: Arc<S>, store: Arc<R>, config: EngineConfig) -> Self {
        Self {
            source,
            store,
            config,
            namer: None,
        }
    }

    /// Attach the optional fire-and-forget naming hook.
    #[must_use]
    pub fn with_namer(mut self, namer: Arc<dyn ClusterNamer>) -> Self {
        self.namer = Some(namer);
        self
    }

    /// Execute one run with the given parameters.
    ///
    /// At most one run is active at a time: when the lease is held this
    /// returns [`ClusterError::AlreadyRunning`] immediately, creating no run
    /// row.
    pub async fn run(&self, params: RunParams) -> ClusterResult<RunSummary> {
        params.validate()?;

        let holder = Uuid::new_v4();
        let ttl = Duration::from_secs(self.config.lease_ttl_secs);
        if !self
            .store
            .try_acquire_lease(LEASE_NAME, holder, ttl)
            .await?
        {
            info!("lease is held; refusing to start a second run");
            return Err(ClusterError::AlreadyRunning);
        }

        let result = self.run_leased(params, ttl).await;

        if let Err(err) = self.store.release_lease(LEASE_NAME, holder).await {
            warn!(error = %err, "failed to release clustering lease (it will expire)");
        }
        result
    }

    async fn run_leased(&self, params: RunParams, ttl: Duration) -> ClusterResult<RunSummary> {
        let started = Instant::now();
        let now = Utc::now();

        info!(
            window_days = params.window_days,
            min_voters = params.min_voters,
            min_votes_per_voter = params.min_votes_per_voter,
            "starting voter clustering run"
        );

        let mut run = RunRecord::started(params, now);
        self.store.create_run(&run).await?;
        let run_id = run.id;

        let outcome = self.execute(&mut run, started, ttl).await;
        match outcome {
            Ok((artifacts, snapshot)) => {
                let summary = RunSummary::from_record(&artifacts.run);
                info!(
                    run_id = %run_id,
                    n_voters = summary.n_voters,
                    n_groups = summary.n_groups,
                    silhouette = summary.silhouette,
                    computation_ms = summary.computation_ms,
                    "clustering run completed"
                );

                // The run is already published; lineage and naming must not
                // fail it.
                if let Err(err) = self.compute_and_store_lineage(&artifacts).await {
                    warn!(run_id = %run_id, error = %err, "lineage computation failed");
                }
                self.fire_naming_hook(&artifacts, &snapshot);

                Ok(summary)
            }
            Err(err) => {
                error!(run_id = %run_id, error = %err, "clustering run failed");
                if let Err(cleanup) = self.store.clear_run_artifacts(run_id).await {
                    warn!(run_id = %run_id, error = %cleanup, "failed to clear partial rows");
                }
                if let Err(mark) = self.store.mark_run_failed(run_id, &err.to_string()).await {
                    warn!(run_id = %run_id, error = %mark, "failed to mark run as failed");
                }
                Err(err)
            }
        }
    }

    /// The math pipeline plus atomic publication.
    async fn execute(
        &self,
        run: &mut RunRecord,
        started: Instant,
        ttl: Duration,
    ) -> ClusterResult<(RunArtifacts, VoteSnapshot)> {
        let params = run.params.clone();

        info!("reading vote snapshot");
        let snapshot = self
            .source
            .snapshot(params.window_days, run.created_at)
            .await?;
        check_ttl(started, ttl, "vote snapshot")?;

        info!("building vote matrix");
        let matrix = build_vote_matrix(
            snapshot.votes.clone(),
            &snapshot.claims,
            &params,
            run.created_at,
        )?;
        check_ttl(started, ttl, "matrix build")?;

        info!("computing 2D projection");
        let pca = match project(&matrix, params.seed) {
            Ok(output) => output,
            Err(ClusterError::Numerical(msg)) => {
                warn!(error = %msg, "projection did not converge; retrying with jittered seed");
                project(&matrix, params.seed.wrapping_add(RETRY_SEED_JITTER))?
            }
            Err(err) => return Err(err),
        };
        check_ttl(started, ttl, "projection")?;

        let artifacts = self.cluster_and_assemble(run, &matrix, &pca, started)?;
        check_ttl(started, ttl, "clustering")?;

        info!("publishing run");
        self.store.publish_run(&artifacts).await?;

        Ok((artifacts, snapshot))
    }

    /// Base + group clustering, metrics, and artifact assembly (pure CPU).
    fn cluster_and_assemble(
        &self,
        run: &mut RunRecord,
        matrix: &VoteMatrix,
        pca: &PcaOutput,
        started: Instant,
    ) -> ClusterResult<RunArtifacts> {
        let params = run.params.clone();
        let n_voters = matrix.n_voters();
        let points = &pca.voter_coords;

        let weights: Vec<f64> = (0..n_voters).map(|i| matrix.row_nnz(i) as f64).collect();
        let k_base = params.k_base_for(n_voters);
        let mut rng = StdRng::seed_from_u64(params.seed);

        info!(k_base, "running base k-means");
        let base = weighted_kmeans(
            points,
            &weights,
            k_base,
            params.kmeans_restarts,
            params.kmeans_max_iters,
            &mut rng,
        );

        info!("selecting bubble count");
        let grouping = select_groups(points, &params, &mut rng)?;
        let k_group = grouping.k_group;
        let parents = assign_base_to_groups(&base.labels, &grouping.labels, k_base, k_group);

        // Member row indices per cluster, both levels.
        let mut base_members: Vec<Vec<usize>> = vec![Vec::new(); k_base];
        for (row, &label) in base.labels.iter().enumerate() {
            base_members[label as usize].push(row);
        }
        let mut group_members: Vec<Vec<usize>> = vec![Vec::new(); k_group];
        for (row, &label) in grouping.labels.iter().enumerate() {
            group_members[label as usize].push(row);
        }

        // Group centroids are member means (the k-means centers drift from
        // the final assignment by at most one update step).
        let group_centroids: Vec<[f64; 2]> = group_members
            .iter()
            .enumerate()
            .map(|(g, members)| {
                if members.is_empty() {
                    return grouping.centroids[g];
                }
                let mut sum = [0.0f64; 2];
                for &row in members {
                    sum[0] += points[row][0];
                    sum[1] += points[row][1];
                }
                [sum[0] / members.len() as f64, sum[1] / members.len() as f64]
            })
            .collect();

        let projections: Vec<VoterProjection> = (0..n_voters)
            .map(|row| VoterProjection {
                voter: matrix.voter_at(row).clone(),
                x: points[row][0],
                y: points[row][1],
                n_votes_cast: matrix.row_nnz(row),
            })
            .collect();

        let item_projections: Vec<ItemProjection> = (0..matrix.n_items())
            .map(|col| ItemProjection {
                item: matrix.item_at(col),
                x: pca.item_coords[col][0],
                y: pca.item_coords[col][1],
                n_votes: matrix.col_nnz()[col],
            })
            .collect();

        let mut clusters: Vec<ClusterRecord> = Vec::new();
        let mut memberships: Vec<MembershipRecord> = Vec::new();
        let mut patterns: Vec<VotingPattern> = Vec::new();

        for (local_id, members) in base_members.iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            let local_id_u32 = local_id as u32;
            let votes = aggregate_cluster_votes(matrix, members, ClusterKind::Base, local_id_u32);
            let centroid = base.centroids[local_id];
            clusters.push(ClusterRecord {
                run_id: run.id,
                kind: ClusterKind::Base,
                local_id: local_id_u32,
                size: members.len(),
                centroid_x: centroid[0],
                centroid_y: centroid[1],
                consensus: votes.consensus,
                parent_group: Some(parents[local_id]),
                name: None,
                description: None,
            });
            for &row in members {
                memberships.push(MembershipRecord {
                    kind: ClusterKind::Base,
                    local_id: local_id_u32,
                    voter: matrix.voter_at(row).clone(),
                    distance_to_centroid: distance_to_centroid(&points[row], &centroid),
                });
            }
            patterns.extend(votes.patterns);
        }
        let n_base_clusters = clusters.len();

        for (local_id, members) in group_members.iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            let local_id_u32 = local_id as u32;
            let votes = aggregate_cluster_votes(matrix, members, ClusterKind::Group, local_id_u32);
            let centroid = group_centroids[local_id];
            clusters.push(ClusterRecord {
                run_id: run.id,
                kind: ClusterKind::Group,
                local_id: local_id_u32,
                size: members.len(),
                centroid_x: centroid[0],
                centroid_y: centroid[1],
                consensus: votes.consensus,
                parent_group: None,
                name: None,
                description: None,
            });
            for &row in members {
                memberships.push(MembershipRecord {
                    kind: ClusterKind::Group,
                    local_id: local_id_u32,
                    voter: matrix.voter_at(row).clone(),
                    distance_to_centroid: distance_to_centroid(&points[row], &centroid),
                });
            }
            patterns.extend(votes.patterns);
        }

        run.aggregates.n_voters = n_voters;
        run.aggregates.n_items = matrix.n_items();
        run.aggregates.n_base_clusters = n_base_clusters;
        run.aggregates.n_groups = k_group;
        run.aggregates.silhouette = grouping.silhouette;
        run.aggregates.variance_explained = pca.variance_explained;
        run.aggregates.computation_ms = started.elapsed().as_millis() as u64;
        run.status = RunStatus::Completed;
        run.completed_at = Some(Utc::now());

        Ok(RunArtifacts {
            run: run.clone(),
            projections,
            item_projections,
            clusters,
            memberships,
            patterns,
        })
    }

    /// Classify bubble continuity against the immediately previous run.
    async fn compute_and_store_lineage(&self, artifacts: &RunArtifacts) -> ClusterResult<()> {
        let run = &artifacts.run;
        let Some(previous) = self
            .store
            .latest_completed_before(run.created_at)
            .await?
        else {
            info!("no previous completed run; skipping lineage");
            return Ok(());
        };

        let old_members = self.store.group_members(previous.id).await?;
        let new_members = group_members_of(artifacts);

        let records = compute_lineage(previous.id, &old_members, run.id, &new_members);
        self.store.store_lineage(&records).await
    }

    /// Hand each bubble to the naming service without blocking or failing
    /// the run.
    fn fire_naming_hook(&self, artifacts: &RunArtifacts, snapshot: &VoteSnapshot) {
        let Some(namer) = self.namer.clone() else {
            return;
        };

        let naming_cfg = self.config.naming.clone();
        let mut requests = Vec::new();
        for cluster in &artifacts.clusters {
            if cluster.kind != ClusterKind::Group {
                continue;
            }
            let mut cluster_patterns: Vec<VotingPattern> = artifacts
                .patterns
                .iter()
                .filter(|p| p.kind == ClusterKind::Group && p.local_id == cluster.local_id)
                .cloned()
                .collect();
            cluster_patterns.sort_by(|a, b| {
                b.consensus
                    .partial_cmp(&a.consensus)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.item.cmp(&b.item))
            });
            let (entities_positive, entities_negative) =
                top_entities(&cluster_patterns, &snapshot.entity_tags, &naming_cfg);
            cluster_patterns.truncate(naming_cfg.top_patterns);

            requests.push(NamingRequest {
                run_id: artifacts.run.id,
                local_id: cluster.local_id,
                size: cluster.size,
                consensus: cluster.consensus,
                top_patterns: cluster_patterns,
                entities_positive,
                entities_negative,
            });
        }

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            for request in requests {
                let run_id = request.run_id;
                let local_id = request.local_id;
                match namer.name_group(request).await {
                    Ok(group_name) => {
                        if let Err(err) = store
                            .attach_group_name(
                                run_id,
                                local_id,
                                &group_name.name,
                                &group_name.description,
                            )
                            .await
                        {
                            warn!(%run_id, local_id, error = %err, "failed to attach bubble name");
                        }
                    }
                    Err(err) => {
                        warn!(%run_id, local_id, error = %err, "naming hook failed");
                    }
                }
            }
        });
    }
}

/// Abort at a component boundary once the lease TTL has been exceeded.
fn check_ttl(started: Instant, ttl: Duration, stage: &str) -> ClusterResult<()> {
    if started.elapsed() > ttl {
        return Err(ClusterError::Internal(format!(
            "lease TTL exceeded after {stage}; aborting"
        )));
    }
    Ok(())
}

/// Group member sets extracted from artifacts, for reuse by callers that
/// already hold the staged run in memory.
pub fn group_members_of(artifacts: &RunArtifacts) -> GroupMembers {
    let mut members = GroupMembers::new();
    for membership in &artifacts.memberships {
        if membership.kind == ClusterKind::Group {
            members
                .entry(membership.local_id)
                .or_default()
                .insert(membership.voter.clone());
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_ttl_boundary() {
        let started = Instant::now();
        assert!(check_ttl(started, Duration::from_secs(60), "x").is_ok());

        std::thread::sleep(Duration::from_millis(2));
        let err = check_ttl(started, Duration::from_millis(1), "matrix build").unwrap_err();
        assert!(err.to_string().contains("matrix build"));
    }
}
