//! End-to-end pipeline scenarios over the in-memory stubs.
//!
//! Covers the engine's observable contract: trivial separation, degenerate
//! unanimity, neutral-vs-missing, lineage continuity, the already-running
//! guard, boundary voter counts, and fixed-seed idempotence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use votemap_core::stubs::{InMemoryRunStore, RecordingNamer, StaticVoteSource};
use votemap_core::traits::{RunStore, VoteSnapshot, VoteSource};
use votemap_core::types::{
    ClusterKind, ItemId, Majority, Opinion, RunParams, RunStatus, VoteRecord, VoterId,
};
use votemap_core::{ClusterError, EngineConfig, RunCoordinator};

fn snapshot_of(votes: Vec<(VoterId, i64, Opinion)>) -> VoteSnapshot {
    let cast_at = Utc::now() - chrono::Duration::hours(1);
    VoteSnapshot {
        votes: votes
            .into_iter()
            .map(|(voter, item, opinion)| VoteRecord {
                voter,
                item: ItemId(item),
                opinion,
                cast_at,
            })
            .collect(),
        claims: HashMap::new(),
        entity_tags: HashMap::new(),
    }
}

fn coordinator(
    snapshot: VoteSnapshot,
) -> (
    Arc<InMemoryRunStore>,
    RunCoordinator<StaticVoteSource, InMemoryRunStore>,
) {
    let store = Arc::new(InMemoryRunStore::new());
    let source = Arc::new(StaticVoteSource::new(snapshot));
    let coordinator = RunCoordinator::new(source, Arc::clone(&store), EngineConfig::default());
    (store, coordinator)
}

fn params(min_voters: usize, min_votes_per_voter: usize) -> RunParams {
    RunParams {
        min_voters,
        min_votes_per_voter,
        ..RunParams::default()
    }
}

/// Two perfectly opposed 20-voter blocs.
fn two_bloc_votes() -> Vec<(VoterId, i64, Opinion)> {
    let mut votes = Vec::new();
    for i in 1..=20 {
        let v = VoterId::registered(format!("a{i:02}"));
        votes.push((v.clone(), 1, Opinion::Positive));
        votes.push((v, 2, Opinion::Negative));
    }
    for i in 21..=40 {
        let v = VoterId::registered(format!("b{i:02}"));
        votes.push((v.clone(), 1, Opinion::Negative));
        votes.push((v, 2, Opinion::Positive));
    }
    votes
}

async fn assert_universal_invariants(store: &InMemoryRunStore, run_id: votemap_core::RunId) {
    let run = store.run(run_id).await.unwrap().expect("run row");
    assert_eq!(run.status, RunStatus::Completed);

    let projections = store.projections(run_id);
    let memberships = store.memberships(run_id);
    let clusters = store.clusters(run_id);
    let patterns = store.patterns(run_id);

    let projected: HashSet<&VoterId> = projections.iter().map(|p| &p.voter).collect();
    assert_eq!(projected.len(), projections.len(), "one projection per voter");

    // Every projected voter has exactly one base and one group membership,
    // and memberships never reference unprojected voters.
    for kind in [ClusterKind::Base, ClusterKind::Group] {
        let mut seen: HashMap<&VoterId, usize> = HashMap::new();
        for membership in memberships.iter().filter(|m| m.kind == kind) {
            *seen.entry(&membership.voter).or_insert(0) += 1;
            assert!(
                projected.contains(&membership.voter),
                "membership voter must be projected"
            );
        }
        assert_eq!(seen.len(), projected.len(), "every voter assigned ({kind:?})");
        assert!(
            seen.values().all(|&n| n == 1),
            "exactly one {kind:?} membership per voter"
        );
    }

    // Cluster sizes sum to the voter count at both levels.
    for kind in [ClusterKind::Base, ClusterKind::Group] {
        let total: usize = clusters
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.size)
            .sum();
        assert_eq!(total, projections.len(), "sizes sum to N ({kind:?})");
    }

    assert!(
        (2..=5).contains(&run.aggregates.n_groups),
        "n_groups in [2, 5], got {}",
        run.aggregates.n_groups
    );

    for pattern in &patterns {
        assert!(pattern.total_votes() >= 1, "no empty pattern rows");
        assert_eq!(
            pattern.majority,
            Majority::from_counts(pattern.count_pos, pattern.count_neg, pattern.count_neu),
            "majority matches argmax with tie-break"
        );
        assert!((0.0..=1.0).contains(&pattern.consensus));
    }
    for cluster in &clusters {
        assert!((0.0..=1.0).contains(&cluster.consensus));
    }
    assert!((-1.0..=1.0).contains(&run.aggregates.silhouette));
}

#[tokio::test]
async fn scenario_a_trivial_separation() {
    let (store, coordinator) = coordinator(snapshot_of(two_bloc_votes()));
    let summary = coordinator.run(params(20, 2)).await.expect("run");

    assert_eq!(summary.n_voters, 40);
    assert_eq!(summary.n_groups, 2);
    assert!(summary.silhouette > 0.7, "silhouette {}", summary.silhouette);
    assert_universal_invariants(&store, summary.run_id).await;

    // Each group is exactly one bloc.
    let members = store.group_members(summary.run_id).await.unwrap();
    assert_eq!(members.len(), 2);
    for group in members.values() {
        assert_eq!(group.len(), 20);
        let prefixes: HashSet<char> = group.iter().map(|v| v.id.chars().next().unwrap()).collect();
        assert_eq!(prefixes.len(), 1, "a bloc never splits across groups");
    }

    // Within each group, every item is unanimous.
    for pattern in store
        .patterns(summary.run_id)
        .iter()
        .filter(|p| p.kind == ClusterKind::Group)
    {
        assert!(
            (pattern.consensus - 1.0).abs() < 1e-12,
            "per-item consensus 1.0, got {}",
            pattern.consensus
        );
        assert_eq!(pattern.total_votes(), 20);
    }
}

#[tokio::test]
async fn scenario_b_unanimous_consensus() {
    let votes = (1..=60)
        .map(|i| {
            (
                VoterId::registered(format!("v{i:02}")),
                1,
                Opinion::Positive,
            )
        })
        .collect();
    let (store, coordinator) = coordinator(snapshot_of(votes));
    let summary = coordinator.run(params(50, 1)).await.expect("run");

    assert_eq!(summary.n_voters, 60);
    assert_eq!(summary.n_groups, 2, "k selection still lands on 2");
    assert!(
        summary.silhouette.abs() < 1e-9,
        "degenerate point mass has silhouette near 0"
    );

    // All voters collapse into one persisted group cluster.
    let group_clusters: Vec<_> = store
        .clusters(summary.run_id)
        .into_iter()
        .filter(|c| c.kind == ClusterKind::Group)
        .collect();
    assert_eq!(group_clusters.len(), 1, "empty clusters are not persisted");
    assert_eq!(group_clusters[0].size, 60);

    let patterns = store
        .cluster_patterns(summary.run_id, ClusterKind::Group, group_clusters[0].local_id)
        .await
        .unwrap();
    assert_eq!(patterns.len(), 1);
    let p = &patterns[0];
    assert_eq!(p.count_pos as usize, group_clusters[0].size);
    assert_eq!((p.count_neg, p.count_neu), (0, 0));
    assert!((p.consensus - 1.0).abs() < 1e-12);
    assert_eq!(p.majority, Majority::Positive);
}

#[tokio::test]
async fn scenario_c_neutral_vs_missing() {
    let mut votes = Vec::new();
    for i in 1..=25 {
        let v = VoterId::registered(format!("n{i:02}"));
        votes.push((v.clone(), 1, Opinion::Neutral));
        votes.push((v, 2, Opinion::Positive));
    }
    for i in 26..=50 {
        let v = VoterId::registered(format!("m{i:02}"));
        votes.push((v, 2, Opinion::Negative));
    }
    let (store, coordinator) = coordinator(snapshot_of(votes));
    let summary = coordinator.run(params(50, 1)).await.expect("run");

    assert_eq!(summary.n_voters, 50);
    assert_universal_invariants(&store, summary.run_id).await;

    // Item 1: exactly 25 votes exist across all group patterns, all neutral.
    let item1: Vec<_> = store
        .patterns(summary.run_id)
        .into_iter()
        .filter(|p| p.kind == ClusterKind::Group && p.item == ItemId(1))
        .collect();
    let total: u32 = item1.iter().map(|p| p.total_votes()).sum();
    let neutral: u32 = item1.iter().map(|p| p.count_neu).sum();
    let positive: u32 = item1.iter().map(|p| p.count_pos).sum();
    let negative: u32 = item1.iter().map(|p| p.count_neg).sum();
    assert_eq!(total, 25, "the non-voters contribute nothing to item 1");
    assert_eq!(neutral, 25, "the sentinel never leaks out of neutral counts");
    assert_eq!((positive, negative), (0, 0));
}

#[tokio::test]
async fn scenario_d_lineage_continuation() {
    let (store, coordinator) = coordinator(snapshot_of(two_bloc_votes()));
    let first = coordinator.run(params(20, 2)).await.expect("first run");
    let second = coordinator.run(params(20, 2)).await.expect("second run");

    let lineage = store.lineage_for(second.run_id).await.unwrap();
    assert_eq!(
        lineage.len(),
        second.n_groups,
        "exactly one edge per new bubble"
    );
    for record in &lineage {
        assert_eq!(record.from_run, first.run_id);
        assert_eq!(record.to_run, second.run_id);
        assert_eq!(record.kind, votemap_core::LineageKind::Continuation);
        assert!(record.pct_from > 0.8 && record.pct_to > 0.8);
    }
}

#[tokio::test]
async fn scenario_f_already_running_guard() {
    struct SlowSource(StaticVoteSource);

    #[async_trait::async_trait]
    impl VoteSource for SlowSource {
        async fn snapshot(
            &self,
            window_days: u32,
            now: chrono::DateTime<Utc>,
        ) -> votemap_core::ClusterResult<VoteSnapshot> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.0.snapshot(window_days, now).await
        }
    }

    let store = Arc::new(InMemoryRunStore::new());
    let source = Arc::new(SlowSource(StaticVoteSource::new(snapshot_of(
        two_bloc_votes(),
    ))));
    let coordinator = Arc::new(RunCoordinator::new(
        source,
        Arc::clone(&store),
        EngineConfig::default(),
    ));

    let background = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.run(params(20, 2)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let second = coordinator.run(params(20, 2)).await;
    assert!(
        started.elapsed() < Duration::from_millis(100),
        "the guard must not wait for the running job"
    );
    assert!(matches!(second, Err(ClusterError::AlreadyRunning)));
    assert_eq!(store.run_count(), 1, "no second run row was created");

    let first = background.await.expect("join").expect("first run");
    assert_eq!(store.run_count(), 1);
    assert_universal_invariants(&store, first.run_id).await;
}

#[tokio::test]
async fn boundary_exactly_min_voters_completes() {
    let votes = (1..=20)
        .map(|i| {
            let opinion = if i % 2 == 0 {
                Opinion::Positive
            } else {
                Opinion::Negative
            };
            (VoterId::registered(format!("v{i:02}")), 1, opinion)
        })
        .collect();
    let (_store, coordinator) = coordinator(snapshot_of(votes));
    let summary = coordinator.run(params(20, 1)).await.expect("run");
    assert_eq!(summary.n_voters, 20);
}

#[tokio::test]
async fn boundary_one_below_min_voters_fails_cleanly() {
    let votes = (1..=19)
        .map(|i| (VoterId::registered(format!("v{i:02}")), 1, Opinion::Positive))
        .collect();
    let (store, coordinator) = coordinator(snapshot_of(votes));
    let err = coordinator.run(params(20, 1)).await.unwrap_err();
    match err {
        ClusterError::InsufficientVoters { found, required } => {
            assert_eq!((found, required), (19, 20));
        }
        other => panic!("expected InsufficientVoters, got {other:?}"),
    }

    // The failed run row remains (with a reason); no dependent rows exist.
    assert_eq!(store.run_count(), 1);
    assert!(store.latest_completed().await.unwrap().is_none());
    let failed = store.completed_runs(10).await.unwrap();
    assert!(failed.is_empty());
}

#[tokio::test]
async fn fixed_seed_runs_are_identical() {
    let (store, coordinator) = coordinator(snapshot_of(two_bloc_votes()));
    let first = coordinator.run(params(20, 2)).await.expect("first");
    let second = coordinator.run(params(20, 2)).await.expect("second");

    assert_eq!(first.silhouette, second.silhouette);
    assert_eq!(first.n_groups, second.n_groups);

    // Projections and group member sets match exactly.
    let mut p1 = store.projections(first.run_id);
    let mut p2 = store.projections(second.run_id);
    p1.sort_by(|a, b| a.voter.cmp(&b.voter));
    p2.sort_by(|a, b| a.voter.cmp(&b.voter));
    let coords1: Vec<_> = p1.iter().map(|p| (p.voter.clone(), p.x, p.y)).collect();
    let coords2: Vec<_> = p2.iter().map(|p| (p.voter.clone(), p.x, p.y)).collect();
    assert_eq!(coords1, coords2);

    let m1 = store.group_members(first.run_id).await.unwrap();
    let m2 = store.group_members(second.run_id).await.unwrap();
    let sets1: HashSet<Vec<&VoterId>> = m1
        .values()
        .map(|s| {
            let mut v: Vec<&VoterId> = s.iter().collect();
            v.sort();
            v
        })
        .collect();
    let sets2: HashSet<Vec<&VoterId>> = m2
        .values()
        .map(|s| {
            let mut v: Vec<&VoterId> = s.iter().collect();
            v.sort();
            v
        })
        .collect();
    assert_eq!(sets1, sets2);

    // Consensus values are byte-identical too.
    let mut c1: Vec<(ClusterKind, u32, f64)> = store
        .clusters(first.run_id)
        .iter()
        .map(|c| (c.kind, c.local_id, c.consensus))
        .collect();
    let mut c2: Vec<(ClusterKind, u32, f64)> = store
        .clusters(second.run_id)
        .iter()
        .map(|c| (c.kind, c.local_id, c.consensus))
        .collect();
    c1.sort_by(|a, b| (a.0.as_byte(), a.1).cmp(&(b.0.as_byte(), b.1)));
    c2.sort_by(|a, b| (a.0.as_byte(), a.1).cmp(&(b.0.as_byte(), b.1)));
    assert_eq!(c1, c2);
}

#[tokio::test]
async fn identical_voters_share_a_base_cluster() {
    let mut votes = two_bloc_votes();
    // Twins with identical ballots.
    for twin in ["t1", "t2"] {
        let v = VoterId::registered(twin);
        votes.push((v.clone(), 1, Opinion::Positive));
        votes.push((v, 2, Opinion::Negative));
    }
    let (store, coordinator) = coordinator(snapshot_of(votes));
    let summary = coordinator.run(params(20, 2)).await.expect("run");

    let memberships = store.memberships(summary.run_id);
    let base_of = |id: &str| {
        memberships
            .iter()
            .find(|m| m.kind == ClusterKind::Base && m.voter == VoterId::registered(id))
            .map(|m| m.local_id)
            .expect("base membership")
    };
    assert_eq!(base_of("t1"), base_of("t2"));
}

#[tokio::test]
async fn voter_bubble_query_uses_latest_run() {
    let (store, coordinator) = coordinator(snapshot_of(two_bloc_votes()));
    let summary = coordinator.run(params(20, 2)).await.expect("run");

    let bubble = store
        .voter_bubble(&VoterId::registered("a01"))
        .await
        .unwrap()
        .expect("bubble");
    assert_eq!(bubble.run_id, summary.run_id);
    assert_eq!(bubble.kind, ClusterKind::Group);
    assert_eq!(bubble.size, 20);

    assert!(store
        .voter_bubble(&VoterId::registered("stranger"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn naming_hook_attaches_names_without_blocking() {
    let store = Arc::new(InMemoryRunStore::new());
    let source = Arc::new(StaticVoteSource::new(snapshot_of(two_bloc_votes())));
    let namer = Arc::new(RecordingNamer::new());
    let coordinator = RunCoordinator::new(source, Arc::clone(&store), EngineConfig::default())
        .with_namer(namer.clone());

    let summary = coordinator.run(params(20, 2)).await.expect("run");

    // The hook is fire-and-forget; poll briefly for the spawned task.
    let mut named = 0;
    for _ in 0..50 {
        named = store
            .clusters(summary.run_id)
            .iter()
            .filter(|c| c.kind == ClusterKind::Group && c.name.is_some())
            .count();
        if named == summary.n_groups {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(named, summary.n_groups, "every bubble gets a name");
    assert_eq!(namer.requests().len(), summary.n_groups);
    for request in namer.requests() {
        assert!(request.top_patterns.len() <= 10);
        assert!(!request.top_patterns.is_empty());
    }
}

#[tokio::test]
async fn run_view_exposes_projections_and_groups() {
    let (store, coordinator) = coordinator(snapshot_of(two_bloc_votes()));
    let summary = coordinator.run(params(20, 2)).await.expect("run");

    let view = store
        .run_view(summary.run_id)
        .await
        .unwrap()
        .expect("view of a completed run");
    assert_eq!(view.projections.len(), 40);
    assert_eq!(view.item_projections.len(), 2);
    assert_eq!(view.group_clusters.len(), 2);
    assert!(view
        .group_clusters
        .iter()
        .all(|c| c.kind == ClusterKind::Group));
}
