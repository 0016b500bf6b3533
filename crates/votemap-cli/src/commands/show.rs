//! Read-only queries against completed runs, plus run pruning.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Args;
use uuid::Uuid;

use votemap_core::bridges::identify_bridges;
use votemap_core::consensus::{
    consensus_summary, cross_group_consensus, most_divisive_items, top_consensus_items,
};
use votemap_core::error::{ClusterError, ClusterResult};
use votemap_core::lineage::stability_index;
use votemap_core::traits::RunStore;
use votemap_core::types::{ClusterKind, Majority, RunId, RunRecord, VoterId, VotingPattern};
use votemap_core::EngineConfig;
use votemap_storage::RocksDbRunStore;

use super::parse_voter;

/// Arguments for `votemap latest`.
#[derive(Debug, Args)]
pub struct LatestArgs {
    /// Print the full run view (projections and clusters) as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `votemap bubble`.
#[derive(Debug, Args)]
pub struct BubbleArgs {
    /// Voter reference: `user:<id>` or `session:<id>`.
    #[arg(long)]
    pub voter: String,
}

/// Arguments for `votemap patterns`.
#[derive(Debug, Args)]
pub struct PatternsArgs {
    /// Run id (defaults to the latest completed run).
    #[arg(long)]
    pub run: Option<Uuid>,

    /// Group cluster local id.
    #[arg(long)]
    pub cluster: u32,

    /// Maximum rows to print.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

/// Arguments for `votemap lineage`.
#[derive(Debug, Args)]
pub struct LineageArgs {
    /// How many recent runs to walk.
    #[arg(long, default_value_t = 5)]
    pub runs: usize,
}

/// Arguments for `votemap prune`.
#[derive(Debug, Args)]
pub struct PruneArgs {
    /// Completed runs to keep (the latest is always kept).
    #[arg(long, default_value_t = 10)]
    pub keep: usize,
}

/// Arguments for `votemap consensus`.
#[derive(Debug, Args)]
pub struct ConsensusArgs {
    /// Run id (defaults to the latest completed run).
    #[arg(long)]
    pub run: Option<Uuid>,

    /// Items to list per section.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

/// Arguments for `votemap bridges`.
#[derive(Debug, Args)]
pub struct BridgesArgs {
    /// Run id (defaults to the latest completed run).
    #[arg(long)]
    pub run: Option<Uuid>,

    /// Bridges to list.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

async fn require_latest(store: &RocksDbRunStore) -> ClusterResult<RunRecord> {
    store.latest_completed().await?.ok_or_else(|| {
        ClusterError::InvalidParameter("no completed run exists yet".to_string())
    })
}

fn majority_glyph(majority: Majority) -> &'static str {
    match majority {
        Majority::Positive => "+",
        Majority::Negative => "-",
        Majority::Neutral => "0",
        Majority::NoVotes => "∅",
    }
}

pub async fn latest(store: Arc<RocksDbRunStore>, args: LatestArgs) -> ClusterResult<()> {
    let run = require_latest(&store).await?;

    if args.json {
        let view = store
            .run_view(run.id)
            .await?
            .ok_or_else(|| ClusterError::Internal("completed run lost its view".to_string()))?;
        let json = serde_json::to_string_pretty(&view)
            .map_err(|e| ClusterError::Internal(e.to_string()))?;
        println!("{json}");
        return Ok(());
    }

    println!("Run {} ({})", run.id, run.created_at.to_rfc3339());
    println!("  Voters:      {}", run.aggregates.n_voters);
    println!("  Items:       {}", run.aggregates.n_items);
    println!("  Bubbles:     {}", run.aggregates.n_groups);
    println!("  Silhouette:  {:.3}", run.aggregates.silhouette);
    println!(
        "  Variance:    pc1 {:.1}%, pc2 {:.1}%",
        run.aggregates.variance_explained[0] * 100.0,
        run.aggregates.variance_explained[1] * 100.0
    );

    let view = store
        .run_view(run.id)
        .await?
        .ok_or_else(|| ClusterError::Internal("completed run lost its view".to_string()))?;
    for cluster in &view.group_clusters {
        let name = cluster.name.as_deref().unwrap_or("(unnamed)");
        println!(
            "  Bubble {}: {} voters, consensus {:.2} - {}",
            cluster.local_id, cluster.size, cluster.consensus, name
        );
    }
    Ok(())
}

pub async fn bubble(store: Arc<RocksDbRunStore>, args: BubbleArgs) -> ClusterResult<()> {
    let voter = parse_voter(&args.voter)?;
    match store.voter_bubble(&voter).await? {
        Some(cluster) => {
            let name = cluster.name.as_deref().unwrap_or("(unnamed)");
            println!(
                "{voter} -> bubble {} in run {} ({} voters, consensus {:.2}) - {}",
                cluster.local_id, cluster.run_id, cluster.size, cluster.consensus, name
            );
        }
        None => println!("{voter} is not clustered in the latest run"),
    }
    Ok(())
}

pub async fn patterns(store: Arc<RocksDbRunStore>, args: PatternsArgs) -> ClusterResult<()> {
    let run_id = match args.run {
        Some(uuid) => RunId(uuid),
        None => require_latest(&store).await?.id,
    };

    let patterns = store
        .cluster_patterns(run_id, ClusterKind::Group, args.cluster)
        .await?;
    if patterns.is_empty() {
        println!("no voting patterns for bubble {} in run {run_id}", args.cluster);
        return Ok(());
    }

    println!("item        +     -     0   consensus  majority");
    for pattern in patterns.iter().take(args.limit) {
        println!(
            "{:<10} {:>4} {:>5} {:>5}   {:>8.3}  {}",
            pattern.item,
            pattern.count_pos,
            pattern.count_neg,
            pattern.count_neu,
            pattern.consensus,
            majority_glyph(pattern.majority)
        );
    }
    Ok(())
}

pub async fn lineage(store: Arc<RocksDbRunStore>, args: LineageArgs) -> ClusterResult<()> {
    let runs = store.completed_runs(args.runs).await?;
    if runs.len() < 2 {
        println!("need at least two completed runs for lineage");
        return Ok(());
    }

    // Newest first; print each consecutive pair as old -> new.
    for window in runs.windows(2) {
        let (new, old) = (&window[0], &window[1]);
        println!(
            "{} -> {} ({} -> {})",
            old.id,
            new.id,
            old.created_at.format("%Y-%m-%d %H:%M"),
            new.created_at.format("%Y-%m-%d %H:%M")
        );
        let old_members = store.group_members(old.id).await?;
        let new_members = store.group_members(new.id).await?;
        let stability = stability_index(&old_members, &new_members);
        println!(
            "  stability {:.2} ({} common voters)",
            stability.voter_retention, stability.n_common_voters
        );

        let records = store.lineage_for(new.id).await?;
        if records.is_empty() {
            println!("  (no lineage rows)");
            continue;
        }
        for record in records {
            println!(
                "  bubble {} -> bubble {}: {:?}, overlap {} ({:.0}% of old, {:.0}% of new)",
                record.from_group,
                record.to_group,
                record.kind,
                record.overlap,
                record.pct_from * 100.0,
                record.pct_to * 100.0
            );
        }
    }
    Ok(())
}

pub async fn prune(store: Arc<RocksDbRunStore>, args: PruneArgs) -> ClusterResult<()> {
    let removed = store.prune_runs(args.keep).await?;
    println!("removed {removed} runs (keeping {})", args.keep.max(1));
    Ok(())
}

async fn group_patterns_of(
    store: &RocksDbRunStore,
    run_id: RunId,
) -> ClusterResult<Vec<VotingPattern>> {
    let view = store
        .run_view(run_id)
        .await?
        .ok_or_else(|| ClusterError::InvalidParameter(format!("run {run_id} is not completed")))?;
    let mut patterns = Vec::new();
    for cluster in &view.group_clusters {
        patterns.extend(
            store
                .cluster_patterns(run_id, ClusterKind::Group, cluster.local_id)
                .await?,
        );
    }
    Ok(patterns)
}

pub async fn consensus(
    store: Arc<RocksDbRunStore>,
    config: EngineConfig,
    args: ConsensusArgs,
) -> ClusterResult<()> {
    let run_id = match args.run {
        Some(uuid) => RunId(uuid),
        None => require_latest(&store).await?.id,
    };
    let patterns = group_patterns_of(&store, run_id).await?;
    let items = cross_group_consensus(&patterns, &config.consensus);
    let summary = consensus_summary(&items, &config.consensus);

    println!(
        "{} items voted by 2+ bubbles: avg consensus {:.2}, avg polarization {:.3}",
        summary.n_items, summary.avg_consensus, summary.avg_polarization
    );
    println!(
        "({} consensus items, {} divisive items)",
        summary.n_consensus_items, summary.n_divisive_items
    );

    println!("\nBroad agreement:");
    for item in top_consensus_items(&items, &config.consensus, args.limit) {
        println!(
            "  item {}: {:.0}% of bubbles say {}, polarization {:.3}",
            item.item,
            item.consensus_rate * 100.0,
            majority_glyph(item.majority),
            item.polarization
        );
    }

    println!("\nMost divisive:");
    for item in most_divisive_items(&items, args.limit) {
        println!(
            "  item {}: polarization {:.3}, {:.0}% agreement",
            item.item,
            item.polarization,
            item.consensus_rate * 100.0
        );
    }
    Ok(())
}

pub async fn bridges(
    store: Arc<RocksDbRunStore>,
    config: EngineConfig,
    args: BridgesArgs,
) -> ClusterResult<()> {
    let run_id = match args.run {
        Some(uuid) => RunId(uuid),
        None => require_latest(&store).await?.id,
    };
    let view = store
        .run_view(run_id)
        .await?
        .ok_or_else(|| ClusterError::InvalidParameter(format!("run {run_id} is not completed")))?;

    let members = store.group_members(run_id).await?;
    let mut group_of: HashMap<VoterId, u32> = HashMap::new();
    for (group, voters) in &members {
        for voter in voters {
            group_of.insert(voter.clone(), *group);
        }
    }

    let bridges = identify_bridges(
        &view.projections,
        &group_of,
        &view.group_clusters,
        &config.bridges,
    );
    if bridges.is_empty() {
        println!("no bridge voters in run {run_id}");
        return Ok(());
    }

    println!("bridge voters (strongest first):");
    for bridge in bridges.iter().take(args.limit) {
        println!(
            "  {} in bubble {}, connects {:?}, strength {:.2} ({} votes)",
            bridge.voter, bridge.assigned_group, bridge.connected_groups, bridge.strength,
            bridge.n_votes
        );
    }
    Ok(())
}
