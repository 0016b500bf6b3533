//! The trigger command: run the clustering pipeline once, synchronously.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use votemap_core::error::ClusterResult;
use votemap_core::types::RunParams;
use votemap_core::{EngineConfig, RunCoordinator};
use votemap_storage::RocksDbRunStore;

use crate::vote_file::JsonlVoteSource;

/// Arguments for `votemap run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Exported vote snapshot (JSON lines: votes, claims, entity tags).
    #[arg(long)]
    pub votes: PathBuf,

    /// Only include votes from the last N days.
    #[arg(long, default_value_t = 30)]
    pub window_days: u32,

    /// Minimum voters required for the run to proceed.
    #[arg(long, default_value_t = 50)]
    pub min_voters: usize,

    /// Voters with fewer votes are dropped.
    #[arg(long, default_value_t = 3)]
    pub min_votes_per_voter: usize,

    /// Override the RNG seed (defaults to the configured seed).
    #[arg(long)]
    pub seed: Option<u64>,
}

pub async fn execute(
    store: Arc<RocksDbRunStore>,
    config: EngineConfig,
    args: RunArgs,
) -> ClusterResult<()> {
    let params = RunParams {
        window_days: args.window_days,
        min_voters: args.min_voters,
        min_votes_per_voter: args.min_votes_per_voter,
        seed: args.seed.unwrap_or(config.run.seed),
        ..config.run.clone()
    };

    let source = Arc::new(JsonlVoteSource::new(args.votes));
    let coordinator = RunCoordinator::new(source, store, config);
    let summary = coordinator.run(params).await?;

    println!("Clustering complete:");
    println!("  Run ID:      {}", summary.run_id);
    println!("  Voters:      {}", summary.n_voters);
    println!("  Items:       {}", summary.n_items);
    println!("  Base groups: {}", summary.n_base_clusters);
    println!("  Bubbles:     {}", summary.n_groups);
    println!("  Silhouette:  {:.3}", summary.silhouette);
    println!("  Time:        {} ms", summary.computation_ms);
    Ok(())
}
