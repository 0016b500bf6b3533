//! Votemap CLI
//!
//! Batch trigger and read-only queries for the opinion-clustering engine.
//!
//! # Commands
//!
//! - `run`: execute one clustering run against an exported vote snapshot
//! - `latest`: show the current (latest completed) run
//! - `bubble`: look up a voter's bubble in the current run
//! - `patterns`: a bubble's voting patterns, strongest consensus first
//! - `lineage`: bubble continuity across recent runs
//! - `prune`: delete old runs
//!
//! # Exit codes (for schedulers)
//!
//! 0 on success, 2 on `InsufficientVoters`, 3 on `AlreadyRunning`, 1 on any
//! other error; the error kind is printed to stderr as a single line.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use votemap_core::error::ClusterResult;
use votemap_core::EngineConfig;
use votemap_storage::RocksDbRunStore;

mod commands;
mod error;
mod vote_file;

pub use error::exit_code_for;

/// Votemap - voter opinion clustering for news voting platforms
#[derive(Parser)]
#[command(name = "votemap")]
#[command(version)]
#[command(about = "Cluster voters into opinion bubbles and query the results")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the run database.
    #[arg(long, default_value = "votemap-db")]
    db: PathBuf,

    /// Verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the clustering pipeline once, synchronously.
    Run(commands::run::RunArgs),
    /// Show the latest completed run.
    Latest(commands::show::LatestArgs),
    /// Look up a voter's bubble in the latest run.
    Bubble(commands::show::BubbleArgs),
    /// Print a bubble's voting patterns, strongest consensus first.
    Patterns(commands::show::PatternsArgs),
    /// Print bubble lineage across recent runs.
    Lineage(commands::show::LineageArgs),
    /// Cross-bubble agreement: which items unite or divide the bubbles.
    Consensus(commands::show::ConsensusArgs),
    /// Voters whose projection sits between bubbles.
    Bridges(commands::show::BridgesArgs),
    /// Delete old runs, keeping the most recent completed ones.
    Prune(commands::show::PruneArgs),
}

async fn dispatch(cli: Cli) -> ClusterResult<()> {
    let config = EngineConfig::load()?;
    let store = Arc::new(
        RocksDbRunStore::open(&cli.db)
            .map_err(|e| votemap_core::ClusterError::StoreUnavailable(e.to_string()))?,
    );

    match cli.command {
        Commands::Run(args) => commands::run::execute(store, config, args).await,
        Commands::Latest(args) => commands::show::latest(store, args).await,
        Commands::Bubble(args) => commands::show::bubble(store, args).await,
        Commands::Patterns(args) => commands::show::patterns(store, args).await,
        Commands::Lineage(args) => commands::show::lineage(store, args).await,
        Commands::Consensus(args) => commands::show::consensus(store, config, args).await,
        Commands::Bridges(args) => commands::show::bridges(store, config, args).await,
        Commands::Prune(args) => commands::show::prune(store, args).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = dispatch(cli).await {
        // One line with the kind for scripts, the detail for humans.
        eprintln!("{}: {err}", err.kind());
        std::process::exit(exit_code_for(&err));
    }
}
