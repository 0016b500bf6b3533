#![deny(deprecated)]

//! Votemap Core Library
//!
//! Opinion-clustering engine for a news-voting platform. Voters express one
//! of three opinions (positive, negative, neutral) on news items; this crate
//! turns a rolling window of those votes into a stable 2D map of voter
//! "bubbles" with per-bubble consensus statistics.
//!
//! # Architecture
//!
//! The pipeline runs as a batch job under a single-leader lease:
//!
//! 1. [`matrix`]: sparse vote matrix construction with identity
//!    reconciliation and the neutral-sentinel encoding
//! 2. [`pca`]: sparsity-aware 2D projection (observed-entry centering,
//!    per-voter density rescaling)
//! 3. [`kmeans`]: weighted base clustering (~10-100 fine clusters)
//! 4. [`grouping`]: silhouette-driven reduction to 2-5 bubbles
//! 5. [`metrics`]: consensus, voting patterns, similarity, silhouette
//! 6. [`pipeline`]: the run coordinator persisting immutable runs
//! 7. [`lineage`]: bubble continuity between consecutive runs
//!
//! Storage backends implement the [`traits::RunStore`] seam; the vote store
//! is external and read through [`traits::VoteSource`].

pub mod bridges;
pub mod config;
pub mod consensus;
pub mod error;
pub mod grouping;
pub mod kmeans;
pub mod lineage;
pub mod matrix;
pub mod metrics;
pub mod pca;
pub mod pipeline;
pub mod stubs;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use config::EngineConfig;
pub use error::{ClusterError, ClusterResult};
pub use pipeline::{RunCoordinator, LEASE_NAME};
pub use types::{
    ClusterKind, ClusterRecord, ItemId, LineageKind, LineageRecord, Majority, MembershipRecord,
    Opinion, RunId, RunParams, RunRecord, RunStatus, RunSummary, VoteRecord, VoterId, VoterKind,
    VotingPattern,
};
