//! Configuration for the clustering engine.
//!
//! Every numeric constant of the pipeline is configurable; the defaults are
//! the documented production values. Whatever ends up in
//! [`EngineConfig::run`] is copied onto each run's `parameters` for
//! reproducibility.

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, ClusterResult};
use crate::types::RunParams;

/// Default lease TTL: a run exceeding this loses its lease.
pub const DEFAULT_LEASE_TTL_SECS: u64 = 30 * 60;

/// Cross-group consensus thresholds (see [`crate::consensus`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// A group participates in an item's cross-group stats only with at
    /// least this many member votes on the item.
    pub min_votes_per_cluster: u32,
    /// Agreement rate at or above which an item counts as consensus news.
    pub consensus_threshold: f64,
    /// Positive-share variance at or above which an item counts as divisive.
    pub polarization_threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_votes_per_cluster: 3,
            consensus_threshold: 0.7,
            polarization_threshold: 0.15,
        }
    }
}

/// Bridge-voter detection knobs (see [`crate::bridges`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Maximum distance to a group centroid to count as "close".
    pub distance_threshold: f64,
    /// Minimum number of close centroids to qualify as a bridge.
    pub min_connections: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 0.5,
            min_connections: 2,
        }
    }
}

/// Naming-hook payload shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Patterns per group handed to the namer, ordered by consensus.
    pub top_patterns: usize,
    /// Entities per sentiment handed to the namer.
    pub top_entities: usize,
    /// Patterns below this consensus are not considered for entity extraction.
    pub min_pattern_consensus: f64,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            top_patterns: 10,
            top_entities: 5,
            min_pattern_consensus: 0.6,
        }
    }
}

/// Main engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-run pipeline parameters (window, thresholds, seed).
    #[serde(default)]
    pub run: RunParams,
    /// Lease TTL in seconds.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub bridges: BridgeConfig,
    #[serde(default)]
    pub naming: NamingConfig,
}

fn default_lease_ttl() -> u64 {
    DEFAULT_LEASE_TTL_SECS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run: RunParams::default(),
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
            consensus: ConsensusConfig::default(),
            bridges: BridgeConfig::default(),
            naming: NamingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from files and environment.
    ///
    /// Sources, later ones winning:
    /// 1. `config/default.toml`
    /// 2. `config/{VOTEMAP_ENV}.toml`
    /// 3. Environment variables with the `VOTEMAP__` prefix
    pub fn load() -> ClusterResult<Self> {
        let env = std::env::var("VOTEMAP_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("VOTEMAP").separator("__"));

        let cfg: EngineConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the whole tree, failing fast with field context.
    pub fn validate(&self) -> ClusterResult<()> {
        self.run.validate()?;
        if self.lease_ttl_secs == 0 {
            return Err(ClusterError::InvalidParameter(
                "lease_ttl_secs must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.consensus.consensus_threshold) {
            return Err(ClusterError::InvalidParameter(format!(
                "consensus_threshold must be in [0, 1], got {}",
                self.consensus.consensus_threshold
            )));
        }
        if self.bridges.distance_threshold <= 0.0 {
            return Err(ClusterError::InvalidParameter(
                "bridges.distance_threshold must be > 0".to_string(),
            ));
        }
        if self.bridges.min_connections < 2 {
            return Err(ClusterError::InvalidParameter(
                "bridges.min_connections must be >= 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.naming.min_pattern_consensus) {
            return Err(ClusterError::InvalidParameter(
                "naming.min_pattern_consensus must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
