//! RocksDB column family definitions.
//!
//! Column families separate the run row, its dependent rows, and system
//! metadata so run-scoped range scans stay cheap and point lookups keep
//! their bloom filters.
//!
//! | Name | Purpose | Key Format |
//! |------|---------|------------|
//! | runs | Run rows | run id (16 bytes) |
//! | run_index | Completed-run ordering | created_at_ms BE (8) + run id (16) |
//! | projections | Voter 2D coordinates | run id + kind byte + voter id |
//! | item_projections | Item 2D coordinates | run id + item key (8) |
//! | clusters | Base/group clusters | run id + level byte + local id BE (4) |
//! | memberships | Voter -> cluster | run id + level byte + voter key |
//! | patterns | Per-(cluster, item) votes | run id + level byte + local id + item key |
//! | lineage | Run-to-run bubble edges | to-run id + from-group BE + to-group BE |
//! | system | Leases, schema version | string key |
//!
//! All column families share one LRU block cache.

use rocksdb::{BlockBasedOptions, Cache, ColumnFamilyDescriptor, Options};

/// Column family name constants.
pub mod cf_names {
    /// Run rows, keyed by run id.
    pub const RUNS: &str = "runs";

    /// Time-ordered index over run ids for latest-completed scans.
    pub const RUN_INDEX: &str = "run_index";

    /// Voter projections per run.
    pub const PROJECTIONS: &str = "projections";

    /// Item (biplot) projections per run.
    pub const ITEM_PROJECTIONS: &str = "item_projections";

    /// Cluster rows per run, both levels.
    pub const CLUSTERS: &str = "clusters";

    /// Cluster memberships per run, both levels.
    pub const MEMBERSHIPS: &str = "memberships";

    /// Per-(cluster, item) voting patterns per run.
    pub const PATTERNS: &str = "patterns";

    /// Lineage edges, keyed by the destination run.
    pub const LINEAGE: &str = "lineage";

    /// System metadata: leases, schema version. Rare access.
    pub const SYSTEM: &str = "system";

    /// All column family names (9 total).
    pub const ALL: &[&str] = &[
        RUNS,
        RUN_INDEX,
        PROJECTIONS,
        ITEM_PROJECTIONS,
        CLUSTERS,
        MEMBERSHIPS,
        PATTERNS,
        LINEAGE,
        SYSTEM,
    ];
}

/// Total number of column families opened by the store.
pub const TOTAL_COLUMN_FAMILIES: usize = 9;

/// Options for point-lookup column families (runs, system).
///
/// Bloom filters cut disk reads for misses; LZ4 keeps writes cheap.
pub fn point_lookup_options(cache: &Cache) -> Options {
    let mut block_opts = BlockBasedOptions::default();
    block_opts.set_block_cache(cache);
    block_opts.set_bloom_filter(10.0, false);
    block_opts.set_cache_index_and_filter_blocks(true);

    let mut opts = Options::default();
    opts.set_block_based_table_factory(&block_opts);
    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
    opts.create_if_missing(true);
    opts
}

/// Options for run-scoped scan column families (projections, clusters,
/// memberships, patterns, lineage, run_index).
///
/// Every key starts with a 16-byte run id (run_index: an 8-byte timestamp),
/// so iteration is always a tight prefix range.
pub fn scan_options(cache: &Cache) -> Options {
    let mut block_opts = BlockBasedOptions::default();
    block_opts.set_block_cache(cache);
    block_opts.set_cache_index_and_filter_blocks(true);

    let mut opts = Options::default();
    opts.set_block_based_table_factory(&block_opts);
    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
    opts.create_if_missing(true);
    opts
}

/// Descriptors for every column family, sharing one block cache.
pub fn get_all_column_family_descriptors(cache: &Cache) -> Vec<ColumnFamilyDescriptor> {
    cf_names::ALL
        .iter()
        .map(|&name| {
            let opts = match name {
                cf_names::RUNS | cf_names::SYSTEM => point_lookup_options(cache),
                _ => scan_options(cache),
            };
            ColumnFamilyDescriptor::new(name, opts)
        })
        .collect()
}
