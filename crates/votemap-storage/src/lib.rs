#![deny(deprecated)]

//! Votemap Storage Layer
//!
//! Persistent run storage for the clustering engine, backed by RocksDB.
//!
//! # Architecture
//! - `column_families`: nine column families separating runs, their dependent
//!   rows, and system metadata
//! - `serialization`: bincode row encoding and composite key formats
//! - `lease`: the persisted named lease behind single-leader coordination
//! - `run_store`: [`RocksDbRunStore`], the `votemap_core::traits::RunStore`
//!   implementation
//!
//! # Visibility
//!
//! A run becomes visible to readers in a single `WriteBatch` that carries the
//! `Completed` run row together with every dependent row; queries filter on
//! run status, so `Running`/`Failed` rows (including those left behind by a
//! crash) are never served as the current run.

pub mod column_families;
pub mod lease;
pub mod run_store;
pub mod serialization;

pub use column_families::{cf_names, get_all_column_family_descriptors, TOTAL_COLUMN_FAMILIES};
pub use lease::LeaseRecord;
pub use run_store::{RocksDbRunStore, RocksDbStoreConfig, StorageError, StorageResult};
pub use serialization::SerializationError;
