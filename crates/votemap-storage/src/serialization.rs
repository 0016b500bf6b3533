//! Row encoding and composite key formats.
//!
//! Values are bincode; keys are hand-built byte strings designed so that
//! every dependent row of a run sorts under the run id prefix, and the run
//! index sorts by creation time. Item keys use an order-preserving signed
//! encoding (sign bit flipped) so negative ids cannot interleave.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use votemap_core::types::{ClusterKind, ItemId, RunId, VoterId, VoterKind};

/// Errors from encoding/decoding rows and keys.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SerializationError {
    #[error("serialization failed: {0}")]
    SerializeFailed(String),

    #[error("deserialization failed: {0}")]
    DeserializeFailed(String),

    #[error("invalid key: expected at least {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid key tag byte: {0:#04x}")]
    InvalidKeyTag(u8),
}

/// Encode any serde row to bincode bytes.
pub fn encode_row<T: Serialize>(row: &T) -> Result<Vec<u8>, SerializationError> {
    bincode::serialize(row).map_err(|e| SerializationError::SerializeFailed(e.to_string()))
}

/// Decode a bincode row.
pub fn decode_row<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SerializationError> {
    bincode::deserialize(bytes).map_err(|e| SerializationError::DeserializeFailed(e.to_string()))
}

/// 16-byte run key.
pub fn run_key(run_id: RunId) -> [u8; 16] {
    *run_id.as_bytes()
}

/// Run-index key: `created_at_ms BE (8) + run id (16)`.
///
/// Millisecond precision is plenty: runs are minutes apart, and the run id
/// disambiguates pathological collisions.
pub fn run_index_key(created_at: DateTime<Utc>, run_id: RunId) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&(created_at.timestamp_millis() as u64).to_be_bytes());
    key[8..].copy_from_slice(run_id.as_bytes());
    key
}

/// Parse the run id out of a run-index key.
pub fn parse_run_index_key(key: &[u8]) -> Result<(DateTime<Utc>, RunId), SerializationError> {
    if key.len() != 24 {
        return Err(SerializationError::InvalidKeyLength {
            expected: 24,
            actual: key.len(),
        });
    }
    let mut millis_bytes = [0u8; 8];
    millis_bytes.copy_from_slice(&key[..8]);
    let millis = u64::from_be_bytes(millis_bytes) as i64;
    let created_at = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or(SerializationError::InvalidKeyLength {
            expected: 24,
            actual: key.len(),
        })?;
    let uuid = Uuid::from_slice(&key[8..])
        .map_err(|e| SerializationError::DeserializeFailed(e.to_string()))?;
    Ok((created_at, RunId(uuid)))
}

/// Upper bound for run-index entries strictly before `created_at`.
///
/// Any real entry at the same millisecond carries a non-nil run id and sorts
/// at or above this bound, so a reverse scan from here skips it.
pub fn run_index_upper_bound(created_at: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&(created_at.timestamp_millis() as u64).to_be_bytes());
    key
}

fn push_voter(key: &mut Vec<u8>, voter: &VoterId) {
    key.push(voter.kind.as_byte());
    key.extend_from_slice(voter.id.as_bytes());
}

/// Parse a voter from a key suffix (`kind byte + utf8 id`).
pub fn parse_voter_suffix(suffix: &[u8]) -> Result<VoterId, SerializationError> {
    let (&tag, id_bytes) = suffix
        .split_first()
        .ok_or(SerializationError::InvalidKeyLength {
            expected: 2,
            actual: suffix.len(),
        })?;
    let kind = VoterKind::from_byte(tag).ok_or(SerializationError::InvalidKeyTag(tag))?;
    let id = std::str::from_utf8(id_bytes)
        .map_err(|e| SerializationError::DeserializeFailed(e.to_string()))?
        .to_string();
    Ok(VoterId { kind, id })
}

/// Order-preserving 8-byte encoding of an item id.
fn item_bytes(item: ItemId) -> [u8; 8] {
    ((item.0 as u64) ^ (1u64 << 63)).to_be_bytes()
}

/// Projection key: `run id + voter key`.
pub fn projection_key(run_id: RunId, voter: &VoterId) -> Vec<u8> {
    let mut key = Vec::with_capacity(17 + voter.id.len());
    key.extend_from_slice(run_id.as_bytes());
    push_voter(&mut key, voter);
    key
}

/// Item-projection key: `run id + item key`.
pub fn item_projection_key(run_id: RunId, item: ItemId) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(run_id.as_bytes());
    key.extend_from_slice(&item_bytes(item));
    key
}

/// Cluster key: `run id + level byte + local id BE`.
pub fn cluster_key(run_id: RunId, kind: ClusterKind, local_id: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.extend_from_slice(run_id.as_bytes());
    key.push(kind.as_byte());
    key.extend_from_slice(&local_id.to_be_bytes());
    key
}

/// Membership key: `run id + level byte + voter key`.
pub fn membership_key(run_id: RunId, kind: ClusterKind, voter: &VoterId) -> Vec<u8> {
    let mut key = Vec::with_capacity(18 + voter.id.len());
    key.extend_from_slice(run_id.as_bytes());
    key.push(kind.as_byte());
    push_voter(&mut key, voter);
    key
}

/// Pattern key: `run id + level byte + local id BE + item key`.
pub fn pattern_key(run_id: RunId, kind: ClusterKind, local_id: u32, item: ItemId) -> Vec<u8> {
    let mut key = Vec::with_capacity(29);
    key.extend_from_slice(run_id.as_bytes());
    key.push(kind.as_byte());
    key.extend_from_slice(&local_id.to_be_bytes());
    key.extend_from_slice(&item_bytes(item));
    key
}

/// Lineage key: `to-run id + from-group BE + to-group BE`.
pub fn lineage_key(to_run: RunId, from_group: u32, to_group: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(to_run.as_bytes());
    key.extend_from_slice(&from_group.to_be_bytes());
    key.extend_from_slice(&to_group.to_be_bytes());
    key
}

/// Prefix of every dependent row of a run.
pub fn run_prefix(run_id: RunId) -> [u8; 16] {
    *run_id.as_bytes()
}

/// Prefix of one level's rows within a run (memberships/clusters/patterns).
pub fn run_kind_prefix(run_id: RunId, kind: ClusterKind) -> [u8; 17] {
    let mut prefix = [0u8; 17];
    prefix[..16].copy_from_slice(run_id.as_bytes());
    prefix[16] = kind.as_byte();
    prefix
}

/// System-CF key for a named lease.
pub fn lease_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(6 + name.len());
    key.extend_from_slice(b"lease:");
    key.extend_from_slice(name.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use votemap_core::types::{RunParams, RunRecord};

    #[test]
    fn test_run_record_roundtrip() {
        let run = RunRecord::started(RunParams::default(), Utc::now());
        let bytes = encode_row(&run).expect("encode");
        let decoded: RunRecord = decode_row(&bytes).expect("decode");
        assert_eq!(run, decoded);
    }

    #[test]
    fn test_run_index_key_roundtrip_and_order() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let a = run_index_key(early, RunId::new());
        let b = run_index_key(late, RunId::new());
        assert!(a < b, "keys sort by creation time");

        let (parsed_at, _) = parse_run_index_key(&a).expect("parse");
        assert_eq!(parsed_at, early);
    }

    #[test]
    fn test_run_index_upper_bound_excludes_same_instant() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let entry = run_index_key(at, RunId::new());
        let bound = run_index_upper_bound(at);
        // A reverse scan from the bound must skip an entry created at the
        // same instant.
        assert!(entry.as_slice() > bound.as_slice());
    }

    #[test]
    fn test_voter_suffix_roundtrip() {
        for voter in [VoterId::registered("42"), VoterId::session("abc-def")] {
            let key = projection_key(RunId::new(), &voter);
            let parsed = parse_voter_suffix(&key[16..]).expect("parse");
            assert_eq!(parsed, voter);
        }
    }

    #[test]
    fn test_item_key_order_preserving() {
        let run = RunId::new();
        let neg = item_projection_key(run, ItemId(-5));
        let zero = item_projection_key(run, ItemId(0));
        let pos = item_projection_key(run, ItemId(7));
        assert!(neg < zero && zero < pos);
    }

    #[test]
    fn test_kind_prefix_separates_levels() {
        let run = RunId::new();
        let base = membership_key(run, ClusterKind::Base, &VoterId::registered("1"));
        let group_prefix = run_kind_prefix(run, ClusterKind::Group);
        assert!(!base.starts_with(&group_prefix));
    }
}
