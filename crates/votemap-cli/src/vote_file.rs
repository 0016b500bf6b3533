//! JSON-lines vote source.
//!
//! The batch job usually runs next to the platform database; for standalone
//! operation and backfills it reads an exported snapshot instead, one JSON
//! object per line:
//!
//! ```text
//! {"type":"vote","voter_kind":"registered","voter_id":"42","item_id":10,"opinion":"positive","cast_at":"2024-06-01T12:00:00Z"}
//! {"type":"claim","session_id":"s-abc","registered_id":"42"}
//! {"type":"entity","item_id":10,"name":"Central Bank","kind":"organization","sentiment":"negative"}
//! ```
//!
//! Window filtering stays in the matrix builder; this source hands over
//! everything in the file.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use votemap_core::error::{ClusterError, ClusterResult};
use votemap_core::traits::{VoteSnapshot, VoteSource};
use votemap_core::types::{EntityKind, EntityTag, ItemId, Opinion, Sentiment, VoteRecord, VoterId, VoterKind};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SnapshotLine {
    Vote {
        voter_kind: VoterKind,
        voter_id: String,
        item_id: i64,
        opinion: Opinion,
        cast_at: DateTime<Utc>,
    },
    Claim {
        session_id: String,
        registered_id: String,
    },
    Entity {
        item_id: i64,
        name: String,
        kind: EntityKind,
        sentiment: Sentiment,
    },
}

/// Vote source reading an exported JSONL snapshot from disk.
#[derive(Debug, Clone)]
pub struct JsonlVoteSource {
    path: PathBuf,
}

impl JsonlVoteSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl VoteSource for JsonlVoteSource {
    async fn snapshot(
        &self,
        _window_days: u32,
        _now: DateTime<Utc>,
    ) -> ClusterResult<VoteSnapshot> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ClusterError::StoreUnavailable(format!(
                "cannot read vote snapshot {}: {e}",
                self.path.display()
            ))
        })?;

        let mut snapshot = VoteSnapshot::default();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed: SnapshotLine = serde_json::from_str(line).map_err(|e| {
                ClusterError::StoreUnavailable(format!(
                    "{}:{}: invalid snapshot line: {e}",
                    self.path.display(),
                    line_no + 1
                ))
            })?;
            match parsed {
                SnapshotLine::Vote {
                    voter_kind,
                    voter_id,
                    item_id,
                    opinion,
                    cast_at,
                } => snapshot.votes.push(VoteRecord {
                    voter: VoterId {
                        kind: voter_kind,
                        id: voter_id,
                    },
                    item: ItemId(item_id),
                    opinion,
                    cast_at,
                }),
                SnapshotLine::Claim {
                    session_id,
                    registered_id,
                } => {
                    snapshot.claims.insert(session_id, registered_id);
                }
                SnapshotLine::Entity {
                    item_id,
                    name,
                    kind,
                    sentiment,
                } => snapshot
                    .entity_tags
                    .entry(ItemId(item_id))
                    .or_default()
                    .push(EntityTag {
                        name,
                        kind,
                        sentiment,
                    }),
            }
        }

        info!(
            path = %self.path.display(),
            votes = snapshot.votes.len(),
            claims = snapshot.claims.len(),
            tagged_items = snapshot.entity_tags.len(),
            "loaded vote snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_parses_votes_claims_and_entities() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"type":"vote","voter_kind":"registered","voter_id":"42","item_id":10,"opinion":"positive","cast_at":"2024-06-01T12:00:00Z"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"type":"claim","session_id":"s1","registered_id":"42"}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"type":"entity","item_id":10,"name":"Central Bank","kind":"organization","sentiment":"negative"}}"#
        )
        .unwrap();

        let source = JsonlVoteSource::new(file.path().to_path_buf());
        let snapshot = source.snapshot(30, Utc::now()).await.unwrap();

        assert_eq!(snapshot.votes.len(), 1);
        assert_eq!(snapshot.votes[0].voter, VoterId::registered("42"));
        assert_eq!(snapshot.votes[0].opinion, Opinion::Positive);
        assert_eq!(snapshot.claims.get("s1").map(String::as_str), Some("42"));
        assert_eq!(snapshot.entity_tags[&ItemId(10)].len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_store_unavailable() {
        let source = JsonlVoteSource::new(PathBuf::from("/nonexistent/votes.jsonl"));
        let err = source.snapshot(30, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ClusterError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_bad_line_reports_line_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type":"vote","oops":true}}"#).unwrap();
        let source = JsonlVoteSource::new(file.path().to_path_buf());
        let err = source.snapshot(30, Utc::now()).await.unwrap_err();
        assert!(err.to_string().contains(":1:"));
    }
}
