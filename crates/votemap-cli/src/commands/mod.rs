//! CLI command handlers.
//!
//! - `run`: trigger one clustering run
//! - `show`: read-only queries against completed runs (latest, bubble,
//!   patterns, lineage) and run pruning

pub mod run;
pub mod show;

use votemap_core::error::{ClusterError, ClusterResult};
use votemap_core::types::{VoterId, VoterKind};

/// Parse `user:<id>` / `session:<id>` voter references from the command line.
pub fn parse_voter(input: &str) -> ClusterResult<VoterId> {
    let (kind, id) = input.split_once(':').ok_or_else(|| {
        ClusterError::InvalidParameter(format!(
            "voter must look like user:<id> or session:<id>, got '{input}'"
        ))
    })?;
    let kind = match kind {
        "user" => VoterKind::Registered,
        "session" => VoterKind::Session,
        other => {
            return Err(ClusterError::InvalidParameter(format!(
                "unknown voter kind '{other}'"
            )))
        }
    };
    if id.is_empty() {
        return Err(ClusterError::InvalidParameter(
            "voter id must not be empty".to_string(),
        ));
    }
    Ok(VoterId {
        kind,
        id: id.to_string(),
    })
}
