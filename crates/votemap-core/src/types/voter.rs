//! Voter identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of identity a voter is.
///
/// A session that is later claimed by a registered account is reconciled to
/// the registered identity *before* matrix construction; within a run, voter
/// identities are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterKind {
    /// An authenticated account. Wins identity reconciliation.
    Registered,
    /// An anonymous browser session. May rotate across runs.
    Session,
}

impl VoterKind {
    /// Stable single-byte tag used in storage keys.
    pub fn as_byte(self) -> u8 {
        match self {
            VoterKind::Registered => b'u',
            VoterKind::Session => b's',
        }
    }

    /// Inverse of [`VoterKind::as_byte`].
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'u' => Some(VoterKind::Registered),
            b's' => Some(VoterKind::Session),
            _ => None,
        }
    }
}

/// Tagged voter identity: `(kind, opaque id)`.
///
/// Ids are opaque stable strings within their kind. Ordering is derived
/// (kind, then id) and is used to make matrix row assignment deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VoterId {
    pub kind: VoterKind,
    pub id: String,
}

impl VoterId {
    /// A registered-account voter.
    pub fn registered(id: impl Into<String>) -> Self {
        Self {
            kind: VoterKind::Registered,
            id: id.into(),
        }
    }

    /// An anonymous session voter.
    pub fn session(id: impl Into<String>) -> Self {
        Self {
            kind: VoterKind::Session,
            id: id.into(),
        }
    }

    /// True for registered-account identities.
    pub fn is_registered(&self) -> bool {
        self.kind == VoterKind::Registered
    }
}

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            VoterKind::Registered => write!(f, "user:{}", self.id),
            VoterKind::Session => write!(f, "session:{}", self.id),
        }
    }
}
