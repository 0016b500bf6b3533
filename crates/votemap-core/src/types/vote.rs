//! Votes and the three-valued opinion scale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::ItemId;
use super::voter::VoterId;

/// A voter's opinion on a news item.
///
/// Encoded into the sparse vote matrix as `+1.0`, `-1.0`, or the neutral
/// sentinel ε. The sentinel exists only so explicit neutrals survive sparse
/// storage (sparse containers elide literal zeros); it is folded back to
/// `0.0` before any arithmetic. See [`Opinion::encode`] and
/// [`Opinion::from_stored`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opinion {
    Positive,
    Negative,
    Neutral,
}

impl Opinion {
    /// Matrix encoding: `+1.0`, `-1.0`, or ε for neutral.
    pub fn encode(self, epsilon: f32) -> f32 {
        match self {
            Opinion::Positive => 1.0,
            Opinion::Negative => -1.0,
            Opinion::Neutral => epsilon,
        }
    }

    /// Decode a stored matrix value back to an opinion.
    ///
    /// Anything that is not clearly `+1`/`-1` is the neutral sentinel.
    pub fn from_stored(value: f32) -> Self {
        if value > 0.5 {
            Opinion::Positive
        } else if value < -0.5 {
            Opinion::Negative
        } else {
            Opinion::Neutral
        }
    }

    /// Numeric value for means/centering: neutral contributes `0.0`.
    pub fn numeric(self) -> f64 {
        match self {
            Opinion::Positive => 1.0,
            Opinion::Negative => -1.0,
            Opinion::Neutral => 0.0,
        }
    }

    /// Fold a stored matrix value to its numeric meaning (ε becomes `0.0`).
    ///
    /// Every aggregator that sums or averages votes must read values through
    /// this function, never the raw stored `f32`.
    pub fn stored_to_numeric(value: f32) -> f64 {
        Opinion::from_stored(value).numeric()
    }
}

/// A single vote as read from the external vote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub voter: VoterId,
    pub item: ItemId,
    pub opinion: Opinion,
    pub cast_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    #[test]
    fn test_encode_decode_roundtrip() {
        for op in [Opinion::Positive, Opinion::Negative, Opinion::Neutral] {
            assert_eq!(Opinion::from_stored(op.encode(EPS)), op);
        }
    }

    #[test]
    fn test_neutral_sentinel_is_numerically_zero() {
        let stored = Opinion::Neutral.encode(EPS);
        assert!(stored > 0.0, "sentinel must survive sparse storage");
        assert_eq!(
            Opinion::stored_to_numeric(stored),
            0.0,
            "sentinel must not bias means"
        );
    }

    #[test]
    fn test_numeric_values() {
        assert_eq!(Opinion::Positive.numeric(), 1.0);
        assert_eq!(Opinion::Negative.numeric(), -1.0);
        assert_eq!(Opinion::Neutral.numeric(), 0.0);
    }
}
