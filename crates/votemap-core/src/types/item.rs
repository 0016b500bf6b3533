//! News items and entity tags.
//!
//! The engine treats items as opaque ids; titles and bodies belong to the
//! surrounding application. Entity tags are produced by an external
//! enrichment step and are consumed here only to build naming-hook payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque news-item id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ItemId(pub i64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a named entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Organization,
    Place,
    Other,
}

/// Sentiment with which an item mentions an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// A named entity attached to an item by external enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityTag {
    pub name: String,
    pub kind: EntityKind,
    pub sentiment: Sentiment,
}

/// An entity aggregated across a cluster's high-consensus items, with the
/// number of items that mention it. Part of the naming-hook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMention {
    pub name: String,
    pub kind: EntityKind,
    pub count: usize,
}
