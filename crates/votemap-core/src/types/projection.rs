//! 2D biplot coordinates for voters and items.

use serde::{Deserialize, Serialize};

use super::item::ItemId;
use super::voter::VoterId;

/// A voter's position in the shared 2D opinion space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterProjection {
    pub voter: VoterId,
    pub x: f64,
    pub y: f64,
    /// Votes this voter cast inside the run's window (the matrix row nnz).
    pub n_votes_cast: usize,
}

/// An item's position in the same space (biplot counterpart).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemProjection {
    pub item: ItemId,
    pub x: f64,
    pub y: f64,
    /// Votes this item received inside the window (the matrix column nnz).
    pub n_votes: usize,
}
