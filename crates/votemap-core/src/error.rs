//! Error types for votemap-core.
//!
//! [`ClusterError`] is the single error type surfaced by the run coordinator
//! and the trait seams. The five "public" variants (`AlreadyRunning`,
//! `InsufficientVoters`, `Numerical`, `StoreUnavailable`, `WriteConflict`)
//! form the operator-facing taxonomy; the remaining variants are internal
//! failure modes that never escape a completed pipeline.

use thiserror::Error;

/// Top-level error type for clustering operations.
///
/// Store implementations map their backend errors into `StoreUnavailable`
/// (reads) or `WriteConflict` (failed commits) so the coordinator can apply
/// its retry/rollback policy without knowing the backend.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The clustering lease is held by another run.
    ///
    /// Returned immediately; callers must not wait or queue.
    #[error("clustering already in progress")]
    AlreadyRunning,

    /// Too few voters survived filtering to produce a meaningful clustering.
    ///
    /// This is a data state, not a transient error: callers address it by
    /// widening the window or waiting for more votes.
    #[error("insufficient voters: {found} < {required}")]
    InsufficientVoters {
        /// Voters remaining after window/min-votes filtering.
        found: usize,
        /// The run's `min_voters` parameter.
        required: usize,
    },

    /// SVD or k-means failed to converge.
    ///
    /// The coordinator retries the projection once with a jittered seed
    /// before surfacing this.
    #[error("numerical failure: {0}")]
    Numerical(String),

    /// The vote store could not be read.
    #[error("vote store unavailable: {0}")]
    StoreUnavailable(String),

    /// Persisting the run failed mid-commit; partial rows were rolled back.
    #[error("write conflict: {0}")]
    WriteConflict(String),

    /// A parameter failed validation before the pipeline started.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An invariant violation or unrecoverable internal state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClusterError {
    /// Short machine-readable kind name, written to stderr by the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterError::AlreadyRunning => "AlreadyRunning",
            ClusterError::InsufficientVoters { .. } => "InsufficientVoters",
            ClusterError::Numerical(_) => "Numerical",
            ClusterError::StoreUnavailable(_) => "StoreUnavailable",
            ClusterError::WriteConflict(_) => "WriteConflict",
            ClusterError::InvalidParameter(_) => "InvalidParameter",
            ClusterError::Internal(_) => "Internal",
        }
    }

    /// Whether the condition is worth retrying from the operator's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::StoreUnavailable(_) | ClusterError::WriteConflict(_)
        )
    }
}

impl From<config::ConfigError> for ClusterError {
    fn from(err: config::ConfigError) -> Self {
        ClusterError::InvalidParameter(err.to_string())
    }
}

/// Result type alias for clustering operations.
pub type ClusterResult<T> = Result<T, ClusterError>;
