//! Exit-code mapping for the trigger command.
//!
//! Schedulers branch on the code: 0 completed, 2 means "not enough data yet,
//! widen the window or wait", 3 means "another run is in flight", 1 is any
//! other failure. The error kind goes to stderr as a single line so cron
//! mails stay greppable.

use votemap_core::ClusterError;

/// Exit code for a failed engine invocation.
pub fn exit_code_for(err: &ClusterError) -> i32 {
    match err {
        ClusterError::InsufficientVoters { .. } => 2,
        ClusterError::AlreadyRunning => 3,
        _ => 1,
    }
}
