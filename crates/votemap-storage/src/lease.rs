//! Named lease records.
//!
//! The single-leader guarantee rides on a small record in the system column
//! family: `(holder, acquired_at, ttl)`. A lease is live until its TTL
//! elapses; an expired lease is simply overwritten by the next acquirer, so
//! a crashed coordinator blocks the schedule for at most one TTL. The
//! in-process read-modify-write is serialized by the store's mutex; RocksDB
//! itself is single-process (file lock), so no cross-process race exists.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted state of one named lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub holder: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl LeaseRecord {
    pub fn new(holder: Uuid, acquired_at: DateTime<Utc>, ttl: std::time::Duration) -> Self {
        Self {
            holder,
            acquired_at,
            ttl_secs: ttl.as_secs(),
        }
    }

    /// Whether the lease still excludes other holders at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        let expires_at = self.acquired_at + Duration::seconds(self.ttl_secs as i64);
        now < expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_within_ttl() {
        let now = Utc::now();
        let lease = LeaseRecord::new(Uuid::new_v4(), now, std::time::Duration::from_secs(60));
        assert!(lease.is_live_at(now + Duration::seconds(59)));
        assert!(!lease.is_live_at(now + Duration::seconds(60)));
        assert!(!lease.is_live_at(now + Duration::seconds(3600)));
    }
}
