//! Resource lock types.
//!
//! A lock is a single-owner token persisted inside the resource row. An
//! unlocked row carries no lock at all; there is no sentinel owner.

use chrono::{DateTime, Utc};
use cloudfleet_core::{ResourceId, ResourceKind, WorkerId};
use serde::{Deserialize, Serialize};

/// Ownership of a resource by one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLock {
    /// The worker holding the lock.
    pub acquired_by: WorkerId,
    /// When the lock was acquired or last refreshed.
    pub acquired_at: DateTime<Utc>,
}

impl ResourceLock {
    /// Create a lock held by `worker` since `now`.
    #[must_use]
    pub const fn new(worker: WorkerId, now: DateTime<Utc>) -> Self {
        Self {
            acquired_by: worker,
            acquired_at: now,
        }
    }

    /// Whether `worker` holds this lock.
    #[must_use]
    pub fn is_held_by(&self, worker: &WorkerId) -> bool {
        self.acquired_by == *worker
    }

    /// How long the lock has been held at `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.acquired_at)
    }
}

/// Per-resource results of a bulk lock or unlock.
///
/// Each id is handled atomically on its own; the batch is not a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkLockOutcome {
    /// Ids the operation succeeded on.
    pub succeeded: Vec<ResourceId>,
    /// Ids held by another worker.
    pub contended: Vec<ResourceId>,
    /// Ids with no stored record.
    pub missing: Vec<ResourceId>,
}

impl BulkLockOutcome {
    /// Whether every requested id succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.contended.is_empty() && self.missing.is_empty()
    }
}

/// A currently held lock, as listed across all kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedResource {
    /// Kind of the locked record.
    pub kind: ResourceKind,
    /// Id of the locked record.
    pub id: ResourceId,
    /// The lock itself.
    pub lock: ResourceLock,
}
