//! Error types for the storage layer.

use cloudfleet_core::{ResourceId, ResourceKind, WorkerId};
use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
///
/// Losing a lock race is not an error; lock operations report it as `false`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of the missing record.
        kind: ResourceKind,
        /// Id of the missing record.
        id: ResourceId,
    },

    /// A record with the same id already exists.
    #[error("{kind} {id} already exists")]
    AlreadyExists {
        /// Kind of the record.
        kind: ResourceKind,
        /// Id of the record.
        id: ResourceId,
    },

    /// The record is locked by another worker.
    #[error("{kind} {id} is locked by {owner}")]
    Locked {
        /// Kind of the record.
        kind: ResourceKind,
        /// Id of the record.
        id: ResourceId,
        /// Current lock holder.
        owner: WorkerId,
    },

    /// A mutation was attempted by a worker that does not hold the lock.
    #[error("{worker} does not hold the lock on {kind} {id}")]
    LockNotHeld {
        /// Kind of the record.
        kind: ResourceKind,
        /// Id of the record.
        id: ResourceId,
        /// The worker that attempted the mutation.
        worker: WorkerId,
    },

    /// API-driven changes are disabled for the record.
    #[error("{kind} {id} has its API security lock set")]
    ApiSecurityLocked {
        /// Kind of the record.
        kind: ResourceKind,
        /// Id of the record.
        id: ResourceId,
    },

    /// The record has been soft-deleted and is immutable.
    #[error("{kind} {id} is deleted")]
    Deleted {
        /// Kind of the record.
        kind: ResourceKind,
        /// Id of the record.
        id: ResourceId,
    },

    /// The state change is not in the transition table that was consulted.
    #[error("{kind} {id}: transition from {from} to {to} is not permitted")]
    IllegalTransition {
        /// Kind of the record.
        kind: ResourceKind,
        /// Id of the record.
        id: ResourceId,
        /// Stored state.
        from: &'static str,
        /// Requested state.
        to: &'static str,
        /// States from which the consulted table allows `to`.
        allowed_from: Vec<&'static str>,
    },

    /// Soft deletion requires the kind's deleted state.
    #[error("{kind} {id} cannot be soft-deleted in state {state}")]
    NotInDeletedState {
        /// Kind of the record.
        kind: ResourceKind,
        /// Id of the record.
        id: ResourceId,
        /// Stored state.
        state: &'static str,
    },

    /// The stored record changed between a caller's read and its write.
    #[error("{kind} {id} changed concurrently")]
    Conflict {
        /// Kind of the record.
        kind: ResourceKind,
        /// Id of the record.
        id: ResourceId,
    },

    /// A record handed to the store violates a creation invariant.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Conflict { .. })
    }
}
