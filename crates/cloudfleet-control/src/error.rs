//! Error types for the control plane.
//!
//! This module defines all errors that can occur while validating requests,
//! planning resizes, placing installations and supervising resources.

use cloudfleet_core::{ResourceId, ResourceKind, WorkerId};
use cloudfleet_store::StoreError;
use thiserror::Error;

use crate::allocator::AllocationError;
use crate::rebalance::RebalanceError;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The requested resource was not found.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Id of the resource.
        id: ResourceId,
    },

    /// The requested state change is not in the kind's transition table.
    #[error(
        "{kind} {id}: cannot move from {from} to {to}; {to} is only reachable from [{}]",
        .allowed_from.join(", ")
    )]
    InvalidTransition {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Id of the resource.
        id: ResourceId,
        /// The current state.
        from: &'static str,
        /// The requested target state.
        to: &'static str,
        /// States from which the target is legal.
        allowed_from: Vec<&'static str>,
    },

    /// A state name outside the kind's state set.
    #[error("unknown {kind} state: {state}")]
    UnknownState {
        /// Kind the state was given for.
        kind: ResourceKind,
        /// The unrecognized state.
        state: String,
    },

    /// The resource is locked by a worker.
    #[error("{kind} {id} is locked by {owner}")]
    ResourceLocked {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Id of the resource.
        id: ResourceId,
        /// The current lock holder.
        owner: WorkerId,
    },

    /// A worker tried to release or use a lock it does not hold.
    #[error("{worker} does not hold the lock on {kind} {id}")]
    NotLockOwner {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Id of the resource.
        id: ResourceId,
        /// The worker that made the attempt.
        worker: WorkerId,
    },

    /// API-driven changes are disabled for the resource.
    #[error("{kind} {id} has its API security lock set")]
    ApiSecurityLocked {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Id of the resource.
        id: ResourceId,
    },

    /// The resource has been deleted.
    #[error("{kind} {id} is deleted")]
    Deleted {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Id of the resource.
        id: ResourceId,
    },

    /// The request is well-formed but cannot be honoured.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A resize cannot be planned.
    #[error("resize rejected: {0}")]
    Rebalance(#[from] RebalanceError),

    /// No group could be chosen.
    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(StoreError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::InvalidTransition { .. } | Self::NotLockOwner { .. } | Self::Deleted { .. } => {
                409
            }
            Self::UnknownState { .. } | Self::InvalidRequest(_) | Self::Rebalance(_) => 400,
            Self::ResourceLocked { .. } | Self::ApiSecurityLocked { .. } => 423,
            Self::Allocation(_) => 503,
            Self::Store(e) if e.is_retriable() => 503,
            Self::Store(_) | Self::Config(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::ResourceLocked { .. } | Self::Allocation(_) => true,
            Self::Store(e) => e.is_retriable(),
            _ => false,
        }
    }
}

impl From<StoreError> for ControlError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            StoreError::Locked { kind, id, owner } => Self::ResourceLocked { kind, id, owner },
            StoreError::LockNotHeld { kind, id, worker } => Self::NotLockOwner { kind, id, worker },
            StoreError::ApiSecurityLocked { kind, id } => Self::ApiSecurityLocked { kind, id },
            StoreError::Deleted { kind, id } => Self::Deleted { kind, id },
            StoreError::IllegalTransition {
                kind,
                id,
                from,
                to,
                allowed_from,
            } => Self::InvalidTransition {
                kind,
                id,
                from,
                to,
                allowed_from,
            },
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let id = ResourceId::from_bytes([1u8; 16]);
        let kind = ResourceKind::Cluster;
        let owner = WorkerId::new("w1").unwrap();

        assert_eq!(ControlError::NotFound { kind, id }.http_status_code(), 404);
        assert_eq!(
            ControlError::ResourceLocked { kind, id, owner }.http_status_code(),
            423
        );
        assert_eq!(
            ControlError::Rebalance(RebalanceError::NoGroups).http_status_code(),
            400
        );
        assert_eq!(
            ControlError::Store(StoreError::Database("io".into())).http_status_code(),
            503
        );
        assert_eq!(
            ControlError::Store(StoreError::Serialization("bad".into())).http_status_code(),
            500
        );
    }

    #[test]
    fn store_errors_are_translated() {
        let id = ResourceId::from_bytes([1u8; 16]);
        let err: ControlError = StoreError::IllegalTransition {
            kind: ResourceKind::Installation,
            id,
            from: "stable",
            to: "wake-up-requested",
            allowed_from: vec!["hibernating", "wake-up-requested"],
        }
        .into();
        match err {
            ControlError::InvalidTransition { allowed_from, .. } => {
                assert_eq!(allowed_from, vec!["hibernating", "wake-up-requested"]);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }

        let err: ControlError = StoreError::Database("io".into()).into();
        assert!(err.is_retriable());
        let err: ControlError = StoreError::ApiSecurityLocked {
            kind: ResourceKind::Cluster,
            id,
        }
        .into();
        assert!(!err.is_retriable());
        assert_eq!(err.http_status_code(), 423);
    }

    #[test]
    fn rejected_progression_lists_progression_sources() {
        use cloudfleet_core::BackupState;
        use cloudfleet_store::{InstallationBackup, MemoryStore, Store};

        let store = MemoryStore::new();
        let worker = WorkerId::new("supervisor-1").unwrap();
        let mut backup = InstallationBackup::new(ResourceId::from_bytes([2u8; 16]));
        store.create(&backup).unwrap();
        assert!(store.lock::<InstallationBackup>(backup.meta.id, &worker).unwrap());

        backup.state = BackupState::BackupSucceeded;
        let err: ControlError = store.update(&backup, &worker).unwrap_err().into();
        match err {
            ControlError::InvalidTransition {
                from, allowed_from, ..
            } => {
                assert_eq!(from, "backup-requested");
                assert_eq!(allowed_from, vec!["backup-in-progress"]);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn invalid_transition_message_names_legal_sources() {
        let err = ControlError::InvalidTransition {
            kind: ResourceKind::Cluster,
            id: ResourceId::from_bytes([1u8; 16]),
            from: "creation-requested",
            to: "resize-requested",
            allowed_from: vec!["stable", "resize-requested", "resize-failed"],
        };
        let message = err.to_string();
        assert!(message.contains("[stable, resize-requested, resize-failed]"));
    }
}
