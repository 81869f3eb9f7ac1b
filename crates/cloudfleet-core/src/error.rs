//! Common error types for cloudfleet.
//!
//! This module provides shared error types that are used across multiple crates.

use crate::kind::ResourceKind;
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the cloudfleet system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A state string is not part of the kind's closed state set.
    #[error("unknown {kind} state: {state:?}")]
    UnknownState {
        /// The kind whose state set was consulted.
        kind: ResourceKind,
        /// The unrecognized state string.
        state: String,
    },

    /// A resource kind name was not recognized.
    #[error("unknown resource kind: {0:?}")]
    UnknownKind(String),

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
