//! Core types and lifecycle state machines for cloudfleet.
//!
//! This crate provides the foundational types used throughout the cloudfleet
//! control plane:
//!
//! - **Identifiers**: [`ResourceId`] for resources, [`WorkerId`] for lock holders
//! - **Resource kinds**: the closed set of [`ResourceKind`]s
//! - **Lifecycles**: per-kind state sets, transition tables and pending work
//!   classification (see [`lifecycle`])
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use cloudfleet_core::{ResourceKind, WorkerId};
//!
//! let worker = WorkerId::new("supervisor-1").unwrap();
//! assert_eq!(worker.as_str(), "supervisor-1");
//!
//! assert!(ResourceKind::Installation.valid_transition("hibernating", "wake-up-requested"));
//! assert!(!ResourceKind::Installation.valid_transition("stable", "wake-up-requested"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod kind;
pub mod lifecycle;

pub use error::{CoreError, Result};
pub use ids::{IdError, ResourceId, WorkerId};
pub use kind::ResourceKind;
pub use lifecycle::{
    BackupState, ClusterState, DbMigrationState, DbRestorationState, InstallationState,
    LifecycleState,
};
