//! Control plane for cloudfleet resource lifecycles.
//!
//! This crate provides the business logic on top of the store: API-side
//! request handling, capacity planning, placement, and the supervisor loop
//! that drives pending work through each kind's progressions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 API clients / operators                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ requests
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ControlPlaneService                      │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Lifecycle  │ │  Rebalance  │ │  Group allocator    │    │
//! │  │  validation │ │  planning   │ │  (placement)        │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                  ┌──────────────────────┐
//!                  │   Store (RocksDB)    │◀──── Supervisor<R: Reconciler>
//!                  │  locks + state index │◀──── lock reaper
//!                  └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use cloudfleet_control::{ControlPlane, ControlPlaneService, CreateInstallationRequest};
//! use cloudfleet_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/cloudfleet")?);
//! let control = ControlPlaneService::with_defaults(store);
//!
//! let request = CreateInstallationRequest::new("acme", "acme.example.com", "9.1");
//! let installation = control.create_installation(request).await?;
//! let placed = control.place_installation(installation.meta.id).await?;
//!
//! println!("Installation {} is {}", placed.meta.id, placed.state);
//! # Ok(())
//! # }
//! ```
//!
//! # Requests and progressions
//!
//! API requests may only ask for states in a kind's request table, and only
//! while no worker holds the record's lock. Supervisors make every other move
//! while holding the lock, checked against the progression table. See the
//! [`lifecycle`] module for the validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod allocator;
pub mod error;
pub mod lifecycle;
pub mod reaper;
pub mod rebalance;
pub mod service;
pub mod supervisor;
pub mod types;

pub use allocator::{AllocationError, GroupAllocator, GroupMetric, GroupStats};
pub use error::{ControlError, Result};
pub use rebalance::RebalanceError;
pub use service::{ControlPlane, ControlPlaneService};
pub use supervisor::{Outcome, PassReport, Reconciler, Supervisor};
pub use types::{
    ControlConfig, CreateClusterRequest, CreateDbMigrationRequest, CreateDbRestorationRequest,
    CreateInstallationRequest, ResizeRequest,
};

// Re-export commonly used types from dependencies for convenience
pub use cloudfleet_core::{ResourceId, ResourceKind, WorkerId};
pub use cloudfleet_store::{Cluster, Installation, NodeGroup, Store};
