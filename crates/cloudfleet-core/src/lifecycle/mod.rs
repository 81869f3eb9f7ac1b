//! Resource lifecycle state machines.
//!
//! Every resource kind is an instance of the same abstraction: a closed set of
//! states ([`LifecycleState::ALL`]) plus a [`StateRegistry`] holding
//!
//! - a **request table**: the targets an API client may ask for,
//! - a **progression table**: the moves a supervisor makes while it holds
//!   the resource lock,
//! - a **work classifier**: which states need supervisor attention and in
//!   what order.
//!
//! All tables are immutable process-wide statics.
//!
//! # Example
//!
//! ```
//! use cloudfleet_core::lifecycle::{valid_transition, ClusterState, LifecycleState};
//!
//! assert!(valid_transition::<ClusterState>("stable", "resize-requested"));
//! assert!(!valid_transition::<ClusterState>("deleted", "resize-requested"));
//! // Unknown states fail closed.
//! assert!(!valid_transition::<ClusterState>("stable", "warp-speed"));
//!
//! assert!(ClusterState::ResizeRequested.is_pending_work());
//! ```

use std::fmt;
use std::hash::Hash;

use serde::Serialize;

use crate::kind::ResourceKind;

/// Declares a lifecycle state enum together with its persisted string forms.
macro_rules! lifecycle_states {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        $vis enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant, )+
        }

        impl $name {
            /// Every state, in declaration order.
            pub const VARIANTS: &'static [Self] = &[ $( Self::$variant, )+ ];

            /// The persisted string form of the state.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $text, )+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    _ => Err($crate::error::CoreError::UnknownState {
                        kind: <Self as $crate::lifecycle::LifecycleState>::KIND,
                        state: s.to_string(),
                    }),
                }
            }
        }
    };
}

mod backup;
mod cluster;
mod db_migration;
mod db_restoration;
mod installation;
mod table;

pub use backup::BackupState;
pub use cluster::ClusterState;
pub use db_migration::DbMigrationState;
pub use db_restoration::DbRestorationState;
pub use installation::InstallationState;
pub use table::{StateRegistry, Transition, TransitionTable, WorkClassifier};

/// A state of one resource kind's lifecycle.
pub trait LifecycleState:
    Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// The kind this state set belongs to.
    const KIND: ResourceKind;

    /// The closed, exhaustive set of states.
    const ALL: &'static [Self];

    /// The state a freshly created resource starts in.
    const INITIAL: Self;

    /// The final state reached right before soft deletion.
    const DELETED: Self;

    /// The persisted string form of the state.
    fn name(self) -> &'static str;

    /// The kind's transition tables and work classifier.
    fn registry() -> &'static StateRegistry<Self>;

    /// Parse a persisted state string. Returns `None` for anything outside
    /// [`Self::ALL`].
    #[must_use]
    fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.name() == s)
    }

    /// Whether supervisors should act on a resource in this state.
    #[must_use]
    fn is_pending_work(self) -> bool {
        Self::registry().work.is_pending(self)
    }

    /// Work priority; higher is processed first.
    #[must_use]
    fn work_priority(self) -> i32 {
        Self::registry().work.priority(self)
    }
}

/// `ValidTransition(current, requested)` over persisted state strings.
///
/// Consults the kind's request table. Either string being outside the kind's
/// state set yields `false`.
#[must_use]
pub fn valid_transition<S: LifecycleState>(current: &str, requested: &str) -> bool {
    match (S::parse(current), S::parse(requested)) {
        (Some(current), Some(requested)) => S::registry().valid_request(current, requested),
        _ => false,
    }
}

/// For one requestable state, which states accept the request and which do not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange<S> {
    /// The requestable target state.
    pub requested: S,
    /// States from which the request is accepted.
    pub accepted_from: Vec<S>,
    /// States from which the request is rejected.
    pub rejected_from: Vec<S>,
}

/// Enumerate every requestable state of `S` and partition [`LifecycleState::ALL`]
/// into the states that would accept it and those that would not.
#[must_use]
pub fn state_change_report<S: LifecycleState>() -> Vec<StateChange<S>> {
    let requests = &S::registry().requests;
    requests
        .targets()
        .map(|requested| {
            let (accepted_from, rejected_from) = S::ALL
                .iter()
                .copied()
                .partition(|current| requests.allows(*current, requested));
            StateChange {
                requested,
                accepted_from,
                rejected_from,
            }
        })
        .collect()
}

fn names<S: LifecycleState>(states: &[S]) -> Vec<&'static str> {
    states.iter().map(|state| state.name()).collect()
}

fn report_names<S: LifecycleState>() -> Vec<StateChange<&'static str>> {
    state_change_report::<S>()
        .into_iter()
        .map(|change| StateChange {
            requested: change.requested.name(),
            accepted_from: names(&change.accepted_from),
            rejected_from: names(&change.rejected_from),
        })
        .collect()
}

impl ResourceKind {
    /// [`valid_transition`] dispatched on the kind.
    #[must_use]
    pub fn valid_transition(self, current: &str, requested: &str) -> bool {
        match self {
            Self::Cluster => valid_transition::<ClusterState>(current, requested),
            Self::Installation => valid_transition::<InstallationState>(current, requested),
            Self::InstallationBackup => valid_transition::<BackupState>(current, requested),
            Self::InstallationDbMigration => {
                valid_transition::<DbMigrationState>(current, requested)
            }
            Self::InstallationDbRestoration => {
                valid_transition::<DbRestorationState>(current, requested)
            }
        }
    }

    /// Every state name of the kind.
    #[must_use]
    pub fn all_states(self) -> Vec<&'static str> {
        match self {
            Self::Cluster => names(ClusterState::ALL),
            Self::Installation => names(InstallationState::ALL),
            Self::InstallationBackup => names(BackupState::ALL),
            Self::InstallationDbMigration => names(DbMigrationState::ALL),
            Self::InstallationDbRestoration => names(DbRestorationState::ALL),
        }
    }

    /// The pending work state names of the kind.
    #[must_use]
    pub fn pending_work_states(self) -> Vec<&'static str> {
        match self {
            Self::Cluster => names(ClusterState::registry().work.pending()),
            Self::Installation => names(InstallationState::registry().work.pending()),
            Self::InstallationBackup => names(BackupState::registry().work.pending()),
            Self::InstallationDbMigration => names(DbMigrationState::registry().work.pending()),
            Self::InstallationDbRestoration => {
                names(DbRestorationState::registry().work.pending())
            }
        }
    }

    /// [`state_change_report`] for the kind, with states as strings.
    #[must_use]
    pub fn state_change_report(self) -> Vec<StateChange<&'static str>> {
        match self {
            Self::Cluster => report_names::<ClusterState>(),
            Self::Installation => report_names::<InstallationState>(),
            Self::InstallationBackup => report_names::<BackupState>(),
            Self::InstallationDbMigration => report_names::<DbMigrationState>(),
            Self::InstallationDbRestoration => report_names::<DbRestorationState>(),
        }
    }
}
