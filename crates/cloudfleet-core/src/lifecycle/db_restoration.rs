//! Installation database restoration lifecycle.

use super::table::{StateRegistry, Transition, TransitionTable, WorkClassifier};
use super::LifecycleState;
use crate::kind::ResourceKind;

lifecycle_states! {
    /// Lifecycle states of an installation database restoration.
    pub enum DbRestorationState {
        /// The restoration has been requested.
        Requested => "requested",
        /// The restore job is running.
        InProgress => "in-progress",
        /// The installation is being returned to its target state.
        Finalizing => "finalizing",
        /// The restoration completed.
        Succeeded => "succeeded",
        /// A step failed; cleanup is running.
        Failing => "failing",
        /// The restoration failed.
        Failed => "failed",
        /// The request can never succeed (e.g. the backup is unusable).
        Invalid => "invalid",
        /// Removal of the operation record has been requested.
        DeletionRequested => "deletion-requested",
        /// The operation record is gone.
        Deleted => "deleted",
    }
}

use DbRestorationState as R;

static REGISTRY: StateRegistry<DbRestorationState> = StateRegistry {
    requests: TransitionTable::new(&[
        Transition {
            to: R::Requested,
            from: &[R::Requested],
        },
        Transition {
            to: R::DeletionRequested,
            from: &[R::Succeeded, R::Failed, R::Invalid, R::DeletionRequested],
        },
    ]),
    progressions: TransitionTable::new(&[
        Transition {
            to: R::InProgress,
            from: &[R::Requested],
        },
        Transition {
            to: R::Finalizing,
            from: &[R::InProgress],
        },
        Transition {
            to: R::Succeeded,
            from: &[R::Finalizing],
        },
        Transition {
            to: R::Failing,
            from: &[R::Requested, R::InProgress, R::Finalizing],
        },
        Transition {
            to: R::Failed,
            from: &[R::Failing],
        },
        Transition {
            to: R::Invalid,
            from: &[R::Requested],
        },
        Transition {
            to: R::Deleted,
            from: &[R::DeletionRequested],
        },
    ]),
    work: WorkClassifier::new(
        &[
            R::Requested,
            R::InProgress,
            R::Finalizing,
            R::Failing,
            R::DeletionRequested,
        ],
        &[(R::Failing, 1)],
    ),
};

impl LifecycleState for DbRestorationState {
    const KIND: ResourceKind = ResourceKind::InstallationDbRestoration;
    const ALL: &'static [Self] = Self::VARIANTS;
    const INITIAL: Self = Self::Requested;
    const DELETED: Self = Self::Deleted;

    fn name(self) -> &'static str {
        self.as_str()
    }

    fn registry() -> &'static StateRegistry<Self> {
        &REGISTRY
    }
}
