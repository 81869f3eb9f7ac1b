//! Installation backup lifecycle.

use super::table::{StateRegistry, Transition, TransitionTable, WorkClassifier};
use super::LifecycleState;
use crate::kind::ResourceKind;

lifecycle_states! {
    /// Lifecycle states of an installation backup.
    pub enum BackupState {
        /// A backup has been requested.
        BackupRequested => "backup-requested",
        /// The backup job is running.
        BackupInProgress => "backup-in-progress",
        /// The backup completed and its data is stored.
        BackupSucceeded => "backup-succeeded",
        /// The backup failed; may be re-requested.
        BackupFailed => "backup-failed",
        /// Deletion of the backup data has been requested.
        DeletionRequested => "deletion-requested",
        /// Deletion failed; may be re-requested.
        DeletionFailed => "deletion-failed",
        /// The backup data is gone.
        Deleted => "deleted",
    }
}

use BackupState as B;

static REGISTRY: StateRegistry<BackupState> = StateRegistry {
    requests: TransitionTable::new(&[
        Transition {
            to: B::BackupRequested,
            from: &[B::BackupRequested, B::BackupFailed],
        },
        Transition {
            to: B::DeletionRequested,
            from: &[
                B::BackupRequested,
                B::BackupInProgress,
                B::BackupSucceeded,
                B::BackupFailed,
                B::DeletionRequested,
                B::DeletionFailed,
            ],
        },
    ]),
    progressions: TransitionTable::new(&[
        Transition {
            to: B::BackupInProgress,
            from: &[B::BackupRequested],
        },
        Transition {
            to: B::BackupSucceeded,
            from: &[B::BackupInProgress],
        },
        Transition {
            to: B::BackupFailed,
            from: &[B::BackupRequested, B::BackupInProgress],
        },
        Transition {
            to: B::DeletionFailed,
            from: &[B::DeletionRequested],
        },
        Transition {
            to: B::Deleted,
            from: &[B::DeletionRequested],
        },
    ]),
    work: WorkClassifier::new(
        &[B::BackupRequested, B::BackupInProgress, B::DeletionRequested],
        &[(B::BackupInProgress, 1), (B::DeletionRequested, -1)],
    ),
};

impl LifecycleState for BackupState {
    const KIND: ResourceKind = ResourceKind::InstallationBackup;
    const ALL: &'static [Self] = Self::VARIANTS;
    const INITIAL: Self = Self::BackupRequested;
    const DELETED: Self = Self::Deleted;

    fn name(self) -> &'static str {
        self.as_str()
    }

    fn registry() -> &'static StateRegistry<Self> {
        &REGISTRY
    }
}
