//! Installation lifecycle.
//!
//! Creation walks through pre-provisioning, in-progress, DNS and final tasks.
//! Deletion is two-phase: an API request parks the installation in
//! `deletion-pending` until the supervisor (or an explicit request) promotes
//! it to `deletion-requested`; the pending period can be cancelled.
//! The `db-*` states are owned by migration and restoration supervisors and
//! only apply to a hibernated installation.

use super::table::{StateRegistry, Transition, TransitionTable, WorkClassifier};
use super::LifecycleState;
use crate::kind::ResourceKind;

lifecycle_states! {
    /// Lifecycle states of an application installation.
    pub enum InstallationState {
        /// Creation has been requested.
        CreationRequested => "creation-requested",
        /// Placement and prerequisites are being prepared.
        CreationPreProvisioning => "creation-pre-provisioning",
        /// The installation is being deployed.
        CreationInProgress => "creation-in-progress",
        /// DNS records are being configured.
        CreationDns => "creation-dns",
        /// Final creation tasks are running.
        CreationFinalTasks => "creation-final-tasks",
        /// No cluster can currently take the installation.
        CreationNoCompatibleClusters => "creation-no-compatible-clusters",
        /// Creation failed; may be re-requested.
        CreationFailed => "creation-failed",
        /// Running and idle.
        Stable => "stable",
        /// A configuration update has been requested.
        UpdateRequested => "update-requested",
        /// The update is being applied.
        UpdateInProgress => "update-in-progress",
        /// The update failed.
        UpdateFailed => "update-failed",
        /// Hibernation has been requested.
        HibernationRequested => "hibernation-requested",
        /// Workloads are being scaled down.
        HibernationInProgress => "hibernation-in-progress",
        /// Scaled to zero.
        Hibernating => "hibernating",
        /// Wake-up has been requested.
        WakeUpRequested => "wake-up-requested",
        /// Deletion with a grace period has been requested.
        DeletionPendingRequested => "deletion-pending-requested",
        /// The grace period is being set up.
        DeletionPendingInProgress => "deletion-pending-in-progress",
        /// Waiting out the deletion grace period.
        DeletionPending => "deletion-pending",
        /// A pending deletion is being cancelled.
        DeletionCancellationRequested => "deletion-cancellation-requested",
        /// Deletion has been requested.
        DeletionRequested => "deletion-requested",
        /// Resources are being torn down.
        DeletionInProgress => "deletion-in-progress",
        /// Final cleanup of external resources.
        DeletionFinalCleanup => "deletion-final-cleanup",
        /// Deletion failed; may be re-requested.
        DeletionFailed => "deletion-failed",
        /// The installation is gone.
        Deleted => "deleted",
        /// A database migration owns the installation.
        DbMigrationInProgress => "db-migration-in-progress",
        /// A database migration is being rolled back.
        DbMigrationRollbackInProgress => "db-migration-rollback-in-progress",
        /// A database migration failed.
        DbMigrationFailed => "db-migration-failed",
        /// A database restoration owns the installation.
        DbRestorationInProgress => "db-restoration-in-progress",
        /// A database restoration failed.
        DbRestorationFailed => "db-restoration-failed",
    }
}

use InstallationState as I;

static REGISTRY: StateRegistry<InstallationState> = StateRegistry {
    requests: TransitionTable::new(&[
        Transition {
            to: I::CreationRequested,
            from: &[
                I::CreationRequested,
                I::CreationNoCompatibleClusters,
                I::CreationFailed,
            ],
        },
        Transition {
            to: I::UpdateRequested,
            from: &[
                I::Stable,
                I::UpdateRequested,
                I::UpdateInProgress,
                I::UpdateFailed,
            ],
        },
        Transition {
            to: I::HibernationRequested,
            from: &[I::Stable, I::HibernationRequested],
        },
        Transition {
            to: I::WakeUpRequested,
            from: &[I::Hibernating, I::WakeUpRequested],
        },
        Transition {
            to: I::DeletionPendingRequested,
            from: &[
                I::Stable,
                I::CreationRequested,
                I::CreationNoCompatibleClusters,
                I::CreationFailed,
                I::UpdateRequested,
                I::UpdateFailed,
                I::Hibernating,
                I::DbMigrationFailed,
                I::DbRestorationFailed,
                I::DeletionPendingRequested,
            ],
        },
        Transition {
            to: I::DeletionCancellationRequested,
            from: &[I::DeletionPending, I::DeletionCancellationRequested],
        },
        Transition {
            to: I::DeletionRequested,
            from: &[I::DeletionPending, I::DeletionRequested, I::DeletionFailed],
        },
    ]),
    progressions: TransitionTable::new(&[
        Transition {
            to: I::CreationRequested,
            from: &[I::CreationNoCompatibleClusters],
        },
        Transition {
            to: I::CreationPreProvisioning,
            from: &[I::CreationRequested],
        },
        Transition {
            to: I::CreationNoCompatibleClusters,
            from: &[I::CreationRequested, I::CreationPreProvisioning],
        },
        Transition {
            to: I::CreationInProgress,
            from: &[I::CreationPreProvisioning],
        },
        Transition {
            to: I::CreationDns,
            from: &[I::CreationInProgress],
        },
        Transition {
            to: I::CreationFinalTasks,
            from: &[I::CreationDns],
        },
        Transition {
            to: I::CreationFailed,
            from: &[
                I::CreationRequested,
                I::CreationPreProvisioning,
                I::CreationInProgress,
                I::CreationDns,
                I::CreationFinalTasks,
                I::CreationNoCompatibleClusters,
            ],
        },
        Transition {
            to: I::Stable,
            from: &[
                I::CreationFinalTasks,
                I::UpdateRequested,
                I::UpdateInProgress,
                I::WakeUpRequested,
                I::DeletionCancellationRequested,
            ],
        },
        Transition {
            to: I::UpdateInProgress,
            from: &[I::UpdateRequested],
        },
        Transition {
            to: I::UpdateFailed,
            from: &[I::UpdateRequested, I::UpdateInProgress],
        },
        Transition {
            to: I::HibernationInProgress,
            from: &[I::HibernationRequested],
        },
        Transition {
            to: I::Hibernating,
            from: &[
                I::HibernationInProgress,
                I::DbMigrationInProgress,
                I::DbMigrationRollbackInProgress,
                I::DbRestorationInProgress,
            ],
        },
        Transition {
            to: I::DbMigrationInProgress,
            from: &[I::Hibernating],
        },
        Transition {
            to: I::DbMigrationRollbackInProgress,
            from: &[I::Hibernating, I::DbMigrationFailed],
        },
        Transition {
            to: I::DbMigrationFailed,
            from: &[I::DbMigrationInProgress, I::DbMigrationRollbackInProgress],
        },
        Transition {
            to: I::DbRestorationInProgress,
            from: &[I::Hibernating, I::DbMigrationInProgress],
        },
        Transition {
            to: I::DbRestorationFailed,
            from: &[I::DbRestorationInProgress],
        },
        Transition {
            to: I::DeletionPendingInProgress,
            from: &[I::DeletionPendingRequested],
        },
        Transition {
            to: I::DeletionPending,
            from: &[I::DeletionPendingInProgress],
        },
        Transition {
            to: I::DeletionRequested,
            from: &[I::DeletionPending],
        },
        Transition {
            to: I::DeletionInProgress,
            from: &[I::DeletionRequested],
        },
        Transition {
            to: I::DeletionFinalCleanup,
            from: &[I::DeletionInProgress],
        },
        Transition {
            to: I::DeletionFailed,
            from: &[
                I::DeletionPendingInProgress,
                I::DeletionRequested,
                I::DeletionInProgress,
                I::DeletionFinalCleanup,
            ],
        },
        Transition {
            to: I::Deleted,
            from: &[I::DeletionFinalCleanup],
        },
    ]),
    work: WorkClassifier::new(
        &[
            I::CreationRequested,
            I::CreationPreProvisioning,
            I::CreationInProgress,
            I::CreationDns,
            I::CreationFinalTasks,
            I::CreationNoCompatibleClusters,
            I::UpdateRequested,
            I::UpdateInProgress,
            I::HibernationRequested,
            I::HibernationInProgress,
            I::WakeUpRequested,
            I::DeletionPendingRequested,
            I::DeletionPendingInProgress,
            I::DeletionPending,
            I::DeletionCancellationRequested,
            I::DeletionRequested,
            I::DeletionInProgress,
            I::DeletionFinalCleanup,
        ],
        &[
            (I::CreationRequested, 3),
            (I::CreationPreProvisioning, 2),
            (I::CreationInProgress, 2),
            (I::CreationDns, 2),
            (I::CreationFinalTasks, 2),
            (I::WakeUpRequested, 1),
            (I::DeletionCancellationRequested, 1),
            (I::CreationNoCompatibleClusters, -1),
            (I::DeletionPending, -2),
        ],
    ),
};

impl LifecycleState for InstallationState {
    const KIND: ResourceKind = ResourceKind::Installation;
    const ALL: &'static [Self] = Self::VARIANTS;
    const INITIAL: Self = Self::CreationRequested;
    const DELETED: Self = Self::Deleted;

    fn name(self) -> &'static str {
        self.as_str()
    }

    fn registry() -> &'static StateRegistry<Self> {
        &REGISTRY
    }
}
