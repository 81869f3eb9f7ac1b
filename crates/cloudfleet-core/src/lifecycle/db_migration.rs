//! Installation database migration lifecycle.
//!
//! A migration backs up the source database, switches the installation to
//! the destination database, restores the backup into it and updates the
//! installation configuration. Any step may divert to `failing`, which
//! settles in `failed`. A succeeded migration may be rolled back.

use super::table::{StateRegistry, Transition, TransitionTable, WorkClassifier};
use super::LifecycleState;
use crate::kind::ResourceKind;

lifecycle_states! {
    /// Lifecycle states of an installation database migration.
    pub enum DbMigrationState {
        /// The migration has been requested.
        Requested => "requested",
        /// A backup of the source database is being taken.
        InstallationBackupInProgress => "installation-backup-in-progress",
        /// The installation is being pointed at the destination database.
        DatabaseSwitch => "database-switch",
        /// Database credentials are being refreshed.
        RefreshingSecrets => "refreshing-secrets",
        /// A restoration of the backup is being created.
        TriggerRestoration => "trigger-restoration",
        /// The backup is being restored into the destination database.
        RestorationInProgress => "restoration-in-progress",
        /// The installation configuration is being updated.
        UpdatingInstallationConfig => "updating-installation-config",
        /// Final bookkeeping.
        Finalizing => "finalizing",
        /// A step failed; cleanup is running.
        Failing => "failing",
        /// The migration failed.
        Failed => "failed",
        /// The migration completed.
        Succeeded => "succeeded",
        /// A rollback to the source database has been requested.
        RollbackRequested => "rollback-requested",
        /// The rollback completed.
        RollbackFinished => "rollback-finished",
        /// Removal of the operation record has been requested.
        DeletionRequested => "deletion-requested",
        /// The operation record is gone.
        Deleted => "deleted",
    }
}

use DbMigrationState as M;

static REGISTRY: StateRegistry<DbMigrationState> = StateRegistry {
    requests: TransitionTable::new(&[
        Transition {
            to: M::Requested,
            from: &[M::Requested],
        },
        Transition {
            to: M::RollbackRequested,
            from: &[M::Succeeded, M::RollbackRequested],
        },
        Transition {
            to: M::DeletionRequested,
            from: &[
                M::Failed,
                M::Succeeded,
                M::RollbackFinished,
                M::DeletionRequested,
            ],
        },
    ]),
    progressions: TransitionTable::new(&[
        Transition {
            to: M::InstallationBackupInProgress,
            from: &[M::Requested],
        },
        Transition {
            to: M::DatabaseSwitch,
            from: &[M::InstallationBackupInProgress],
        },
        Transition {
            to: M::RefreshingSecrets,
            from: &[M::DatabaseSwitch],
        },
        Transition {
            to: M::TriggerRestoration,
            from: &[M::RefreshingSecrets],
        },
        Transition {
            to: M::RestorationInProgress,
            from: &[M::TriggerRestoration],
        },
        Transition {
            to: M::UpdatingInstallationConfig,
            from: &[M::RestorationInProgress],
        },
        Transition {
            to: M::Finalizing,
            from: &[M::UpdatingInstallationConfig],
        },
        Transition {
            to: M::Succeeded,
            from: &[M::Finalizing],
        },
        Transition {
            to: M::Failing,
            from: &[
                M::Requested,
                M::InstallationBackupInProgress,
                M::DatabaseSwitch,
                M::RefreshingSecrets,
                M::TriggerRestoration,
                M::RestorationInProgress,
                M::UpdatingInstallationConfig,
                M::Finalizing,
            ],
        },
        Transition {
            to: M::Failed,
            from: &[M::Failing, M::RollbackRequested],
        },
        Transition {
            to: M::RollbackFinished,
            from: &[M::RollbackRequested],
        },
        Transition {
            to: M::Deleted,
            from: &[M::DeletionRequested],
        },
    ]),
    work: WorkClassifier::new(
        &[
            M::Requested,
            M::InstallationBackupInProgress,
            M::DatabaseSwitch,
            M::RefreshingSecrets,
            M::TriggerRestoration,
            M::RestorationInProgress,
            M::UpdatingInstallationConfig,
            M::Finalizing,
            M::Failing,
            M::RollbackRequested,
            M::DeletionRequested,
        ],
        &[(M::Failing, 1), (M::RollbackRequested, 1)],
    ),
};

impl LifecycleState for DbMigrationState {
    const KIND: ResourceKind = ResourceKind::InstallationDbMigration;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_only_after_success() {
        let registry = DbMigrationState::registry();
        assert!(registry.valid_request(M::Succeeded, M::RollbackRequested));
        assert!(!registry.valid_request(M::Failed, M::RollbackRequested));
        assert!(!registry.valid_request(M::DatabaseSwitch, M::RollbackRequested));
    }

    #[test]
    fn every_step_can_fail() {
        let registry = DbMigrationState::registry();
        for step in registry.work.pending() {
            if matches!(
                step,
                M::Failing | M::RollbackRequested | M::DeletionRequested
            ) {
                continue;
            }
            assert!(registry.valid_progression(*step, M::Failing), "{step}");
        }
    }

    #[test]
    fn in_flight_migration_cannot_be_deleted() {
        let registry = DbMigrationState::registry();
        assert!(!registry.valid_request(M::RestorationInProgress, M::DeletionRequested));
        assert!(registry.valid_request(M::RollbackFinished, M::DeletionRequested));
    }
}
