//! Cluster lifecycle.
//!
//! ```text
//!   creation-requested ──▶ creation-in-progress ──▶ provisioning-requested
//!          ▲                      │                          │
//!          └── creation-failed ◀──┘                          ▼
//!                                              provision-in-progress ──▶ stable
//!                                                                          │
//!   stable ──▶ {upgrade, resize, nodegroups-creation, nodegroups-deletion}-requested
//!          ──▶ refresh-metadata ──▶ stable
//!   any settled state ──▶ deletion-requested ──▶ deleted
//! ```

use super::table::{StateRegistry, Transition, TransitionTable, WorkClassifier};
use super::LifecycleState;
use crate::kind::ResourceKind;

lifecycle_states! {
    /// Lifecycle states of a Kubernetes cluster.
    pub enum ClusterState {
        /// Provisioned and idle.
        Stable => "stable",
        /// Cloud-side metadata should be re-read.
        RefreshMetadata => "refresh-metadata",
        /// Creation has been requested.
        CreationRequested => "creation-requested",
        /// The cloud cluster is being created.
        CreationInProgress => "creation-in-progress",
        /// Creation failed; may be re-requested.
        CreationFailed => "creation-failed",
        /// Cluster-level software provisioning has been requested.
        ProvisioningRequested => "provisioning-requested",
        /// Provisioning is running.
        ProvisionInProgress => "provision-in-progress",
        /// Provisioning failed; may be re-requested.
        ProvisioningFailed => "provisioning-failed",
        /// A Kubernetes version upgrade has been requested.
        UpgradeRequested => "upgrade-requested",
        /// The upgrade failed.
        UpgradeFailed => "upgrade-failed",
        /// A node group resize has been requested.
        ResizeRequested => "resize-requested",
        /// The resize failed.
        ResizeFailed => "resize-failed",
        /// Additional node groups have been requested.
        NodeGroupsCreationRequested => "nodegroups-creation-requested",
        /// Node group creation failed.
        NodeGroupsCreationFailed => "nodegroups-creation-failed",
        /// Node group removal has been requested.
        NodeGroupsDeletionRequested => "nodegroups-deletion-requested",
        /// Node group removal failed.
        NodeGroupsDeletionFailed => "nodegroups-deletion-failed",
        /// Deletion has been requested.
        DeletionRequested => "deletion-requested",
        /// Deletion failed; may be re-requested.
        DeletionFailed => "deletion-failed",
        /// The cluster is gone.
        Deleted => "deleted",
    }
}

use ClusterState as C;

static REGISTRY: StateRegistry<ClusterState> = StateRegistry {
    requests: TransitionTable::new(&[
        Transition {
            to: C::CreationRequested,
            from: &[C::CreationRequested, C::CreationFailed],
        },
        Transition {
            to: C::ProvisioningRequested,
            from: &[C::Stable, C::ProvisioningRequested, C::ProvisioningFailed],
        },
        Transition {
            to: C::RefreshMetadata,
            from: &[C::Stable, C::RefreshMetadata],
        },
        Transition {
            to: C::UpgradeRequested,
            from: &[C::Stable, C::UpgradeRequested, C::UpgradeFailed],
        },
        Transition {
            to: C::ResizeRequested,
            from: &[C::Stable, C::ResizeRequested, C::ResizeFailed],
        },
        Transition {
            to: C::NodeGroupsCreationRequested,
            from: &[
                C::Stable,
                C::NodeGroupsCreationRequested,
                C::NodeGroupsCreationFailed,
            ],
        },
        Transition {
            to: C::NodeGroupsDeletionRequested,
            from: &[
                C::Stable,
                C::NodeGroupsDeletionRequested,
                C::NodeGroupsDeletionFailed,
            ],
        },
        Transition {
            to: C::DeletionRequested,
            from: &[
                C::Stable,
                C::RefreshMetadata,
                C::CreationRequested,
                C::CreationFailed,
                C::ProvisioningFailed,
                C::UpgradeRequested,
                C::UpgradeFailed,
                C::ResizeRequested,
                C::ResizeFailed,
                C::NodeGroupsCreationFailed,
                C::NodeGroupsDeletionFailed,
                C::DeletionRequested,
                C::DeletionFailed,
            ],
        },
    ]),
    progressions: TransitionTable::new(&[
        Transition {
            to: C::CreationInProgress,
            from: &[C::CreationRequested],
        },
        Transition {
            to: C::CreationFailed,
            from: &[C::CreationRequested, C::CreationInProgress],
        },
        Transition {
            to: C::ProvisioningRequested,
            from: &[C::CreationInProgress],
        },
        Transition {
            to: C::ProvisionInProgress,
            from: &[C::ProvisioningRequested],
        },
        Transition {
            to: C::ProvisioningFailed,
            from: &[C::ProvisioningRequested, C::ProvisionInProgress],
        },
        Transition {
            to: C::Stable,
            from: &[
                C::ProvisionInProgress,
                C::RefreshMetadata,
                C::UpgradeRequested,
                C::ResizeRequested,
                C::NodeGroupsCreationRequested,
                C::NodeGroupsDeletionRequested,
            ],
        },
        Transition {
            to: C::UpgradeFailed,
            from: &[C::UpgradeRequested],
        },
        Transition {
            to: C::ResizeFailed,
            from: &[C::ResizeRequested],
        },
        Transition {
            to: C::NodeGroupsCreationFailed,
            from: &[C::NodeGroupsCreationRequested],
        },
        Transition {
            to: C::NodeGroupsDeletionFailed,
            from: &[C::NodeGroupsDeletionRequested],
        },
        Transition {
            to: C::DeletionFailed,
            from: &[C::DeletionRequested],
        },
        Transition {
            to: C::Deleted,
            from: &[C::DeletionRequested],
        },
    ]),
    work: WorkClassifier::new(
        &[
            C::RefreshMetadata,
            C::CreationRequested,
            C::CreationInProgress,
            C::ProvisioningRequested,
            C::ProvisionInProgress,
            C::UpgradeRequested,
            C::ResizeRequested,
            C::NodeGroupsCreationRequested,
            C::NodeGroupsDeletionRequested,
            C::DeletionRequested,
        ],
        &[
            (C::CreationInProgress, 2),
            (C::ProvisionInProgress, 2),
            (C::CreationRequested, 1),
            (C::DeletionRequested, -1),
        ],
    ),
};

impl LifecycleState for ClusterState {
    const KIND: ResourceKind = ResourceKind::Cluster;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_only_from_settled_states() {
        let registry = ClusterState::registry();
        assert!(registry.valid_request(C::Stable, C::ResizeRequested));
        assert!(registry.valid_request(C::ResizeFailed, C::ResizeRequested));
        assert!(registry.valid_request(C::ResizeRequested, C::ResizeRequested));
        assert!(!registry.valid_request(C::UpgradeRequested, C::ResizeRequested));
        assert!(!registry.valid_request(C::CreationInProgress, C::ResizeRequested));
    }

    #[test]
    fn supervisor_moves_are_not_requestable() {
        let registry = ClusterState::registry();
        assert!(!registry.valid_request(C::ProvisionInProgress, C::Stable));
        assert!(registry.valid_progression(C::ProvisionInProgress, C::Stable));
        assert!(!registry.valid_request(C::DeletionRequested, C::Deleted));
        assert!(registry.permits(C::DeletionRequested, C::Deleted));
    }

    #[test]
    fn deletion_blocked_while_work_in_flight() {
        let registry = ClusterState::registry();
        assert!(!registry.valid_request(C::CreationInProgress, C::DeletionRequested));
        assert!(!registry.valid_request(C::ProvisionInProgress, C::DeletionRequested));
        assert!(!registry.valid_request(C::Deleted, C::DeletionRequested));
        assert!(registry.valid_request(C::DeletionFailed, C::DeletionRequested));
    }

    #[test]
    fn in_progress_work_runs_first() {
        assert!(C::CreationInProgress.work_priority() > C::CreationRequested.work_priority());
        assert!(C::ResizeRequested.work_priority() > C::DeletionRequested.work_priority());
        assert!(!C::Stable.is_pending_work());
        assert!(!C::ResizeFailed.is_pending_work());
    }

    #[test]
    fn state_strings_are_kebab_case() {
        assert_eq!(C::NodeGroupsCreationRequested.to_string(), "nodegroups-creation-requested");
        let parsed: ClusterState = "provision-in-progress".parse().unwrap();
        assert_eq!(parsed, C::ProvisionInProgress);
        assert!("Stable".parse::<ClusterState>().is_err());
    }
}
