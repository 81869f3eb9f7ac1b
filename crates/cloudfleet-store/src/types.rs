//! Resource records stored in the database.
//!
//! Every record shares a [`ResourceMeta`] header (id, timestamps, lock) and a
//! kind-specific state plus payload. Records are manipulated generically
//! through the [`Resource`] trait.

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use cloudfleet_core::{
    BackupState, ClusterState, DbMigrationState, DbRestorationState, InstallationState,
    LifecycleState, ResourceId, ResourceKind,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::lock::ResourceLock;

/// Current time at the millisecond precision records are stored with.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Header shared by every resource record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// Unique identifier, immutable.
    pub id: ResourceId,
    /// Creation timestamp.
    pub create_at: DateTime<Utc>,
    /// Soft-deletion timestamp. Once set it never changes.
    #[serde(default)]
    pub delete_at: Option<DateTime<Utc>>,
    /// The current lock, if any worker holds one.
    #[serde(default)]
    pub lock: Option<ResourceLock>,
    /// When set, API requests may not change the resource.
    #[serde(default)]
    pub api_security_lock: bool,
}

impl ResourceMeta {
    /// A fresh, unlocked, live header with a generated id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(ResourceId::generate())
    }

    /// A fresh header with the given id.
    #[must_use]
    pub fn with_id(id: ResourceId) -> Self {
        Self {
            id,
            create_at: now(),
            delete_at: None,
            lock: None,
            api_security_lock: false,
        }
    }

    /// Whether the record has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.delete_at.is_some()
    }
}

impl Default for ResourceMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// A persisted resource of one kind.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The kind's lifecycle state type.
    type State: LifecycleState;

    /// The shared header.
    fn meta(&self) -> &ResourceMeta;

    /// Mutable access to the shared header.
    fn meta_mut(&mut self) -> &mut ResourceMeta;

    /// The current lifecycle state.
    fn state(&self) -> Self::State;

    /// Overwrite the lifecycle state. Stores validate the change on write.
    fn set_state(&mut self, state: Self::State);

    /// The resource kind.
    #[must_use]
    fn kind() -> ResourceKind {
        <Self::State as LifecycleState>::KIND
    }

    /// The resource id.
    fn id(&self) -> ResourceId {
        self.meta().id
    }
}

macro_rules! impl_resource {
    ($record:ty, $state:ty) => {
        impl Resource for $record {
            type State = $state;

            fn meta(&self) -> &ResourceMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut ResourceMeta {
                &mut self.meta
            }

            fn state(&self) -> $state {
                self.state
            }

            fn set_state(&mut self, state: $state) {
                self.state = state;
            }
        }
    };
}

// =========================================================================
// Cluster
// =========================================================================

/// A named node group within a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    /// Cloud instance type of the group's nodes.
    pub instance_type: String,
    /// Minimum node count.
    pub min_count: i64,
    /// Maximum node count.
    pub max_count: i64,
}

impl NodeGroup {
    /// A node group with equal min and max counts.
    #[must_use]
    pub fn fixed(instance_type: impl Into<String>, count: i64) -> Self {
        Self {
            instance_type: instance_type.into(),
            min_count: count,
            max_count: count,
        }
    }
}

/// The planned new shape of one node group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroupChange {
    /// New instance type, if it changes.
    #[serde(default)]
    pub instance_type: Option<String>,
    /// New minimum count, if it changes.
    #[serde(default)]
    pub min_count: Option<i64>,
    /// New maximum count, if it changes.
    #[serde(default)]
    pub max_count: Option<i64>,
}

impl NodeGroupChange {
    /// Whether the change touches nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.instance_type.is_none() && self.min_count.is_none() && self.max_count.is_none()
    }
}

/// A pending, not yet applied, resize of a cluster's node groups.
///
/// Only node groups that actually change are listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroupsChangeRequest {
    /// Changes keyed by node group name.
    pub changes: BTreeMap<String, NodeGroupChange>,
}

impl NodeGroupsChangeRequest {
    /// Whether no node group changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Write the planned values into `node_groups`. Names without a
    /// matching node group are ignored.
    pub fn apply(&self, node_groups: &mut BTreeMap<String, NodeGroup>) {
        for (name, change) in &self.changes {
            let Some(group) = node_groups.get_mut(name) else {
                continue;
            };
            if let Some(instance_type) = &change.instance_type {
                group.instance_type.clone_from(instance_type);
            }
            if let Some(min_count) = change.min_count {
                group.min_count = min_count;
            }
            if let Some(max_count) = change.max_count {
                group.max_count = max_count;
            }
        }
    }
}

/// A Kubernetes cluster record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Shared header.
    pub meta: ResourceMeta,
    /// Current lifecycle state.
    pub state: ClusterState,
    /// Cloud provider name.
    pub provider: String,
    /// Kubernetes version.
    pub version: String,
    /// Whether new installations may be placed on the cluster.
    pub allow_installations: bool,
    /// Node groups keyed by name.
    pub node_groups: BTreeMap<String, NodeGroup>,
    /// A resize awaiting the supervisor.
    #[serde(default)]
    pub change_request: Option<NodeGroupsChangeRequest>,
}

impl Cluster {
    /// A new cluster in the creation-requested state.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        version: impl Into<String>,
        node_groups: BTreeMap<String, NodeGroup>,
    ) -> Self {
        Self {
            meta: ResourceMeta::new(),
            state: ClusterState::INITIAL,
            provider: provider.into(),
            version: version.into(),
            allow_installations: true,
            node_groups,
            change_request: None,
        }
    }

    /// Apply the pending change request to the node groups and clear it.
    ///
    /// Returns false if there was no change request.
    pub fn apply_change_request(&mut self) -> bool {
        let Some(request) = self.change_request.take() else {
            return false;
        };
        request.apply(&mut self.node_groups);
        true
    }
}

impl_resource!(Cluster, ClusterState);

// =========================================================================
// Installation
// =========================================================================

/// An application installation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    /// Shared header.
    pub meta: ResourceMeta,
    /// Current lifecycle state.
    pub state: InstallationState,
    /// Owner (tenant) identifier.
    pub owner: String,
    /// Public DNS name.
    pub dns: String,
    /// Application version.
    pub version: String,
    /// The cluster hosting the installation, once placed.
    #[serde(default)]
    pub cluster_id: Option<ResourceId>,
    /// Optional configuration group.
    #[serde(default)]
    pub group_id: Option<String>,
}

impl Installation {
    /// A new, unplaced installation in the creation-requested state.
    #[must_use]
    pub fn new(
        owner: impl Into<String>,
        dns: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            meta: ResourceMeta::new(),
            state: InstallationState::INITIAL,
            owner: owner.into(),
            dns: dns.into(),
            version: version.into(),
            cluster_id: None,
            group_id: None,
        }
    }
}

impl_resource!(Installation, InstallationState);

// =========================================================================
// Installation operations
// =========================================================================

/// Where a backup's data lives in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataResidence {
    /// Storage region.
    pub region: String,
    /// Storage endpoint URL.
    pub url: String,
    /// Bucket name.
    pub bucket: String,
    /// Key prefix inside the bucket.
    pub path_prefix: String,
    /// Object key of the backup archive.
    pub object_key: String,
}

/// A backup of an installation's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationBackup {
    /// Shared header.
    pub meta: ResourceMeta,
    /// Current lifecycle state.
    pub state: BackupState,
    /// The installation being backed up.
    pub installation_id: ResourceId,
    /// The cluster running the backup job.
    #[serde(default)]
    pub cluster_id: Option<ResourceId>,
    /// Location of the backup data, once written.
    #[serde(default)]
    pub data_residence: Option<DataResidence>,
    /// When the backup job started.
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    /// Why the last attempt failed.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl InstallationBackup {
    /// A new backup request for `installation_id`.
    #[must_use]
    pub fn new(installation_id: ResourceId) -> Self {
        Self {
            meta: ResourceMeta::new(),
            state: BackupState::INITIAL,
            installation_id,
            cluster_id: None,
            data_residence: None,
            start_at: None,
            failure_reason: None,
        }
    }
}

impl_resource!(InstallationBackup, BackupState);

/// A database migration of an installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationDbMigration {
    /// Shared header.
    pub meta: ResourceMeta,
    /// Current lifecycle state.
    pub state: DbMigrationState,
    /// The installation being migrated.
    pub installation_id: ResourceId,
    /// Database the installation currently uses.
    pub source_database: String,
    /// Database the installation moves to.
    pub destination_database: String,
    /// Backup taken of the source database.
    #[serde(default)]
    pub backup_id: Option<ResourceId>,
    /// Restoration into the destination database.
    #[serde(default)]
    pub restoration_id: Option<ResourceId>,
    /// When the migration settled.
    #[serde(default)]
    pub complete_at: Option<DateTime<Utc>>,
}

impl InstallationDbMigration {
    /// A new migration request.
    #[must_use]
    pub fn new(
        installation_id: ResourceId,
        source_database: impl Into<String>,
        destination_database: impl Into<String>,
    ) -> Self {
        Self {
            meta: ResourceMeta::new(),
            state: DbMigrationState::INITIAL,
            installation_id,
            source_database: source_database.into(),
            destination_database: destination_database.into(),
            backup_id: None,
            restoration_id: None,
            complete_at: None,
        }
    }
}

impl_resource!(InstallationDbMigration, DbMigrationState);

/// A database restoration of an installation from a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationDbRestoration {
    /// Shared header.
    pub meta: ResourceMeta,
    /// Current lifecycle state.
    pub state: DbRestorationState,
    /// The installation being restored.
    pub installation_id: ResourceId,
    /// The backup to restore from.
    pub backup_id: ResourceId,
    /// State to return the installation to afterwards.
    pub target_installation_state: InstallationState,
    /// When the restoration settled.
    #[serde(default)]
    pub complete_at: Option<DateTime<Utc>>,
}

impl InstallationDbRestoration {
    /// A new restoration request returning the installation to hibernation.
    #[must_use]
    pub fn new(installation_id: ResourceId, backup_id: ResourceId) -> Self {
        Self {
            meta: ResourceMeta::new(),
            state: DbRestorationState::INITIAL,
            installation_id,
            backup_id,
            target_installation_state: InstallationState::Hibernating,
            complete_at: None,
        }
    }
}

impl_resource!(InstallationDbRestoration, DbRestorationState);

/// Which records a listing returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFilter<S> {
    /// Only records in one of these states; empty means any state.
    pub states: Vec<S>,
    /// Whether soft-deleted records are included.
    pub include_deleted: bool,
}

impl<S: LifecycleState> ResourceFilter<S> {
    /// Every live record.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            states: Vec::new(),
            include_deleted: false,
        }
    }

    /// Live records in one of `states`.
    #[must_use]
    pub fn in_states(states: &[S]) -> Self {
        Self {
            states: states.to_vec(),
            include_deleted: false,
        }
    }

    /// Also return soft-deleted records.
    #[must_use]
    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Whether `state` and deletion status pass the filter.
    #[must_use]
    pub fn matches(&self, state: S, deleted: bool) -> bool {
        (self.include_deleted || !deleted)
            && (self.states.is_empty() || self.states.contains(&state))
    }
}

impl<S: LifecycleState> Default for ResourceFilter<S> {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups() -> BTreeMap<String, NodeGroup> {
        BTreeMap::from([
            ("ng-a".to_string(), NodeGroup::fixed("m5.large", 2)),
            ("ng-b".to_string(), NodeGroup::fixed("m5.large", 1)),
        ])
    }

    #[test]
    fn new_records_start_in_initial_state() {
        let cluster = Cluster::new("aws", "1.31", groups());
        assert_eq!(cluster.state, ClusterState::CreationRequested);
        assert!(cluster.meta.lock.is_none());
        assert!(!cluster.meta.is_deleted());
        assert_eq!(Cluster::kind(), ResourceKind::Cluster);

        let installation = Installation::new("owner", "a.example.com", "9.0");
        assert_eq!(installation.state(), InstallationState::CreationRequested);
        assert_eq!(InstallationBackup::kind(), ResourceKind::InstallationBackup);
    }

    #[test]
    fn change_request_applies_only_listed_fields() {
        let mut node_groups = groups();
        let request = NodeGroupsChangeRequest {
            changes: BTreeMap::from([
                (
                    "ng-b".to_string(),
                    NodeGroupChange {
                        min_count: Some(4),
                        ..Default::default()
                    },
                ),
                (
                    "ng-missing".to_string(),
                    NodeGroupChange {
                        max_count: Some(9),
                        ..Default::default()
                    },
                ),
            ]),
        };
        request.apply(&mut node_groups);

        assert_eq!(node_groups["ng-a"], NodeGroup::fixed("m5.large", 2));
        assert_eq!(node_groups["ng-b"].min_count, 4);
        assert_eq!(node_groups["ng-b"].max_count, 1);
        assert_eq!(node_groups.len(), 2);
    }

    #[test]
    fn cluster_applies_and_clears_change_request() {
        let mut cluster = Cluster::new("aws", "1.31", groups());
        assert!(!cluster.apply_change_request());

        cluster.change_request = Some(NodeGroupsChangeRequest {
            changes: BTreeMap::from([(
                "ng-a".to_string(),
                NodeGroupChange {
                    instance_type: Some("m5.xlarge".to_string()),
                    min_count: Some(3),
                    max_count: Some(5),
                },
            )]),
        });
        assert!(cluster.apply_change_request());
        assert!(cluster.change_request.is_none());
        assert_eq!(cluster.node_groups["ng-a"].instance_type, "m5.xlarge");
        assert_eq!(cluster.node_groups["ng-a"].min_count, 3);
        assert_eq!(cluster.node_groups["ng-a"].max_count, 5);
        assert_eq!(cluster.node_groups["ng-b"], NodeGroup::fixed("m5.large", 1));
        assert!(!cluster.apply_change_request());
    }

    #[test]
    fn filter_matching() {
        let filter = ResourceFilter::in_states(&[ClusterState::Stable]);
        assert!(filter.matches(ClusterState::Stable, false));
        assert!(!filter.matches(ClusterState::Stable, true));
        assert!(!filter.matches(ClusterState::ResizeRequested, false));
        assert!(ResourceFilter::<ClusterState>::all()
            .including_deleted()
            .matches(ClusterState::Deleted, true));
    }

    #[test]
    fn timestamps_have_millisecond_precision() {
        let ts = now();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
