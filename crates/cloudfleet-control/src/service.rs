//! Control plane service implementation.
//!
//! This module provides the `ControlPlane` trait and `ControlPlaneService`
//! implementation that handles API-side requests: creating resources,
//! recording requested states, resizing clusters and placing installations.
//! Supervisors pick up the resulting pending work.

use std::sync::Arc;

use async_trait::async_trait;
use cloudfleet_core::lifecycle::StateChange;
use cloudfleet_core::{
    BackupState, ClusterState, InstallationState, LifecycleState, ResourceId, ResourceKind,
};
use cloudfleet_store::{
    Cluster, Installation, InstallationBackup, InstallationDbMigration, InstallationDbRestoration,
    Resource, ResourceFilter, Store, StoreError,
};
use tracing::{debug, info, warn};

use crate::allocator::GroupStats;
use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::rebalance;
use crate::types::{
    ControlConfig, CreateClusterRequest, CreateDbMigrationRequest, CreateDbRestorationRequest,
    CreateInstallationRequest, ResizeRequest,
};

/// How often a contended lock is re-checked before giving up.
const LOCK_ATTEMPTS: usize = 3;

/// Trait defining the control plane operations.
///
/// Every state change made here goes through the kind's request table; the
/// supervisors own every other move.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    // =========================================================================
    // Clusters
    // =========================================================================

    /// Create a new cluster in the creation-requested state.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRequest` if the request has no node groups.
    async fn create_cluster(&self, request: CreateClusterRequest) -> Result<Cluster>;

    /// Get a live or deleted cluster by id.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotFound` if the cluster doesn't exist.
    async fn get_cluster(&self, id: ResourceId) -> Result<Cluster>;

    /// Request a new cluster state.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidTransition` if the request table forbids
    /// the move, or `ControlError::ResourceLocked` while a worker holds it.
    async fn request_cluster_state(&self, id: ResourceId, state: ClusterState) -> Result<Cluster>;

    /// Plan a resize, attach it to the cluster and request resize-requested.
    ///
    /// A rejected plan leaves the cluster untouched.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Rebalance` if the new sizes are infeasible and
    /// `ControlError::InvalidRequest` if nothing would change.
    async fn resize_cluster(&self, id: ResourceId, request: ResizeRequest) -> Result<Cluster>;

    // =========================================================================
    // Installations
    // =========================================================================

    /// Create a new installation in the creation-requested state.
    async fn create_installation(&self, request: CreateInstallationRequest)
        -> Result<Installation>;

    /// Get a live or deleted installation by id.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotFound` if the installation doesn't exist.
    async fn get_installation(&self, id: ResourceId) -> Result<Installation>;

    /// Request a new installation state.
    async fn request_installation_state(
        &self,
        id: ResourceId,
        state: InstallationState,
    ) -> Result<Installation>;

    /// Choose a cluster for a creation-requested installation.
    ///
    /// The chosen cluster is reserved through its lock while the installation
    /// is assigned. With no eligible cluster the installation moves to
    /// creation-no-compatible-clusters.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidTransition` if the installation is not
    /// awaiting placement.
    async fn place_installation(&self, id: ResourceId) -> Result<Installation>;

    // =========================================================================
    // Installation operations
    // =========================================================================

    /// Request a backup of a hibernating installation.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRequest` if the installation is not
    /// hibernating or already has a backup under way.
    async fn create_backup(&self, installation_id: ResourceId) -> Result<InstallationBackup>;

    /// Request a database migration of a hibernating installation.
    async fn create_db_migration(
        &self,
        request: CreateDbMigrationRequest,
    ) -> Result<InstallationDbMigration>;

    /// Request a database restoration from a succeeded backup.
    async fn create_db_restoration(
        &self,
        request: CreateDbRestorationRequest,
    ) -> Result<InstallationDbRestoration>;

    // =========================================================================
    // Generic operations
    // =========================================================================

    /// Request a state, named as a string, for any kind of resource.
    ///
    /// Returns the name of the recorded state.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::UnknownState` for a name outside the kind's set.
    async fn request_state(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        state: &str,
    ) -> Result<&'static str>;

    /// Enable or disable API-driven changes to a resource.
    async fn set_api_security_lock(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        locked: bool,
    ) -> Result<()>;

    /// Release a lock held by this service's worker identity.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotLockOwner` if the lock is held by another
    /// worker (or not held at all).
    async fn release_lock(&self, kind: ResourceKind, id: ResourceId) -> Result<()>;

    /// Clear a lock whoever holds it, recording `reason` in the audit log.
    async fn force_unlock(&self, kind: ResourceKind, id: ResourceId, reason: &str) -> Result<()>;

    /// The request table of `kind`, state by state.
    async fn state_report(&self, kind: ResourceKind) -> Vec<StateChange<&'static str>>;
}

/// The main control plane service implementation.
pub struct ControlPlaneService<S: Store> {
    store: Arc<S>,
    config: ControlConfig,
}

impl<S: Store> ControlPlaneService<S> {
    /// Create a new control plane service.
    #[must_use]
    pub fn new(store: Arc<S>, config: ControlConfig) -> Self {
        Self { store, config }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, ControlConfig::default())
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Run `f` while holding the lock on record `id` of kind `R`.
    ///
    /// The lock is released whether or not `f` succeeds.
    fn with_lock<R, T, F>(&self, id: ResourceId, f: F) -> Result<T>
    where
        R: Resource,
        F: FnOnce() -> Result<T>,
    {
        self.acquire::<R>(id)?;
        let result = f();
        let released = self.store.unlock::<R>(id, &self.config.worker_id, false);
        let value = result?;
        released?;
        Ok(value)
    }

    fn acquire<R: Resource>(&self, id: ResourceId) -> Result<()> {
        let worker = &self.config.worker_id;
        for _ in 0..LOCK_ATTEMPTS {
            if self.store.lock::<R>(id, worker)? {
                return Ok(());
            }
            // The holder may have released it since; only report a live owner.
            if let Some(lock) = self.store.fetch::<R>(id)?.meta().lock.clone() {
                return Err(ControlError::ResourceLocked {
                    kind: R::kind(),
                    id,
                    owner: lock.acquired_by,
                });
            }
        }
        Err(ControlError::Internal(format!(
            "{} {id}: lock kept changing hands",
            R::kind()
        )))
    }

    fn fetch_live<R: Resource>(&self, id: ResourceId) -> Result<R> {
        let record = self.store.fetch::<R>(id)?;
        if record.meta().is_deleted() {
            return Err(ControlError::Deleted {
                kind: R::kind(),
                id,
            });
        }
        Ok(record)
    }

    fn hibernating_installation(&self, id: ResourceId, operation: &str) -> Result<Installation> {
        let installation = self.fetch_live::<Installation>(id)?;
        if installation.state != InstallationState::Hibernating {
            return Err(ControlError::InvalidRequest(format!(
                "installation {id} must be hibernating for a {operation}, is {}",
                installation.state
            )));
        }
        Ok(installation)
    }

    fn request_named<R: Resource>(&self, id: ResourceId, state: &str) -> Result<&'static str> {
        let requested = lifecycle::parse_state::<R::State>(state)?;
        let record = self.store.request_state::<R>(id, requested)?;
        Ok(record.state().name())
    }

    fn api_security_lock<R: Resource>(&self, id: ResourceId, locked: bool) -> Result<()> {
        self.store.set_api_security_lock::<R>(id, locked)?;
        Ok(())
    }

    /// Clusters that may take a new installation, with their current load.
    fn placement_candidates(&self) -> Result<Vec<GroupStats>> {
        let mut candidates: Vec<GroupStats> = self
            .store
            .list::<Cluster>(&ResourceFilter::in_states(&[ClusterState::Stable]))?
            .into_iter()
            .filter(|cluster| cluster.allow_installations)
            .map(|cluster| GroupStats::new(cluster.id()))
            .collect();

        for installation in self.store.list::<Installation>(&ResourceFilter::all())? {
            let Some(cluster_id) = installation.cluster_id else {
                continue;
            };
            if let Some(stats) = candidates.iter_mut().find(|stats| stats.id == cluster_id) {
                stats.record(installation.state.name());
            }
        }
        Ok(candidates)
    }

    fn place_locked(&self, id: ResourceId) -> Result<Installation> {
        let worker = &self.config.worker_id;
        let mut installation = self.fetch_live::<Installation>(id)?;
        lifecycle::validate_progression(
            id,
            installation.state,
            InstallationState::CreationPreProvisioning,
        )?;

        let mut candidates = self.placement_candidates()?;
        while !candidates.is_empty() {
            let cluster_id = self
                .config
                .installation_allocator
                .choose(&candidates)?
                .id;

            match self.store.lock::<Cluster>(cluster_id, worker) {
                Ok(true) => {
                    let assigned = self.assign_locked(&mut installation, cluster_id);
                    let released = self.store.unlock::<Cluster>(cluster_id, worker, false);
                    let assigned = assigned?;
                    released?;
                    if let Some(placed) = assigned {
                        return Ok(placed);
                    }
                }
                Ok(false) | Err(StoreError::Deleted { .. } | StoreError::NotFound { .. }) => {
                    debug!(
                        resource_id = %id,
                        cluster_id = %cluster_id,
                        "Cluster unavailable, trying next"
                    );
                }
                Err(e) => return Err(e.into()),
            }
            candidates.retain(|stats| stats.id != cluster_id);
        }

        installation.state = lifecycle::validate_progression(
            id,
            installation.state,
            InstallationState::CreationNoCompatibleClusters,
        )?;
        let updated = self.store.update(&installation, worker)?;
        warn!(resource_id = %id, "No cluster can take the installation");
        Ok(updated)
    }

    /// Assign `installation` to a cluster this worker has locked.
    ///
    /// Returns `None` if the cluster stopped accepting installations since
    /// the candidates were listed.
    fn assign_locked(
        &self,
        installation: &mut Installation,
        cluster_id: ResourceId,
    ) -> Result<Option<Installation>> {
        let cluster = self.store.fetch::<Cluster>(cluster_id)?;
        if cluster.meta.is_deleted()
            || cluster.state != ClusterState::Stable
            || !cluster.allow_installations
        {
            return Ok(None);
        }

        installation.cluster_id = Some(cluster_id);
        installation.state = lifecycle::validate_progression(
            installation.id(),
            installation.state,
            InstallationState::CreationPreProvisioning,
        )?;
        let updated = self.store.update(&*installation, &self.config.worker_id)?;
        info!(
            resource_id = %updated.id(),
            cluster_id = %cluster_id,
            allocator = %self.config.installation_allocator,
            "Installation placed"
        );
        Ok(Some(updated))
    }
}

#[async_trait]
impl<S: Store + 'static> ControlPlane for ControlPlaneService<S> {
    // =========================================================================
    // Clusters
    // =========================================================================

    async fn create_cluster(&self, request: CreateClusterRequest) -> Result<Cluster> {
        if request.node_groups.is_empty() {
            return Err(ControlError::InvalidRequest(
                "a cluster needs at least one node group".to_string(),
            ));
        }
        if let Some((name, group)) = request
            .node_groups
            .iter()
            .find(|(_, group)| group.min_count < 0 || group.min_count > group.max_count)
        {
            return Err(ControlError::InvalidRequest(format!(
                "node group {name}: invalid counts {}..{}",
                group.min_count, group.max_count
            )));
        }

        let mut cluster = Cluster::new(request.provider, request.version, request.node_groups);
        cluster.allow_installations = request.allow_installations;
        self.store.create(&cluster)?;
        Ok(cluster)
    }

    async fn get_cluster(&self, id: ResourceId) -> Result<Cluster> {
        Ok(self.store.fetch(id)?)
    }

    async fn request_cluster_state(&self, id: ResourceId, state: ClusterState) -> Result<Cluster> {
        Ok(self.store.request_state::<Cluster>(id, state)?)
    }

    async fn resize_cluster(&self, id: ResourceId, request: ResizeRequest) -> Result<Cluster> {
        let cluster = self.fetch_live::<Cluster>(id)?;
        lifecycle::validate_request(id, cluster.state, ClusterState::ResizeRequested)?;

        let plan = rebalance::plan_resize(&cluster.node_groups, &request)?;
        if plan.is_empty() {
            return Err(ControlError::InvalidRequest(format!(
                "cluster {id}: resize changes nothing"
            )));
        }

        let snapshot = cluster.node_groups;
        let updated =
            self.store
                .request_state_with::<Cluster, _>(id, ClusterState::ResizeRequested, |stored| {
                    if stored.node_groups != snapshot {
                        return Err(StoreError::Conflict {
                            kind: ResourceKind::Cluster,
                            id,
                        });
                    }
                    stored.change_request = Some(plan);
                    Ok(())
                })?;
        info!(resource_id = %id, "Cluster resize requested");
        Ok(updated)
    }

    // =========================================================================
    // Installations
    // =========================================================================

    async fn create_installation(
        &self,
        request: CreateInstallationRequest,
    ) -> Result<Installation> {
        if request.dns.trim().is_empty() {
            return Err(ControlError::InvalidRequest(
                "installation dns must not be empty".to_string(),
            ));
        }
        let mut installation = Installation::new(request.owner, request.dns, request.version);
        installation.group_id = request.group_id;
        self.store.create(&installation)?;
        Ok(installation)
    }

    async fn get_installation(&self, id: ResourceId) -> Result<Installation> {
        Ok(self.store.fetch(id)?)
    }

    async fn request_installation_state(
        &self,
        id: ResourceId,
        state: InstallationState,
    ) -> Result<Installation> {
        Ok(self.store.request_state::<Installation>(id, state)?)
    }

    async fn place_installation(&self, id: ResourceId) -> Result<Installation> {
        self.with_lock::<Installation, _, _>(id, || self.place_locked(id))
    }

    // =========================================================================
    // Installation operations
    // =========================================================================

    async fn create_backup(&self, installation_id: ResourceId) -> Result<InstallationBackup> {
        self.with_lock::<Installation, _, _>(installation_id, || {
            let installation = self.hibernating_installation(installation_id, "backup")?;

            let active = ResourceFilter::in_states(&[
                BackupState::BackupRequested,
                BackupState::BackupInProgress,
            ]);
            if self
                .store
                .list::<InstallationBackup>(&active)?
                .iter()
                .any(|backup| backup.installation_id == installation_id)
            {
                return Err(ControlError::InvalidRequest(format!(
                    "installation {installation_id} already has a backup in progress"
                )));
            }

            let mut backup = InstallationBackup::new(installation_id);
            backup.cluster_id = installation.cluster_id;
            self.store.create(&backup)?;
            Ok(backup)
        })
    }

    async fn create_db_migration(
        &self,
        request: CreateDbMigrationRequest,
    ) -> Result<InstallationDbMigration> {
        if request.source_database == request.destination_database {
            return Err(ControlError::InvalidRequest(
                "source and destination databases are the same".to_string(),
            ));
        }
        let installation_id = request.installation_id;
        self.with_lock::<Installation, _, _>(installation_id, || {
            self.hibernating_installation(installation_id, "database migration")?;

            if self
                .store
                .list::<InstallationDbMigration>(&ResourceFilter::all())?
                .iter()
                .any(|op| op.installation_id == installation_id && op.state.is_pending_work())
            {
                return Err(ControlError::InvalidRequest(format!(
                    "installation {installation_id} already has a database migration in progress"
                )));
            }

            let migration = InstallationDbMigration::new(
                installation_id,
                request.source_database,
                request.destination_database,
            );
            self.store.create(&migration)?;
            Ok(migration)
        })
    }

    async fn create_db_restoration(
        &self,
        request: CreateDbRestorationRequest,
    ) -> Result<InstallationDbRestoration> {
        let target = request
            .target_installation_state
            .unwrap_or(InstallationState::Hibernating);
        if !matches!(
            target,
            InstallationState::Hibernating | InstallationState::Stable
        ) {
            return Err(ControlError::InvalidRequest(format!(
                "restoration cannot leave the installation {target}"
            )));
        }

        let installation_id = request.installation_id;
        self.with_lock::<Installation, _, _>(installation_id, || {
            self.hibernating_installation(installation_id, "database restoration")?;

            let backup = self.fetch_live::<InstallationBackup>(request.backup_id)?;
            if backup.installation_id != installation_id {
                return Err(ControlError::InvalidRequest(format!(
                    "backup {} belongs to installation {}",
                    backup.id(),
                    backup.installation_id
                )));
            }
            if backup.state != BackupState::BackupSucceeded {
                return Err(ControlError::InvalidRequest(format!(
                    "backup {} is {}, not backup-succeeded",
                    backup.id(),
                    backup.state
                )));
            }

            let mut restoration = InstallationDbRestoration::new(installation_id, backup.id());
            restoration.target_installation_state = target;
            self.store.create(&restoration)?;
            Ok(restoration)
        })
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    async fn request_state(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        state: &str,
    ) -> Result<&'static str> {
        match kind {
            ResourceKind::Cluster => self.request_named::<Cluster>(id, state),
            ResourceKind::Installation => self.request_named::<Installation>(id, state),
            ResourceKind::InstallationBackup => self.request_named::<InstallationBackup>(id, state),
            ResourceKind::InstallationDbMigration => {
                self.request_named::<InstallationDbMigration>(id, state)
            }
            ResourceKind::InstallationDbRestoration => {
                self.request_named::<InstallationDbRestoration>(id, state)
            }
        }
    }

    async fn set_api_security_lock(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        locked: bool,
    ) -> Result<()> {
        match kind {
            ResourceKind::Cluster => self.api_security_lock::<Cluster>(id, locked),
            ResourceKind::Installation => self.api_security_lock::<Installation>(id, locked),
            ResourceKind::InstallationBackup => {
                self.api_security_lock::<InstallationBackup>(id, locked)
            }
            ResourceKind::InstallationDbMigration => {
                self.api_security_lock::<InstallationDbMigration>(id, locked)
            }
            ResourceKind::InstallationDbRestoration => {
                self.api_security_lock::<InstallationDbRestoration>(id, locked)
            }
        }
    }

    async fn release_lock(&self, kind: ResourceKind, id: ResourceId) -> Result<()> {
        let worker = &self.config.worker_id;
        if self.store.unlock_by_kind(kind, id, worker, false)? {
            Ok(())
        } else {
            Err(ControlError::NotLockOwner {
                kind,
                id,
                worker: worker.clone(),
            })
        }
    }

    async fn force_unlock(&self, kind: ResourceKind, id: ResourceId, reason: &str) -> Result<()> {
        warn!(
            kind = %kind,
            resource_id = %id,
            worker = %self.config.worker_id,
            reason,
            "Forced unlock requested"
        );
        self.store
            .unlock_by_kind(kind, id, &self.config.worker_id, true)?;
        Ok(())
    }

    async fn state_report(&self, kind: ResourceKind) -> Vec<StateChange<&'static str>> {
        kind.state_change_report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use cloudfleet_core::{DbMigrationState, WorkerId};
    use cloudfleet_store::{MemoryStore, NodeGroup, RocksStore};
    use tempfile::TempDir;

    use crate::allocator::{GroupAllocator, GroupMetric};

    const CLUSTER_TO_STABLE: &[ClusterState] = &[
        ClusterState::CreationInProgress,
        ClusterState::ProvisioningRequested,
        ClusterState::ProvisionInProgress,
        ClusterState::Stable,
    ];

    const INSTALLATION_TO_HIBERNATING: &[InstallationState] = &[
        InstallationState::CreationPreProvisioning,
        InstallationState::CreationInProgress,
        InstallationState::CreationDns,
        InstallationState::CreationFinalTasks,
        InstallationState::Stable,
        InstallationState::HibernationRequested,
        InstallationState::HibernationInProgress,
        InstallationState::Hibernating,
    ];

    fn setup() -> ControlPlaneService<MemoryStore> {
        let config = ControlConfig {
            worker_id: WorkerId::new("api-1").unwrap(),
            ..Default::default()
        };
        ControlPlaneService::new(Arc::new(MemoryStore::new()), config)
    }

    /// Walk a record through `path` as a supervisor would.
    fn advance<R: Resource>(
        service: &ControlPlaneService<MemoryStore>,
        id: ResourceId,
        path: &[R::State],
    ) {
        let worker = WorkerId::new("test-supervisor").unwrap();
        assert!(service.store().lock::<R>(id, &worker).unwrap());
        for state in path {
            let mut record = service.store().fetch::<R>(id).unwrap();
            record.set_state(*state);
            service.store().update(&record, &worker).unwrap();
        }
        assert!(service.store().unlock::<R>(id, &worker, false).unwrap());
    }

    fn node_groups(counts: &[(&str, i64)]) -> BTreeMap<String, NodeGroup> {
        counts
            .iter()
            .map(|(name, count)| ((*name).to_string(), NodeGroup::fixed("m5.large", *count)))
            .collect()
    }

    async fn stable_cluster(service: &ControlPlaneService<MemoryStore>) -> Cluster {
        let request = CreateClusterRequest::new("aws", "1.29", node_groups(&[("ng-a", 1)]));
        let cluster = service.create_cluster(request).await.unwrap();
        advance::<Cluster>(service, cluster.id(), CLUSTER_TO_STABLE);
        service.get_cluster(cluster.id()).await.unwrap()
    }

    async fn hibernating_installation(service: &ControlPlaneService<MemoryStore>) -> Installation {
        let installation = service
            .create_installation(CreateInstallationRequest::new("acme", "acme.example.com", "9.1"))
            .await
            .unwrap();
        advance::<Installation>(service, installation.id(), INSTALLATION_TO_HIBERNATING);
        service.get_installation(installation.id()).await.unwrap()
    }

    #[tokio::test]
    async fn create_cluster_success() {
        let service = setup();
        let request = CreateClusterRequest::new("aws", "1.29", node_groups(&[("ng-a", 2)]));
        let cluster = service.create_cluster(request).await.unwrap();

        assert_eq!(cluster.state, ClusterState::CreationRequested);
        let fetched = service.get_cluster(cluster.id()).await.unwrap();
        assert_eq!(fetched, cluster);
    }

    #[tokio::test]
    async fn create_cluster_rejects_bad_node_groups() {
        let service = setup();
        let empty = CreateClusterRequest::new("aws", "1.29", BTreeMap::new());
        assert!(matches!(
            service.create_cluster(empty).await,
            Err(ControlError::InvalidRequest(_))
        ));

        let mut groups = node_groups(&[("ng-a", 2)]);
        groups.insert(
            "ng-b".to_string(),
            NodeGroup {
                instance_type: "m5.large".to_string(),
                min_count: 3,
                max_count: 1,
            },
        );
        let inverted = CreateClusterRequest::new("aws", "1.29", groups);
        assert!(matches!(
            service.create_cluster(inverted).await,
            Err(ControlError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn unknown_cluster_not_found() {
        let service = setup();
        let result = service.get_cluster(ResourceId::generate()).await;
        assert!(matches!(result, Err(ControlError::NotFound { .. })));
    }

    #[tokio::test]
    async fn request_cluster_state_validates() {
        let service = setup();
        let cluster = stable_cluster(&service).await;

        let upgraded = service
            .request_cluster_state(cluster.id(), ClusterState::UpgradeRequested)
            .await
            .unwrap();
        assert_eq!(upgraded.state, ClusterState::UpgradeRequested);

        let err = service
            .request_cluster_state(cluster.id(), ClusterState::ResizeRequested)
            .await
            .unwrap_err();
        match err {
            ControlError::InvalidTransition {
                from, allowed_from, ..
            } => {
                assert_eq!(from, "upgrade-requested");
                assert_eq!(allowed_from, vec!["stable", "resize-requested", "resize-failed"]);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn locked_resource_refuses_requests() {
        let service = setup();
        let cluster = stable_cluster(&service).await;
        let supervisor = WorkerId::new("supervisor-7").unwrap();
        assert!(service.store().lock::<Cluster>(cluster.id(), &supervisor).unwrap());

        let err = service
            .request_cluster_state(cluster.id(), ClusterState::UpgradeRequested)
            .await
            .unwrap_err();
        assert!(matches!(&err, ControlError::ResourceLocked { owner, .. } if *owner == supervisor));
        assert_eq!(err.http_status_code(), 423);
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn resize_cluster_attaches_plan() {
        let service = setup();
        let cluster = stable_cluster(&service).await;

        let resized = service
            .resize_cluster(cluster.id(), ResizeRequest::fixed(11))
            .await
            .unwrap();

        assert_eq!(resized.state, ClusterState::ResizeRequested);
        let plan = resized.change_request.unwrap();
        assert_eq!(plan.changes["ng-a"].min_count, Some(11));
        assert_eq!(plan.changes["ng-a"].max_count, Some(11));
        // Node groups change only once the supervisor applies the plan.
        assert_eq!(resized.node_groups["ng-a"].max_count, 1);
    }

    #[tokio::test]
    async fn rejected_resize_leaves_cluster_untouched() {
        let service = setup();
        let cluster = stable_cluster(&service).await;

        let request = ResizeRequest {
            node_min_count: Some(5),
            node_max_count: Some(2),
            node_instance_type: None,
        };
        let err = service.resize_cluster(cluster.id(), request).await.unwrap_err();
        assert!(matches!(err, ControlError::Rebalance(_)));
        assert_eq!(err.http_status_code(), 400);

        let err = service
            .resize_cluster(cluster.id(), ResizeRequest::fixed(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidRequest(_)));

        assert_eq!(service.get_cluster(cluster.id()).await.unwrap(), cluster);
    }

    #[tokio::test]
    async fn resize_requires_resizable_state() {
        let service = setup();
        let request = CreateClusterRequest::new("aws", "1.29", node_groups(&[("ng-a", 1)]));
        let cluster = service.create_cluster(request).await.unwrap();

        let err = service
            .resize_cluster(cluster.id(), ResizeRequest::fixed(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidTransition { .. }));
        assert!(service.get_cluster(cluster.id()).await.unwrap().change_request.is_none());
    }

    #[tokio::test]
    async fn place_installation_picks_least_loaded_cluster() {
        let service = setup();
        let busy = stable_cluster(&service).await;
        let quiet = stable_cluster(&service).await;

        let first = service
            .create_installation(CreateInstallationRequest::new("a", "a.example.com", "9.1"))
            .await
            .unwrap();
        let first = service.place_installation(first.id()).await.unwrap();
        assert_eq!(first.state, InstallationState::CreationPreProvisioning);
        let first_cluster = first.cluster_id.unwrap();
        assert!(first_cluster == busy.id() || first_cluster == quiet.id());

        let second = service
            .create_installation(CreateInstallationRequest::new("b", "b.example.com", "9.1"))
            .await
            .unwrap();
        let second = service.place_installation(second.id()).await.unwrap();
        assert_ne!(second.cluster_id.unwrap(), first_cluster);

        // Both records and clusters are unlocked afterwards.
        assert!(service.store().list_locked().unwrap().is_empty());
    }

    #[tokio::test]
    async fn place_installation_skips_locked_and_closed_clusters() {
        let service = setup();
        let locked = stable_cluster(&service).await;
        let closed = stable_cluster(&service).await;
        let open = stable_cluster(&service).await;

        let supervisor = WorkerId::new("supervisor-7").unwrap();
        assert!(service.store().lock::<Cluster>(locked.id(), &supervisor).unwrap());
        let mut record = service.store().fetch::<Cluster>(closed.id()).unwrap();
        record.allow_installations = false;
        assert!(service.store().lock::<Cluster>(closed.id(), &supervisor).unwrap());
        service.store().update(&record, &supervisor).unwrap();
        service.store().unlock::<Cluster>(closed.id(), &supervisor, false).unwrap();

        let installation = service
            .create_installation(CreateInstallationRequest::new("a", "a.example.com", "9.1"))
            .await
            .unwrap();
        let placed = service.place_installation(installation.id()).await.unwrap();
        assert_eq!(placed.cluster_id, Some(open.id()));
    }

    #[tokio::test]
    async fn place_installation_without_clusters() {
        let service = setup();
        let installation = service
            .create_installation(CreateInstallationRequest::new("a", "a.example.com", "9.1"))
            .await
            .unwrap();

        let placed = service.place_installation(installation.id()).await.unwrap();
        assert_eq!(placed.state, InstallationState::CreationNoCompatibleClusters);
        assert!(placed.cluster_id.is_none());

        // Retrying requires a fresh creation request.
        let err = service.place_installation(installation.id()).await.unwrap_err();
        assert!(matches!(err, ControlError::InvalidTransition { .. }));
        let retried = service
            .request_installation_state(installation.id(), InstallationState::CreationRequested)
            .await
            .unwrap();
        assert_eq!(retried.state, InstallationState::CreationRequested);
    }

    #[tokio::test]
    async fn placement_respects_configured_metric() {
        let config = ControlConfig {
            installation_allocator: GroupAllocator::LowestCount(GroupMetric::InState(
                "creation-pre-provisioning".to_string(),
            )),
            ..Default::default()
        };
        let service = ControlPlaneService::new(Arc::new(MemoryStore::new()), config);
        let cluster = stable_cluster(&service).await;

        let installation = service
            .create_installation(CreateInstallationRequest::new("a", "a.example.com", "9.1"))
            .await
            .unwrap();
        let placed = service.place_installation(installation.id()).await.unwrap();
        assert_eq!(placed.cluster_id, Some(cluster.id()));
    }

    #[tokio::test]
    async fn backup_requires_hibernation() {
        let service = setup();
        let installation = service
            .create_installation(CreateInstallationRequest::new("a", "a.example.com", "9.1"))
            .await
            .unwrap();
        assert!(matches!(
            service.create_backup(installation.id()).await,
            Err(ControlError::InvalidRequest(_))
        ));

        let installation = hibernating_installation(&service).await;
        let backup = service.create_backup(installation.id()).await.unwrap();
        assert_eq!(backup.state, BackupState::BackupRequested);
        assert_eq!(backup.installation_id, installation.id());

        // Only one backup at a time.
        assert!(matches!(
            service.create_backup(installation.id()).await,
            Err(ControlError::InvalidRequest(_))
        ));
        assert!(service.store().list_locked().unwrap().is_empty());
    }

    #[tokio::test]
    async fn db_migration_requests() {
        let service = setup();
        let installation = hibernating_installation(&service).await;

        let same = CreateDbMigrationRequest {
            installation_id: installation.id(),
            source_database: "rds-a".to_string(),
            destination_database: "rds-a".to_string(),
        };
        assert!(matches!(
            service.create_db_migration(same).await,
            Err(ControlError::InvalidRequest(_))
        ));

        let request = CreateDbMigrationRequest {
            installation_id: installation.id(),
            source_database: "rds-a".to_string(),
            destination_database: "rds-b".to_string(),
        };
        let migration = service.create_db_migration(request.clone()).await.unwrap();
        assert_eq!(migration.state, DbMigrationState::Requested);
        assert!(matches!(
            service.create_db_migration(request).await,
            Err(ControlError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn db_restoration_requires_succeeded_backup() {
        let service = setup();
        let installation = hibernating_installation(&service).await;
        let backup = service.create_backup(installation.id()).await.unwrap();

        let request = CreateDbRestorationRequest {
            installation_id: installation.id(),
            backup_id: backup.id(),
            target_installation_state: None,
        };
        assert!(matches!(
            service.create_db_restoration(request.clone()).await,
            Err(ControlError::InvalidRequest(_))
        ));

        advance::<InstallationBackup>(
            &service,
            backup.id(),
            &[BackupState::BackupInProgress, BackupState::BackupSucceeded],
        );
        let restoration = service.create_db_restoration(request).await.unwrap();
        assert_eq!(restoration.backup_id, backup.id());
        assert_eq!(restoration.target_installation_state, InstallationState::Hibernating);

        let other = hibernating_installation(&service).await;
        let foreign = CreateDbRestorationRequest {
            installation_id: other.id(),
            backup_id: backup.id(),
            target_installation_state: Some(InstallationState::Stable),
        };
        assert!(matches!(
            service.create_db_restoration(foreign).await,
            Err(ControlError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn generic_request_state() {
        let service = setup();
        let installation = hibernating_installation(&service).await;

        let state = service
            .request_state(ResourceKind::Installation, installation.id(), "wake-up-requested")
            .await
            .unwrap();
        assert_eq!(state, "wake-up-requested");

        let err = service
            .request_state(ResourceKind::Installation, installation.id(), "awake")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::UnknownState { .. }));

        let err = service
            .request_state(ResourceKind::Cluster, installation.id(), "deletion-requested")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::NotFound { kind: ResourceKind::Cluster, .. }));
    }

    #[tokio::test]
    async fn api_security_lock_blocks_requests() {
        let service = setup();
        let cluster = stable_cluster(&service).await;

        service
            .set_api_security_lock(ResourceKind::Cluster, cluster.id(), true)
            .await
            .unwrap();
        let err = service
            .request_state(ResourceKind::Cluster, cluster.id(), "upgrade-requested")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::ApiSecurityLocked { .. }));

        service
            .set_api_security_lock(ResourceKind::Cluster, cluster.id(), false)
            .await
            .unwrap();
        service
            .request_state(ResourceKind::Cluster, cluster.id(), "upgrade-requested")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn release_and_force_unlock() {
        let service = setup();
        let cluster = stable_cluster(&service).await;
        let crashed = WorkerId::new("supervisor-crashed").unwrap();
        assert!(service.store().lock::<Cluster>(cluster.id(), &crashed).unwrap());

        let err = service
            .release_lock(ResourceKind::Cluster, cluster.id())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::NotLockOwner { .. }));

        service
            .force_unlock(ResourceKind::Cluster, cluster.id(), "worker crashed")
            .await
            .unwrap();
        assert!(service.get_cluster(cluster.id()).await.unwrap().meta.lock.is_none());

        let worker = service.config().worker_id.clone();
        assert!(service.store().lock::<Cluster>(cluster.id(), &worker).unwrap());
        service
            .release_lock(ResourceKind::Cluster, cluster.id())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn state_report_lists_requestable_states() {
        let service = setup();
        let report = service.state_report(ResourceKind::Installation).await;
        let wake = report
            .iter()
            .find(|change| change.requested == "wake-up-requested")
            .unwrap();
        assert_eq!(wake.accepted_from, vec!["hibernating", "wake-up-requested"]);
        assert!(report.iter().all(|change| change.requested != "deleted"));
    }

    #[tokio::test]
    async fn rocks_backed_service() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let service = ControlPlaneService::with_defaults(store);

        let installation = service
            .create_installation(CreateInstallationRequest::new("a", "a.example.com", "9.1"))
            .await
            .unwrap();
        let placed = service.place_installation(installation.id()).await.unwrap();
        assert_eq!(placed.state, InstallationState::CreationNoCompatibleClusters);
        assert_eq!(service.get_installation(installation.id()).await.unwrap(), placed);
    }
}
