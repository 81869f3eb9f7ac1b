//! In-memory storage for tests.
//!
//! Records are kept CBOR encoded, exactly as `RocksStore` persists them, in
//! one map guarded by a single mutex.

use std::collections::BTreeMap;

use cloudfleet_core::{ResourceId, ResourceKind};
use parking_lot::Mutex;

use crate::codec;
use crate::error::{Result, StoreError};
use crate::types::{Resource, ResourceFilter};
use crate::{check_write, Mutation, Store};

/// In-memory implementation of [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<(ResourceKind, ResourceId), Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of every kind, deleted ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl Store for MemoryStore {
    fn insert<R: Resource>(&self, record: &R) -> Result<()> {
        let key = (R::kind(), record.id());
        let value = codec::encode(record)?;
        let mut rows = self.rows.lock();
        if rows.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: key.0,
                id: key.1,
            });
        }
        rows.insert(key, value);
        Ok(())
    }

    fn get<R: Resource>(&self, id: ResourceId) -> Result<Option<R>> {
        self.rows
            .lock()
            .get(&(R::kind(), id))
            .map(|data| codec::decode(data))
            .transpose()
    }

    fn list<R: Resource>(&self, filter: &ResourceFilter<R::State>) -> Result<Vec<R>> {
        let kind = R::kind();
        let rows = self.rows.lock();
        let mut records = Vec::new();
        for ((row_kind, _), data) in rows.iter() {
            if *row_kind != kind {
                continue;
            }
            let record: R = codec::decode(data)?;
            if filter.matches(record.state(), record.meta().is_deleted()) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn modify<R, T, F>(&self, id: ResourceId, f: F) -> Result<T>
    where
        R: Resource,
        F: FnOnce(&mut R) -> Result<Mutation<T>>,
    {
        let kind = R::kind();
        let mut rows = self.rows.lock();
        let data = rows
            .get(&(kind, id))
            .ok_or(StoreError::NotFound { kind, id })?;
        let before: R = codec::decode(data)?;

        let mut record = before.clone();
        match f(&mut record)? {
            Mutation::Keep(value) => Ok(value),
            Mutation::Write(value) => {
                check_write(&before, &record)?;
                rows.insert((kind, id), codec::encode(&record)?);
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    use super::*;
    use crate::types::{Cluster, Installation, InstallationBackup, NodeGroup};
    use cloudfleet_core::{BackupState, ClusterState, InstallationState, WorkerId};

    fn worker(name: &str) -> WorkerId {
        WorkerId::new(name).unwrap()
    }

    fn stored_installation(store: &MemoryStore) -> Installation {
        let installation = Installation::new("owner", "a.example.com", "9.0");
        store.create(&installation).unwrap();
        installation
    }

    #[test]
    fn lock_is_exclusive() {
        let store = MemoryStore::new();
        let id = stored_installation(&store).id();

        assert!(store.lock::<Installation>(id, &worker("w1")).unwrap());
        assert!(!store.lock::<Installation>(id, &worker("w2")).unwrap());

        let stored: Installation = store.fetch(id).unwrap();
        assert_eq!(stored.meta.lock.unwrap().acquired_by, worker("w1"));
    }

    #[test]
    fn relock_by_owner_refreshes() {
        let store = MemoryStore::new();
        let id = stored_installation(&store).id();
        let w1 = worker("w1");

        assert!(store.lock::<Installation>(id, &w1).unwrap());
        let first = store.fetch::<Installation>(id).unwrap().meta.lock.unwrap();
        assert!(store.lock::<Installation>(id, &w1).unwrap());
        let second = store.fetch::<Installation>(id).unwrap().meta.lock.unwrap();
        assert_eq!(first.acquired_by, second.acquired_by);
        assert!(second.acquired_at >= first.acquired_at);
    }

    #[test]
    fn lock_missing_resource_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .lock::<Installation>(ResourceId::generate(), &worker("w1"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: ResourceKind::Installation, .. }));
    }

    #[test]
    fn unlock_requires_owner_unless_forced() {
        let store = MemoryStore::new();
        let id = stored_installation(&store).id();
        let (w1, w2) = (worker("w1"), worker("w2"));

        assert!(store.lock::<Installation>(id, &w1).unwrap());
        assert!(!store.unlock::<Installation>(id, &w2, false).unwrap());
        assert!(store.fetch::<Installation>(id).unwrap().meta.lock.is_some());

        assert!(store.unlock::<Installation>(id, &w1, false).unwrap());
        assert!(store.fetch::<Installation>(id).unwrap().meta.lock.is_none());

        // Nothing left to release.
        assert!(!store.unlock::<Installation>(id, &w1, false).unwrap());
        assert!(store.unlock::<Installation>(id, &w1, true).unwrap());
    }

    #[test]
    fn concurrent_lock_has_a_single_winner() {
        const WORKERS: usize = 16;
        let store = MemoryStore::new();
        let id = stored_installation(&store).id();
        let barrier = Barrier::new(WORKERS);
        let winners = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for n in 0..WORKERS {
                let (store, barrier, winners) = (&store, &barrier, &winners);
                scope.spawn(move || {
                    let me = worker(&format!("w{n}"));
                    barrier.wait();
                    if store.lock::<Installation>(id, &me).unwrap() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forced_release_recovers_from_crashed_worker() {
        let store = MemoryStore::new();
        let id = stored_installation(&store).id();

        // The owner locks and never comes back.
        assert!(store.lock::<Installation>(id, &worker("crashed")).unwrap());

        assert!(store.unlock::<Installation>(id, &worker("operator"), true).unwrap());
        assert!(store.lock::<Installation>(id, &worker("w2")).unwrap());
    }

    #[test]
    fn bulk_lock_reports_each_resource() {
        let store = MemoryStore::new();
        let free = stored_installation(&store).id();
        let taken = stored_installation(&store).id();
        let missing = ResourceId::generate();
        assert!(store.lock::<Installation>(taken, &worker("other")).unwrap());

        let outcome = store
            .lock_many::<Installation>(&[free, taken, missing], &worker("w1"))
            .unwrap();
        assert_eq!(outcome.succeeded, vec![free]);
        assert_eq!(outcome.contended, vec![taken]);
        assert_eq!(outcome.missing, vec![missing]);
        assert!(!outcome.all_succeeded());

        let released = store
            .unlock_many::<Installation>(&[free, taken], &worker("w1"), false)
            .unwrap();
        assert_eq!(released.succeeded, vec![free]);
        assert_eq!(released.contended, vec![taken]);
    }

    #[test]
    fn update_requires_lock() {
        let store = MemoryStore::new();
        let mut installation = stored_installation(&store);
        installation.version = "9.1".to_string();

        let err = store.update(&installation, &worker("w1")).unwrap_err();
        assert!(matches!(err, StoreError::LockNotHeld { .. }));

        assert!(store.lock::<Installation>(installation.id(), &worker("w2")).unwrap());
        let err = store.update(&installation, &worker("w1")).unwrap_err();
        assert!(matches!(err, StoreError::LockNotHeld { .. }));
    }

    #[test]
    fn update_cannot_forge_lock() {
        let store = MemoryStore::new();
        let w1 = worker("w1");
        let mut installation = stored_installation(&store);
        assert!(store.lock::<Installation>(installation.id(), &w1).unwrap());

        installation.meta.lock = None;
        installation.meta.api_security_lock = true;
        installation.state = InstallationState::CreationPreProvisioning;
        let updated = store.update(&installation, &w1).unwrap();

        assert_eq!(updated.state, InstallationState::CreationPreProvisioning);
        assert!(updated.meta.lock.unwrap().is_held_by(&w1));
        assert!(!updated.meta.api_security_lock);
    }

    #[test]
    fn request_state_refuses_locked_resources() {
        let store = MemoryStore::new();
        let cluster = Cluster::new(
            "aws",
            "1.31",
            [("ng".to_string(), NodeGroup::fixed("m5.large", 1))].into(),
        );
        store.create(&cluster).unwrap();
        let id = cluster.id();

        assert!(store.lock::<Cluster>(id, &worker("w1")).unwrap());
        let err = store
            .request_state::<Cluster>(id, ClusterState::DeletionRequested)
            .unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));

        store.unlock::<Cluster>(id, &worker("w1"), false).unwrap();
        let err = store
            .request_state::<Cluster>(id, ClusterState::ResizeRequested)
            .unwrap_err();
        match err {
            StoreError::IllegalTransition {
                to, allowed_from, ..
            } => {
                assert_eq!(to, "resize-requested");
                assert_eq!(allowed_from, vec!["stable", "resize-requested", "resize-failed"]);
            }
            other => panic!("expected IllegalTransition, got {other:?}"),
        }

        store.set_api_security_lock::<Cluster>(id, true).unwrap();
        let err = store
            .request_state::<Cluster>(id, ClusterState::CreationRequested)
            .unwrap_err();
        assert!(matches!(err, StoreError::ApiSecurityLocked { .. }));

        store.set_api_security_lock::<Cluster>(id, false).unwrap();
        let cluster = store
            .request_state::<Cluster>(id, ClusterState::CreationRequested)
            .unwrap();
        assert_eq!(cluster.state, ClusterState::CreationRequested);
    }

    #[test]
    fn request_state_applies_payload_atomically() {
        let store = MemoryStore::new();
        let backup = InstallationBackup::new(ResourceId::generate());
        store.create(&backup).unwrap();

        let err = store
            .request_state_with::<InstallationBackup, _>(
                backup.id(),
                BackupState::DeletionRequested,
                |record| {
                    record.failure_reason = Some("partial".to_string());
                    Err(StoreError::InvalidRecord("refused".to_string()))
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        let stored: InstallationBackup = store.fetch(backup.id()).unwrap();
        assert!(stored.failure_reason.is_none());
        assert_eq!(stored.state, BackupState::BackupRequested);
    }

    #[test]
    fn soft_delete_lifecycle() {
        let store = MemoryStore::new();
        let w1 = worker("w1");
        let backup = InstallationBackup::new(ResourceId::generate());
        store.create(&backup).unwrap();
        let id = backup.id();

        store
            .request_state::<InstallationBackup>(id, BackupState::DeletionRequested)
            .unwrap();
        assert!(store.lock::<InstallationBackup>(id, &w1).unwrap());

        let err = store.soft_delete::<InstallationBackup>(id, &w1).unwrap_err();
        assert!(matches!(err, StoreError::NotInDeletedState { .. }));

        let mut record: InstallationBackup = store.fetch(id).unwrap();
        record.state = BackupState::Deleted;
        store.update(&record, &w1).unwrap();
        let deleted = store.soft_delete::<InstallationBackup>(id, &w1).unwrap();
        assert!(deleted.meta.is_deleted());

        // Deleted records are immutable but can still be unlocked.
        let err = store.update(&deleted, &w1).unwrap_err();
        assert!(matches!(err, StoreError::Deleted { .. }));
        assert!(store.unlock::<InstallationBackup>(id, &w1, false).unwrap());
        let err = store.lock::<InstallationBackup>(id, &w1).unwrap_err();
        assert!(matches!(err, StoreError::Deleted { .. }));

        assert!(store
            .list::<InstallationBackup>(&ResourceFilter::all())
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .list::<InstallationBackup>(&ResourceFilter::all().including_deleted())
                .unwrap()
                .len(),
            1
        );
        assert!(store.list_pending::<InstallationBackup>().unwrap().is_empty());
    }

    #[test]
    fn complete_deletion_is_one_write() {
        let store = MemoryStore::new();
        let w1 = worker("w1");
        let backup = InstallationBackup::new(ResourceId::generate());
        store.create(&backup).unwrap();
        let id = backup.id();
        store
            .request_state::<InstallationBackup>(id, BackupState::DeletionRequested)
            .unwrap();

        let mut record: InstallationBackup = store.fetch(id).unwrap();
        record.state = BackupState::Deleted;
        let err = store.complete_deletion(&record, &w1).unwrap_err();
        assert!(matches!(err, StoreError::LockNotHeld { .. }));

        assert!(store.lock::<InstallationBackup>(id, &w1).unwrap());
        let mut stuck = record.clone();
        stuck.state = BackupState::DeletionFailed;
        let err = store.complete_deletion(&stuck, &w1).unwrap_err();
        assert!(matches!(err, StoreError::NotInDeletedState { .. }));
        let stored: InstallationBackup = store.fetch(id).unwrap();
        assert_eq!(stored.state, BackupState::DeletionRequested);
        assert!(!stored.meta.is_deleted());

        let deleted = store.complete_deletion(&record, &w1).unwrap();
        assert_eq!(deleted.state, BackupState::Deleted);
        assert!(deleted.meta.is_deleted());
        assert!(deleted.meta.lock.is_some());
        let err = store.complete_deletion(&record, &w1).unwrap_err();
        assert!(matches!(err, StoreError::Deleted { .. }));
    }

    #[test]
    fn deletion_time_requires_deleted_state() {
        let store = MemoryStore::new();
        let installation = stored_installation(&store);
        let err = store
            .modify::<Installation, _, _>(installation.id(), |stored| {
                stored.meta_mut().delete_at = Some(crate::types::now());
                Ok(Mutation::Write(()))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::NotInDeletedState { .. }));
        assert!(!store
            .fetch::<Installation>(installation.id())
            .unwrap()
            .meta
            .is_deleted());
    }

    #[test]
    fn list_locked_spans_kinds() {
        let store = MemoryStore::new();
        let installation = stored_installation(&store);
        let backup = InstallationBackup::new(installation.id());
        store.create(&backup).unwrap();
        stored_installation(&store);

        store.lock::<Installation>(installation.id(), &worker("w1")).unwrap();
        store.lock::<InstallationBackup>(backup.id(), &worker("w2")).unwrap();

        let mut locked = store.list_locked().unwrap();
        locked.sort_by_key(|l| l.kind);
        assert_eq!(locked.len(), 2);
        assert_eq!(locked[0].kind, ResourceKind::Installation);
        assert_eq!(locked[1].kind, ResourceKind::InstallationBackup);
        assert_eq!(locked[1].lock.acquired_by, worker("w2"));

        assert!(store
            .unlock_by_kind(ResourceKind::InstallationBackup, backup.id(), &worker("reaper"), true)
            .unwrap());
        assert_eq!(store.list_locked().unwrap().len(), 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn release_if_unchanged_ignores_refreshed_locks() {
        let store = MemoryStore::new();
        let id = stored_installation(&store).id();
        let w1 = worker("w1");
        assert!(store.lock::<Installation>(id, &w1).unwrap());
        let observed = store.fetch::<Installation>(id).unwrap().meta.lock.unwrap();

        let mut stale = observed.clone();
        stale.acquired_at -= chrono::Duration::seconds(1);
        assert!(!store
            .release_if_unchanged(ResourceKind::Installation, id, &stale)
            .unwrap());
        assert!(store
            .release_if_unchanged(ResourceKind::Installation, id, &observed)
            .unwrap());
        assert!(store.fetch::<Installation>(id).unwrap().meta.lock.is_none());
    }
}
