//! Resource records and storage for cloudfleet.
//!
//! This crate persists clusters, installations and installation operations
//! (backups, database migrations, database restorations). Each record carries
//! its lifecycle state and an optional single-owner lock. All writes go
//! through one atomic read-modify-write primitive, [`Store::modify`], which
//! also enforces the kind's state machine; the lock protocol and guarded
//! state changes are built on top of it.
//!
//! # Architecture
//!
//! [`RocksStore`] uses one column family per kind keyed by resource id, plus a
//! state index per kind (see [`schema`]). Values are CBOR encoded. An
//! in-memory `MemoryStore` is available for tests behind the `test-utils`
//! feature.
//!
//! # Example
//!
//! ```no_run
//! use cloudfleet_core::WorkerId;
//! use cloudfleet_store::{Installation, RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/cloudfleet-db").unwrap();
//! let installation = Installation::new("owner", "a.example.com", "9.0");
//! store.create(&installation).unwrap();
//!
//! let worker = WorkerId::new("supervisor-1").unwrap();
//! if store.lock::<Installation>(installation.id(), &worker).unwrap() {
//!     // ... do the work, then record the new state ...
//!     store.unlock::<Installation>(installation.id(), &worker, false).unwrap();
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod codec;
pub mod error;
pub mod keys;
pub mod lock;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use lock::{BulkLockOutcome, LockedResource, ResourceLock};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
pub use rocks::RocksStore;
pub use types::{
    Cluster, DataResidence, Installation, InstallationBackup, InstallationDbMigration,
    InstallationDbRestoration, NodeGroup, NodeGroupChange, NodeGroupsChangeRequest, Resource,
    ResourceFilter, ResourceMeta,
};

use cloudfleet_core::{LifecycleState, ResourceId, ResourceKind, WorkerId};
use tracing::{debug, info, warn};

/// What a [`Store::modify`] closure decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<T> {
    /// Persist the modified record and return the value.
    Write(T),
    /// Discard any modification and return the value.
    Keep(T),
}

/// The storage trait defining all database operations.
///
/// Implementations provide the four primitives; everything else is expressed
/// through them. `modify` must be atomic with respect to every other write
/// on the same store.
pub trait Store: Send + Sync {
    // =========================================================================
    // Primitives
    // =========================================================================

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if a record with the same id exists.
    fn insert<R: Resource>(&self, record: &R) -> Result<()>;

    /// Get a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get<R: Resource>(&self, id: ResourceId) -> Result<Option<R>>;

    /// List records passing `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list<R: Resource>(&self, filter: &ResourceFilter<R::State>) -> Result<Vec<R>>;

    /// Atomically read, modify and conditionally write one record.
    ///
    /// The closure sees the stored record. If it returns [`Mutation::Write`]
    /// the modified record is persisted, provided its id is unchanged, a
    /// deletion timestamp is not cleared, and any state change is permitted
    /// by the kind's registry.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if there is no such record, the
    /// closure's error, or `StoreError::IllegalTransition` /
    /// `StoreError::InvalidRecord` if the write violates the rules above.
    fn modify<R, T, F>(&self, id: ResourceId, f: F) -> Result<T>
    where
        R: Resource,
        F: FnOnce(&mut R) -> Result<Mutation<T>>;

    // =========================================================================
    // Records
    // =========================================================================

    /// Insert a new record in its kind's initial state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidRecord` if the record is not in the initial
    /// state, is locked or is deleted, and `StoreError::AlreadyExists` on a
    /// duplicate id.
    fn create<R: Resource>(&self, record: &R) -> Result<()> {
        let meta = record.meta();
        if record.state() != R::State::INITIAL {
            return Err(StoreError::InvalidRecord(format!(
                "new {} must start in {}, not {}",
                R::kind(),
                R::State::INITIAL,
                record.state()
            )));
        }
        if meta.lock.is_some() || meta.is_deleted() {
            return Err(StoreError::InvalidRecord(format!(
                "new {} must be unlocked and live",
                R::kind()
            )));
        }
        self.insert(record)?;
        info!(
            kind = %R::kind(),
            resource_id = %record.id(),
            state = %record.state(),
            "Resource created"
        );
        Ok(())
    }

    /// Get a record by id, failing if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if there is no such record.
    fn fetch<R: Resource>(&self, id: ResourceId) -> Result<R> {
        self.get(id)?.ok_or(StoreError::NotFound {
            kind: R::kind(),
            id,
        })
    }

    /// Live records in a pending work state, most urgent first.
    ///
    /// Ordered by priority descending, then oldest first, then by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_pending<R: Resource>(&self) -> Result<Vec<R>> {
        let work = &R::State::registry().work;
        let mut records = self.list::<R>(&ResourceFilter::in_states(work.pending()))?;
        records.sort_by(|a, b| {
            work.compare(a.state(), b.state())
                .then_with(|| a.meta().create_at.cmp(&b.meta().create_at))
                .then_with(|| a.id().cmp(&b.id()))
        });
        Ok(records)
    }

    // =========================================================================
    // Locking
    // =========================================================================

    /// Try to acquire the lock on a record for `worker`.
    ///
    /// Returns `false` if another worker holds it. Re-acquiring a lock the
    /// worker already holds succeeds and refreshes its timestamp.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` or `StoreError::Deleted` if the record
    /// cannot be locked at all.
    fn lock<R: Resource>(&self, id: ResourceId, worker: &WorkerId) -> Result<bool> {
        let now = types::now();
        let acquired = self.modify::<R, _, _>(id, |record| {
            if record.meta().is_deleted() {
                return Err(StoreError::Deleted {
                    kind: R::kind(),
                    id,
                });
            }
            match &record.meta().lock {
                Some(lock) if !lock.is_held_by(worker) => Ok(Mutation::Keep(false)),
                _ => {
                    record.meta_mut().lock = Some(ResourceLock::new(worker.clone(), now));
                    Ok(Mutation::Write(true))
                }
            }
        })?;
        if acquired {
            debug!(kind = %R::kind(), resource_id = %id, worker = %worker, "Lock acquired");
        } else {
            debug!(kind = %R::kind(), resource_id = %id, worker = %worker, "Lock contended");
        }
        Ok(acquired)
    }

    /// Release the lock on a record.
    ///
    /// Without `force` only the holder may release, and `false` is returned
    /// otherwise. With `force` the lock is cleared whoever holds it and the
    /// call always returns `true`; the release is logged as an audit record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if there is no such record.
    fn unlock<R: Resource>(&self, id: ResourceId, worker: &WorkerId, force: bool) -> Result<bool> {
        let previous = self.modify::<R, _, _>(id, |record| {
            let Some(lock) = record.meta().lock.clone() else {
                return Ok(Mutation::Keep(None));
            };
            if !force && !lock.is_held_by(worker) {
                return Ok(Mutation::Keep(Some(lock)));
            }
            record.meta_mut().lock = None;
            Ok(Mutation::Write(Some(lock)))
        })?;

        match previous {
            Some(lock) if force => {
                warn!(
                    kind = %R::kind(),
                    resource_id = %id,
                    worker = %worker,
                    owner = %lock.acquired_by,
                    acquired_at = %lock.acquired_at,
                    "Lock forcibly released"
                );
                Ok(true)
            }
            Some(lock) if lock.is_held_by(worker) => {
                debug!(kind = %R::kind(), resource_id = %id, worker = %worker, "Lock released");
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(force),
        }
    }

    /// Try to lock each id independently.
    ///
    /// # Errors
    ///
    /// Returns the first error other than a missing or deleted record.
    fn lock_many<R: Resource>(
        &self,
        ids: &[ResourceId],
        worker: &WorkerId,
    ) -> Result<BulkLockOutcome> {
        let mut outcome = BulkLockOutcome::default();
        for &id in ids {
            match self.lock::<R>(id, worker) {
                Ok(true) => outcome.succeeded.push(id),
                Ok(false) => outcome.contended.push(id),
                Err(StoreError::NotFound { .. } | StoreError::Deleted { .. }) => {
                    outcome.missing.push(id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// Release each id independently.
    ///
    /// # Errors
    ///
    /// Returns the first error other than a missing record.
    fn unlock_many<R: Resource>(
        &self,
        ids: &[ResourceId],
        worker: &WorkerId,
        force: bool,
    ) -> Result<BulkLockOutcome> {
        let mut outcome = BulkLockOutcome::default();
        for &id in ids {
            match self.unlock::<R>(id, worker, force) {
                Ok(true) => outcome.succeeded.push(id),
                Ok(false) => outcome.contended.push(id),
                Err(StoreError::NotFound { .. }) => outcome.missing.push(id),
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// Release a lock given only the record's kind.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if there is no such record.
    fn unlock_by_kind(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        worker: &WorkerId,
        force: bool,
    ) -> Result<bool> {
        match kind {
            ResourceKind::Cluster => self.unlock::<Cluster>(id, worker, force),
            ResourceKind::Installation => self.unlock::<Installation>(id, worker, force),
            ResourceKind::InstallationBackup => {
                self.unlock::<InstallationBackup>(id, worker, force)
            }
            ResourceKind::InstallationDbMigration => {
                self.unlock::<InstallationDbMigration>(id, worker, force)
            }
            ResourceKind::InstallationDbRestoration => {
                self.unlock::<InstallationDbRestoration>(id, worker, force)
            }
        }
    }

    /// Clear a lock only if it is still exactly `expected`.
    ///
    /// Used to reclaim a lock observed earlier without racing a holder that
    /// refreshed it in the meantime.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if there is no such record.
    fn release_if_unchanged(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        expected: &ResourceLock,
    ) -> Result<bool> {
        match kind {
            ResourceKind::Cluster => release_exact::<Self, Cluster>(self, id, expected),
            ResourceKind::Installation => release_exact::<Self, Installation>(self, id, expected),
            ResourceKind::InstallationBackup => {
                release_exact::<Self, InstallationBackup>(self, id, expected)
            }
            ResourceKind::InstallationDbMigration => {
                release_exact::<Self, InstallationDbMigration>(self, id, expected)
            }
            ResourceKind::InstallationDbRestoration => {
                release_exact::<Self, InstallationDbRestoration>(self, id, expected)
            }
        }
    }

    /// Every held lock across all kinds.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_locked(&self) -> Result<Vec<LockedResource>> {
        let mut locked = Vec::new();
        collect_locked::<Self, Cluster>(self, &mut locked)?;
        collect_locked::<Self, Installation>(self, &mut locked)?;
        collect_locked::<Self, InstallationBackup>(self, &mut locked)?;
        collect_locked::<Self, InstallationDbMigration>(self, &mut locked)?;
        collect_locked::<Self, InstallationDbRestoration>(self, &mut locked)?;
        Ok(locked)
    }

    // =========================================================================
    // Guarded writes
    // =========================================================================

    /// Write a record's payload and state on behalf of the lock holder.
    ///
    /// The stored header (lock, timestamps, API security lock) is kept; only
    /// the payload and state of `record` are taken. Returns the stored result.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockNotHeld` unless `worker` holds the lock,
    /// `StoreError::Deleted` for a soft-deleted record and
    /// `StoreError::IllegalTransition` if the state change is not permitted.
    fn update<R: Resource>(&self, record: &R, worker: &WorkerId) -> Result<R> {
        let id = record.id();
        let updated = self.modify::<R, _, _>(id, |stored| {
            ensure_lock_held(stored, worker)?;
            let meta = stored.meta().clone();
            *stored = record.clone();
            *stored.meta_mut() = meta;
            Ok(Mutation::Write(stored.clone()))
        })?;
        debug!(
            kind = %R::kind(),
            resource_id = %id,
            worker = %worker,
            state = %updated.state(),
            "Resource updated"
        );
        Ok(updated)
    }

    /// Record an API request for a new state.
    ///
    /// See [`Store::request_state_with`].
    ///
    /// # Errors
    ///
    /// As [`Store::request_state_with`].
    fn request_state<R: Resource>(&self, id: ResourceId, requested: R::State) -> Result<R> {
        self.request_state_with::<R, _>(id, requested, |_| Ok(()))
    }

    /// Record an API request for a new state, applying `apply` to the payload
    /// in the same atomic write.
    ///
    /// The record must be unlocked, live, without its API security lock, and
    /// the kind's request table must allow the move.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked`, `StoreError::Deleted`,
    /// `StoreError::ApiSecurityLocked` or `StoreError::IllegalTransition` when
    /// the request is refused, or the error returned by `apply`.
    fn request_state_with<R, F>(&self, id: ResourceId, requested: R::State, apply: F) -> Result<R>
    where
        R: Resource,
        F: FnOnce(&mut R) -> Result<()>,
    {
        let (from, record) = self.modify::<R, _, _>(id, |stored| {
            let kind = R::kind();
            let meta = stored.meta();
            if meta.is_deleted() {
                return Err(StoreError::Deleted { kind, id });
            }
            if let Some(lock) = &meta.lock {
                return Err(StoreError::Locked {
                    kind,
                    id,
                    owner: lock.acquired_by.clone(),
                });
            }
            if meta.api_security_lock {
                return Err(StoreError::ApiSecurityLocked { kind, id });
            }
            let from = stored.state();
            let requests = &R::State::registry().requests;
            if !requests.allows(from, requested) {
                return Err(StoreError::IllegalTransition {
                    kind,
                    id,
                    from: from.name(),
                    to: requested.name(),
                    allowed_from: requests
                        .legal_sources(requested)
                        .unwrap_or_default()
                        .iter()
                        .map(|state| state.name())
                        .collect(),
                });
            }
            apply(stored)?;
            stored.set_state(requested);
            Ok(Mutation::Write((from, stored.clone())))
        })?;
        info!(
            kind = %R::kind(),
            resource_id = %id,
            from = %from,
            to = %requested,
            "State requested"
        );
        Ok(record)
    }

    /// Soft-delete a record that has reached its kind's deleted state.
    ///
    /// Deleting an already deleted record returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockNotHeld` unless `worker` holds the lock and
    /// `StoreError::NotInDeletedState` if the record is in another state.
    fn soft_delete<R: Resource>(&self, id: ResourceId, worker: &WorkerId) -> Result<R> {
        let now = types::now();
        let record = self.modify::<R, _, _>(id, |stored| {
            if stored.meta().is_deleted() {
                return Ok(Mutation::Keep(stored.clone()));
            }
            ensure_lock_held(stored, worker)?;
            if stored.state() != R::State::DELETED {
                return Err(StoreError::NotInDeletedState {
                    kind: R::kind(),
                    id,
                    state: stored.state().name(),
                });
            }
            stored.meta_mut().delete_at = Some(now);
            Ok(Mutation::Write(stored.clone()))
        })?;
        info!(kind = %R::kind(), resource_id = %id, worker = %worker, "Resource soft-deleted");
        Ok(record)
    }

    /// Write a record in its kind's deleted state and soft-delete it in the
    /// same atomic write.
    ///
    /// The payload of `record` is taken as in [`Store::update`]. On failure
    /// nothing is written, so the stored record keeps its previous state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotInDeletedState` unless `record` is in the
    /// deleted state, `StoreError::LockNotHeld` unless `worker` holds the
    /// lock, `StoreError::Deleted` for an already deleted record and
    /// `StoreError::IllegalTransition` if the final move is not permitted.
    fn complete_deletion<R: Resource>(&self, record: &R, worker: &WorkerId) -> Result<R> {
        let id = record.id();
        if record.state() != R::State::DELETED {
            return Err(StoreError::NotInDeletedState {
                kind: R::kind(),
                id,
                state: record.state().name(),
            });
        }
        let now = types::now();
        let deleted = self.modify::<R, _, _>(id, |stored| {
            ensure_lock_held(stored, worker)?;
            let mut meta = stored.meta().clone();
            meta.delete_at = Some(now);
            *stored = record.clone();
            *stored.meta_mut() = meta;
            Ok(Mutation::Write(stored.clone()))
        })?;
        info!(kind = %R::kind(), resource_id = %id, worker = %worker, "Resource soft-deleted");
        Ok(deleted)
    }

    /// Set or clear the API security lock of a live record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` or `StoreError::Deleted`.
    fn set_api_security_lock<R: Resource>(&self, id: ResourceId, locked: bool) -> Result<R> {
        let record = self.modify::<R, _, _>(id, |stored| {
            if stored.meta().is_deleted() {
                return Err(StoreError::Deleted {
                    kind: R::kind(),
                    id,
                });
            }
            if stored.meta().api_security_lock == locked {
                return Ok(Mutation::Keep(stored.clone()));
            }
            stored.meta_mut().api_security_lock = locked;
            Ok(Mutation::Write(stored.clone()))
        })?;
        info!(kind = %R::kind(), resource_id = %id, locked, "API security lock set");
        Ok(record)
    }
}

fn ensure_lock_held<R: Resource>(stored: &R, worker: &WorkerId) -> Result<()> {
    let kind = R::kind();
    let id = stored.id();
    if stored.meta().is_deleted() {
        return Err(StoreError::Deleted { kind, id });
    }
    match &stored.meta().lock {
        Some(lock) if lock.is_held_by(worker) => Ok(()),
        _ => Err(StoreError::LockNotHeld {
            kind,
            id,
            worker: worker.clone(),
        }),
    }
}

fn release_exact<S: Store + ?Sized, R: Resource>(
    store: &S,
    id: ResourceId,
    expected: &ResourceLock,
) -> Result<bool> {
    let released = store.modify::<R, _, _>(id, |record| {
        if record.meta().lock.as_ref() != Some(expected) {
            return Ok(Mutation::Keep(false));
        }
        record.meta_mut().lock = None;
        Ok(Mutation::Write(true))
    })?;
    if released {
        warn!(
            kind = %R::kind(),
            resource_id = %id,
            owner = %expected.acquired_by,
            acquired_at = %expected.acquired_at,
            "Lock forcibly released"
        );
    }
    Ok(released)
}

fn collect_locked<S: Store + ?Sized, R: Resource>(
    store: &S,
    out: &mut Vec<LockedResource>,
) -> Result<()> {
    let records = store.list::<R>(&ResourceFilter::all().including_deleted())?;
    out.extend(records.into_iter().filter_map(|record| {
        let id = record.id();
        record.meta().lock.clone().map(|lock| LockedResource {
            kind: R::kind(),
            id,
            lock,
        })
    }));
    Ok(())
}

/// Check a pending write produced by a [`Store::modify`] closure.
///
/// Shared by the store implementations so both enforce the same rules.
pub(crate) fn check_write<R: Resource>(before: &R, after: &R) -> Result<()> {
    let kind = R::kind();
    let id = before.id();
    if after.id() != id {
        return Err(StoreError::InvalidRecord(format!(
            "{kind} {id}: id is immutable"
        )));
    }
    if before.meta().is_deleted() && after.meta().delete_at != before.meta().delete_at {
        return Err(StoreError::InvalidRecord(format!(
            "{kind} {id}: deletion time is immutable"
        )));
    }
    if !before.meta().is_deleted()
        && after.meta().is_deleted()
        && after.state() != R::State::DELETED
    {
        return Err(StoreError::NotInDeletedState {
            kind,
            id,
            state: after.state().name(),
        });
    }
    let (from, to) = (before.state(), after.state());
    let registry = R::State::registry();
    if from != to && !registry.permits(from, to) {
        return Err(StoreError::IllegalTransition {
            kind,
            id,
            from: from.name(),
            to: to.name(),
            allowed_from: registry
                .permitted_sources(to)
                .into_iter()
                .map(|state| state.name())
                .collect(),
        });
    }
    Ok(())
}
