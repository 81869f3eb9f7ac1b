//! Stale lock recovery.
//!
//! A worker that crashes while holding a lock leaves the record frozen: the
//! API refuses requests on it and other supervisors skip it. The reaper
//! releases locks older than a threshold. A lock is only cleared if it is
//! still exactly the one observed, so a holder that refreshed its lock in the
//! meantime keeps it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cloudfleet_store::{LockedResource, Store, StoreError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::error::Result;

/// Release every lock older than `threshold` at `now`.
///
/// Returns the locks that were released. Each is logged at `warn!` as the
/// audit record of the forced release.
///
/// # Errors
///
/// Returns an error if held locks cannot be listed or a release fails.
pub fn release_stale_locks<S: Store>(
    store: &S,
    threshold: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<Vec<LockedResource>> {
    let mut released = Vec::new();
    for locked in store.list_locked()? {
        let age = locked.lock.age(now);
        if age < threshold {
            continue;
        }
        match store.release_if_unchanged(locked.kind, locked.id, &locked.lock) {
            Ok(true) => {
                warn!(
                    kind = %locked.kind,
                    resource_id = %locked.id,
                    owner = %locked.lock.acquired_by,
                    age_seconds = age.num_seconds(),
                    "Released stale lock"
                );
                released.push(locked);
            }
            // Released or refreshed by its holder since it was listed.
            Ok(false) | Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(released)
}

/// Run [`release_stale_locks`] every `interval` until `shutdown` turns true
/// or its sender is dropped.
pub async fn run_reaper<S: Store>(
    store: Arc<S>,
    threshold: chrono::Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(threshold_seconds = threshold.num_seconds(), "Lock reaper started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = release_stale_locks(store.as_ref(), threshold, Utc::now()) {
                    warn!(error = %e, "Lock reaper pass failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Lock reaper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudfleet_core::{ResourceId, ResourceKind, WorkerId};
    use cloudfleet_store::{Cluster, Installation, MemoryStore, NodeGroup};

    fn cluster(store: &MemoryStore) -> ResourceId {
        let groups = [("ng-a".to_string(), NodeGroup::fixed("m5.large", 1))].into();
        let cluster = Cluster::new("aws", "1.29", groups);
        store.create(&cluster).unwrap();
        cluster.meta.id
    }

    fn installation(store: &MemoryStore) -> ResourceId {
        let installation = Installation::new("acme", "acme.example.com", "9.1");
        store.create(&installation).unwrap();
        installation.meta.id
    }

    #[test]
    fn releases_only_stale_locks() {
        let store = MemoryStore::new();
        let crashed = WorkerId::new("supervisor-crashed").unwrap();
        let stale = cluster(&store);
        let fresh = installation(&store);
        assert!(store.lock::<Cluster>(stale, &crashed).unwrap());
        assert!(store.lock::<Installation>(fresh, &crashed).unwrap());

        let threshold = chrono::Duration::minutes(10);
        let released = release_stale_locks(&store, threshold, Utc::now()).unwrap();
        assert!(released.is_empty());

        // Later, both are stale.
        let later = Utc::now() + chrono::Duration::minutes(11);
        let released = release_stale_locks(&store, threshold, later).unwrap();
        assert_eq!(released.len(), 2);
        assert!(released.iter().any(|l| l.kind == ResourceKind::Cluster && l.id == stale));
        assert!(released.iter().all(|l| l.lock.acquired_by == crashed));
        assert!(store.list_locked().unwrap().is_empty());
    }

    #[test]
    fn refreshed_lock_survives() {
        let store = MemoryStore::new();
        let worker = WorkerId::new("supervisor-1").unwrap();
        let id = cluster(&store);
        assert!(store.lock::<Cluster>(id, &worker).unwrap());

        // The holder refreshes its lock after the reaper listed it.
        let observed = store.list_locked().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(store.lock::<Cluster>(id, &worker).unwrap());
        assert!(!store
            .release_if_unchanged(ResourceKind::Cluster, id, &observed[0].lock)
            .unwrap());

        let later = Utc::now() + chrono::Duration::hours(1);
        let released = release_stale_locks(&store, chrono::Duration::minutes(10), later).unwrap();
        assert_eq!(released.len(), 1);
        assert_ne!(released[0].lock, observed[0].lock);
    }

    #[test]
    fn nothing_locked() {
        let store = MemoryStore::new();
        cluster(&store);
        let released =
            release_stale_locks(&store, chrono::Duration::zero(), Utc::now()).unwrap();
        assert!(released.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_loop_releases_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let crashed = WorkerId::new("supervisor-crashed").unwrap();
        let id = cluster(&store);
        assert!(store.lock::<Cluster>(id, &crashed).unwrap());

        let (tx, rx) = watch::channel(false);
        let stop = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(
            run_reaper(Arc::clone(&store), chrono::Duration::zero(), Duration::from_secs(1), rx),
            stop
        );

        assert!(store.list_locked().unwrap().is_empty());
    }
}
