//! The generic supervisor loop.
//!
//! A supervisor owns the progression of one resource kind. Each pass lists
//! the kind's pending work in priority order and, for every record it can
//! lock, asks its [`Reconciler`] what to do next. The lock is held from the
//! re-read until the write, so no other worker or API request observes a
//! half-finished step.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cloudfleet_core::{LifecycleState, ResourceId, WorkerId};
use cloudfleet_store::{Resource, Store, StoreError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::lifecycle;
use crate::types::ControlConfig;

/// What a reconciler decided for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<S> {
    /// Move to this state, persisting any payload changes with it.
    Transition(S),
    /// Nothing to record yet; payload changes are discarded.
    Unchanged,
}

/// The kind-specific work behind a supervisor.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// The record kind this reconciler drives.
    type Record: Resource;

    /// Perform the work due for `record` in its current state.
    ///
    /// Called with the record locked by the supervisor. Returning an error
    /// leaves the stored record untouched and retries on a later pass.
    async fn reconcile(
        &self,
        record: &mut Self::Record,
    ) -> Result<Outcome<<Self::Record as Resource>::State>>;
}

/// Counts from one supervisor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Records moved to a new state.
    pub transitioned: usize,
    /// Records the reconciler left as they were.
    pub unchanged: usize,
    /// Records held by another worker.
    pub skipped_locked: usize,
    /// Records that stopped being pending work before they were locked.
    pub skipped_stale: usize,
    /// Records whose reconciliation or write failed.
    pub failed: usize,
}

impl PassReport {
    /// Records this pass locked and worked on.
    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.transitioned + self.unchanged + self.failed
    }

    /// Whether the pass found nothing to do.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.attempted() == 0 && self.skipped_locked == 0 && self.skipped_stale == 0
    }
}

enum Step {
    Transitioned,
    Unchanged,
    Stale,
}

/// Drives records of one kind through their progressions.
pub struct Supervisor<S: Store, R: Reconciler> {
    store: Arc<S>,
    reconciler: R,
    worker: WorkerId,
    max_per_pass: usize,
    poll_interval: Duration,
}

impl<S: Store, R: Reconciler> Supervisor<S, R> {
    /// Create a supervisor using the worker identity and limits in `config`.
    #[must_use]
    pub fn new(store: Arc<S>, reconciler: R, config: &ControlConfig) -> Self {
        Self {
            store,
            reconciler,
            worker: config.worker_id.clone(),
            max_per_pass: config.max_concurrent_per_kind.max(1),
            poll_interval: config.poll_interval(),
        }
    }

    /// The identity this supervisor locks records under.
    #[must_use]
    pub const fn worker(&self) -> &WorkerId {
        &self.worker
    }

    /// Run one pass over the kind's pending work.
    ///
    /// Failures on individual records are logged and counted; they never
    /// stop the pass.
    ///
    /// # Errors
    ///
    /// Returns an error if pending work cannot be listed.
    pub async fn pass(&self) -> Result<PassReport> {
        let kind = R::Record::kind();
        let pending = self.store.list_pending::<R::Record>()?;
        let mut report = PassReport::default();

        for record in pending {
            if report.attempted() >= self.max_per_pass {
                break;
            }
            let id = record.id();
            match self.store.lock::<R::Record>(id, &self.worker) {
                Ok(true) => {}
                Ok(false) => {
                    report.skipped_locked += 1;
                    continue;
                }
                Err(StoreError::Deleted { .. } | StoreError::NotFound { .. }) => {
                    report.skipped_stale += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let step = self.work_locked(id).await;
            if let Err(e) = self.store.unlock::<R::Record>(id, &self.worker, false) {
                warn!(
                    kind = %kind,
                    resource_id = %id,
                    worker = %self.worker,
                    error = %e,
                    "Failed to release lock"
                );
            }
            match step {
                Ok(Step::Transitioned) => report.transitioned += 1,
                Ok(Step::Unchanged) => report.unchanged += 1,
                Ok(Step::Stale) => report.skipped_stale += 1,
                Err(e) => {
                    warn!(
                        kind = %kind,
                        resource_id = %id,
                        worker = %self.worker,
                        error = %e,
                        "Reconciliation failed"
                    );
                    report.failed += 1;
                }
            }
        }

        if !report.is_idle() {
            debug!(kind = %kind, worker = %self.worker, ?report, "Supervisor pass finished");
        }
        Ok(report)
    }

    async fn work_locked(&self, id: ResourceId) -> Result<Step> {
        let mut record = self.store.fetch::<R::Record>(id)?;
        let current = record.state();
        if record.meta().is_deleted() || !current.is_pending_work() {
            return Ok(Step::Stale);
        }

        let next = match self.reconciler.reconcile(&mut record).await? {
            Outcome::Unchanged => return Ok(Step::Unchanged),
            Outcome::Transition(next) => lifecycle::validate_progression(id, current, next)?,
        };

        record.set_state(next);
        if next == <R::Record as Resource>::State::DELETED {
            self.store.complete_deletion(&record, &self.worker)?;
        } else {
            self.store.update(&record, &self.worker)?;
        }
        info!(
            kind = %R::Record::kind(),
            resource_id = %id,
            worker = %self.worker,
            from = %current,
            to = %next,
            "Resource progressed"
        );
        Ok(Step::Transitioned)
    }

    /// Run passes every poll interval until `shutdown` turns true or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let kind = R::Record::kind();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            kind = %kind,
            worker = %self.worker,
            interval = ?self.poll_interval,
            "Supervisor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.pass().await {
                        warn!(
                            kind = %kind,
                            worker = %self.worker,
                            error = %e,
                            "Supervisor pass failed"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(kind = %kind, worker = %self.worker, "Supervisor stopped");
    }
}
