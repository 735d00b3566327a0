//! Job persistence.
//!
//! ## Design
//!
//! - `JobStore` is the backend seam (SQLite in production, memory in tests)
//! - `TrackerStore` adapts a durable backend and never fails: when the backend
//!   is unavailable it serves everything from an in-process map
//! - Every write is mirrored into that map, so switching to the fallback in
//!   the middle of a session keeps serving what this process wrote
//!
//! ## Modes
//!
//! `StoreMode::Durable` turns into `StoreMode::Fallback` exactly once: when the
//! backend cannot be opened, or on the first failed backend operation. There is
//! no way back within a process.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use docent_core::{JobId, JobStats, JobStatus, PendingFilter, TrackedJob};

use crate::config::StoreLocation;

pub use memory::InMemoryJobStore;
pub use sqlite::SqliteJobStore;

/// Job store abstraction.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the job keyed by its id.
    async fn put(&self, job: &TrackedJob) -> Result<(), StoreError>;

    /// Get a job by id.
    async fn get(&self, job_id: &JobId) -> Result<Option<TrackedJob>, StoreError>;

    /// Pending jobs matching the filter, oldest first.
    async fn query_pending(&self, filter: &PendingFilter) -> Result<Vec<TrackedJob>, StoreError>;

    /// Delete a job; deleting a missing job succeeds.
    async fn delete(&self, job_id: &JobId) -> Result<(), StoreError>;

    /// Delete terminal jobs last touched at or before `cutoff`.
    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Job counts per status.
    async fn stats(&self) -> Result<JobStats, StoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("corrupt job record: {0}")]
    Corrupt(String),
}

/// Which backing store serves requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Durable,
    Fallback,
}

/// Store adapter used by the tracker.
pub struct TrackerStore {
    durable: Option<Arc<dyn JobStore>>,
    fallback: InMemoryJobStore,
    degraded: AtomicBool,
}

impl std::fmt::Debug for TrackerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerStore")
            .field("mode", &self.mode())
            .field("mirrored_jobs", &self.fallback.len())
            .finish()
    }
}

impl TrackerStore {
    /// Open the SQLite store at `location`; fall back to memory on any failure.
    pub async fn open(location: &StoreLocation) -> Self {
        let path = match location.resolve() {
            Ok(Some(path)) => path,
            Ok(None) => {
                tracing::info!("job persistence disabled; tracking jobs in memory");
                return Self::fallback_only();
            }
            Err(err) => {
                tracing::warn!("cannot resolve job store path, tracking jobs in memory: {err:#}");
                return Self::fallback_only();
            }
        };

        match SqliteJobStore::open(&path).await {
            Ok(store) => {
                tracing::info!(path = %path.display(), "job store opened");
                Self::with_durable(Arc::new(store))
            }
            Err(err) => {
                tracing::warn!("failed to open job store, tracking jobs in memory: {err:#}");
                Self::fallback_only()
            }
        }
    }

    /// Adapter over an already opened durable backend.
    pub fn with_durable(durable: Arc<dyn JobStore>) -> Self {
        Self {
            durable: Some(durable),
            fallback: InMemoryJobStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Adapter that never persists.
    pub fn fallback_only() -> Self {
        Self {
            durable: None,
            fallback: InMemoryJobStore::new(),
            degraded: AtomicBool::new(true),
        }
    }

    pub fn mode(&self) -> StoreMode {
        if self.active().is_some() {
            StoreMode::Durable
        } else {
            StoreMode::Fallback
        }
    }

    fn active(&self) -> Option<&Arc<dyn JobStore>> {
        if self.degraded.load(Ordering::Acquire) {
            None
        } else {
            self.durable.as_ref()
        }
    }

    fn degrade(&self, operation: &str, err: &StoreError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(operation, "job store failed, switching to in-memory fallback: {err}");
        } else {
            tracing::warn!(operation, "job store failed: {err}");
        }
    }

    /// Upsert `job`.
    pub async fn put(&self, job: &TrackedJob) {
        self.fallback.insert(job.clone());
        if let Some(durable) = self.active() {
            if let Err(err) = durable.put(job).await {
                self.degrade("put", &err);
            }
        }
    }

    pub async fn get(&self, job_id: &JobId) -> Option<TrackedJob> {
        if let Some(durable) = self.active() {
            match durable.get(job_id).await {
                Ok(found) => {
                    if let Some(job) = &found {
                        self.fallback.insert(job.clone());
                    }
                    return found;
                }
                Err(err) => self.degrade("get", &err),
            }
        }
        self.fallback.find(job_id)
    }

    /// Pending jobs matching `filter`, oldest first.
    pub async fn query_pending(&self, filter: &PendingFilter) -> Vec<TrackedJob> {
        if let Some(durable) = self.active() {
            match durable.query_pending(filter).await {
                Ok(jobs) => {
                    for job in &jobs {
                        self.fallback.insert(job.clone());
                    }
                    return jobs;
                }
                Err(err) => self.degrade("query_pending", &err),
            }
        }
        self.fallback.pending(filter)
    }

    /// Remove `job_id` from both backing stores. Never fails.
    pub async fn delete(&self, job_id: &JobId) {
        self.fallback.remove(job_id);
        if let Some(durable) = self.active() {
            if let Err(err) = durable.delete(job_id).await {
                self.degrade("delete", &err);
            }
        }
    }

    /// Set the status of a stored job; `false` if the job is unknown.
    pub async fn update_status(&self, job_id: &JobId, status: JobStatus) -> bool {
        self.modify(job_id, || true, |job| job.set_status(status)).await
    }

    /// Record a probe that reported `status`; `false` if the job is unknown.
    pub async fn record_poll(&self, job_id: &JobId, status: JobStatus) -> bool {
        self.record_answer(job_id, Some(status), || true).await
    }

    /// Record a status request for `job_id`, with the status it got if any.
    ///
    /// `still_owned` runs after the read and immediately before the write, in
    /// the same poll; when it returns `false` nothing is written.
    pub async fn record_answer<G>(
        &self,
        job_id: &JobId,
        status: Option<JobStatus>,
        still_owned: G,
    ) -> bool
    where
        G: Fn() -> bool,
    {
        self.modify(job_id, still_owned, |job| match status {
            Some(status) => job.record_poll(status),
            None => job.record_attempt(),
        })
        .await
    }

    async fn modify<G, F>(&self, job_id: &JobId, still_owned: G, f: F) -> bool
    where
        G: Fn() -> bool,
        F: FnOnce(&mut TrackedJob),
    {
        let Some(mut job) = self.get(job_id).await else {
            tracing::warn!(job_id = %job_id, "cannot update unknown job");
            return false;
        };
        if !still_owned() {
            tracing::debug!(job_id = %job_id, "dropping update of a job no longer polled");
            return false;
        }
        f(&mut job);
        self.put(&job).await;
        true
    }

    /// Drop terminal jobs last touched at or before `cutoff`.
    pub async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> u64 {
        let mirrored = self.fallback.remove_terminal_before(cutoff);
        if let Some(durable) = self.active() {
            match durable.purge_terminal(cutoff).await {
                Ok(purged) => return purged,
                Err(err) => self.degrade("purge_terminal", &err),
            }
        }
        mirrored
    }

    pub async fn stats(&self) -> JobStats {
        if let Some(durable) = self.active() {
            match durable.stats().await {
                Ok(stats) => return stats,
                Err(err) => self.degrade("stats", &err),
            }
        }
        self.fallback.counts()
    }
}
