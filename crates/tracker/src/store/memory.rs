//! In-process job store.
//!
//! Serves as the fallback when SQLite is unavailable and as the write-through
//! mirror that keeps a degraded tracker consistent with what it wrote.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use docent_core::{JobId, JobStats, PendingFilter, TrackedJob};

use super::{JobStore, StoreError};

/// `HashMap`-backed job store.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, TrackedJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: TrackedJob) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(job.job_id.clone(), job);
    }

    pub fn find(&self, job_id: &JobId) -> Option<TrackedJob> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(job_id).cloned()
    }

    /// Pending jobs matching `filter`, oldest first.
    pub fn pending(&self, filter: &PendingFilter) -> Vec<TrackedJob> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut result: Vec<_> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();

        result.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        result
    }

    pub fn remove(&self, job_id: &JobId) -> Option<TrackedJob> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.remove(job_id)
    }

    /// Drop terminal jobs last touched before `cutoff`; returns how many.
    pub fn remove_terminal_before(&self, cutoff: DateTime<Utc>) -> u64 {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.updated_at.unwrap_or(job.created_at) <= cutoff)
        });
        (before - jobs.len()) as u64
    }

    pub fn counts(&self) -> JobStats {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.record(job.status);
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put(&self, job: &TrackedJob) -> Result<(), StoreError> {
        self.insert(job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<TrackedJob>, StoreError> {
        Ok(self.find(job_id))
    }

    async fn query_pending(&self, filter: &PendingFilter) -> Result<Vec<TrackedJob>, StoreError> {
        Ok(self.pending(filter))
    }

    async fn delete(&self, job_id: &JobId) -> Result<(), StoreError> {
        self.remove(job_id);
        Ok(())
    }

    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self.remove_terminal_before(cutoff))
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        Ok(self.counts())
    }
}
