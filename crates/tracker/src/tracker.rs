//! Job tracker facade.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use docent_core::{ConversationId, JobId, JobStats, JobStatus, LessonId, PendingFilter, TrackedJob};

use crate::config::{PollSettings, TrackerConfig};
use crate::error::TrackerError;
use crate::scheduler::{PollCallbacks, PollScheduler};
use crate::status::{HttpStatusClient, StatusSource};
use crate::store::{StoreMode, TrackerStore};

/// Tracks background jobs: persists them, polls them, resumes them.
///
/// Apart from [`JobTracker::init`], no method fails: persistence problems
/// degrade to memory, and polling outcomes arrive through [`PollCallbacks`].
#[derive(Debug)]
pub struct JobTracker {
    store: Arc<TrackerStore>,
    scheduler: PollScheduler,
}

impl JobTracker {
    /// Open the store and build the HTTP status client from `config`.
    ///
    /// Terminal jobs left behind by an earlier session are purged.
    pub async fn init(config: &TrackerConfig) -> Result<Self, TrackerError> {
        let source = HttpStatusClient::from_config(config)?;
        let store = TrackerStore::open(&config.store).await;

        let purged = store.purge_terminal(Utc::now()).await;
        if purged > 0 {
            info!(purged, "removed finished jobs left from a previous session");
        }

        info!(api_url = %config.api_url, mode = ?store.mode(), "job tracker ready");
        Ok(Self::with_parts(Arc::new(store), Arc::new(source), config.poll.clone()))
    }

    /// [`JobTracker::init`] with configuration read from `DOCENT_*` variables.
    pub async fn from_env() -> Result<Self, TrackerError> {
        let config = TrackerConfig::from_env()?;
        Self::init(&config).await
    }

    pub fn with_parts(
        store: Arc<TrackerStore>,
        source: Arc<dyn StatusSource>,
        settings: PollSettings,
    ) -> Self {
        let scheduler = PollScheduler::new(store.clone(), source, settings);
        Self { store, scheduler }
    }

    pub fn store_mode(&self) -> StoreMode {
        self.store.mode()
    }

    /// Record a freshly dispatched job as `pending`.
    pub async fn create_job(
        &self,
        job_id: JobId,
        conversation_id: Option<ConversationId>,
        lesson_id: Option<LessonId>,
    ) -> TrackedJob {
        let mut job = TrackedJob::new(job_id);
        job.conversation_id = conversation_id;
        job.lesson_id = lesson_id;

        self.store.put(&job).await;
        debug!(job_id = %job.job_id, "tracking job");
        job
    }

    pub async fn save_job(&self, job: &TrackedJob) {
        self.store.put(job).await;
    }

    pub async fn get_job(&self, job_id: &JobId) -> Option<TrackedJob> {
        self.store.get(job_id).await
    }

    /// Returns `false` when the job is not tracked.
    pub async fn update_job_status(&self, job_id: &JobId, status: JobStatus) -> bool {
        self.store.update_status(job_id, status).await
    }

    /// Stop polling `job_id` and forget it.
    ///
    /// The polling task is gone before the job is deleted, so it cannot write
    /// the job back.
    pub async fn delete_job(&self, job_id: &JobId) {
        self.scheduler.cancel(job_id).await;
        self.store.delete(job_id).await;
    }

    pub async fn get_pending_jobs(&self, filter: &PendingFilter) -> Vec<TrackedJob> {
        self.store.query_pending(filter).await
    }

    pub fn start_polling(&self, job_id: JobId, callbacks: PollCallbacks) {
        self.scheduler.start_polling(job_id, callbacks);
    }

    pub fn stop_polling(&self, job_id: &JobId) -> bool {
        self.scheduler.stop_polling(job_id)
    }

    pub fn is_polling(&self, job_id: &JobId) -> bool {
        self.scheduler.is_polling(job_id)
    }

    /// Resume polling of every pending job matching `filter`.
    ///
    /// Jobs that are already being polled keep their task. Returns how many
    /// polls were started.
    pub async fn check_pending_jobs_on_resume(
        &self,
        filter: &PendingFilter,
        callbacks: PollCallbacks,
    ) -> usize {
        let pending = self.store.query_pending(filter).await;
        if pending.is_empty() {
            debug!("no pending jobs to resume");
            return 0;
        }

        let started = pending
            .into_iter()
            .filter(|job| {
                self.scheduler
                    .start_polling_if_idle(job.job_id.clone(), callbacks.clone())
            })
            .count();

        if started > 0 {
            info!(started, "resumed polling of pending jobs");
        }
        started
    }

    pub async fn stats(&self) -> JobStats {
        self.store.stats().await
    }

    /// Stop every poll. Tracked jobs stay in the store for the next session.
    pub fn shutdown(&self) {
        self.scheduler.stop_all();
    }
}
