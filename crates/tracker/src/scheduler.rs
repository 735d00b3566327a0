//! Per-job polling scheduler.
//!
//! Each `start_polling` call spawns one task that probes the backend until the
//! job reaches a terminal status, the deadline passes, or too many probes in a
//! row fail. The scheduler owns the only registry of running tasks:
//!
//! - starting a job that is already polled cancels the old task first
//! - every registration carries a generation; a task only acts on a probe
//!   result while its generation is still the registered one
//! - a finishing task deletes the job while still registered and deregisters
//!   before invoking callbacks, so a resume never sees a pending job without
//!   its task, and `stop_polling` and completion never both win

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Deadline used when a configured timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
use tracing::{debug, info, warn};

use docent_core::{JobId, JobStatus};

use crate::config::{PollSettings, TimeoutPolicy};
use crate::status::{ProbeError, RemoteJobStatus, StatusSource};
use crate::store::TrackerStore;

/// Called with the result payload of a completed job.
pub type CompletionHandler = Arc<dyn Fn(&JobId, &Value) + Send + Sync>;

/// Called when polling of a job ends without a result.
pub type ErrorHandler = Arc<dyn Fn(&JobId, &PollError) + Send + Sync>;

/// Why polling of a job ended without a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("job did not finish within {0:?}")]
    Timeout(Duration),
    #[error("job failed: {0}")]
    Remote(String),
    #[error("gave up after {attempts} failed status checks: {last_error}")]
    Exhausted { attempts: u32, last_error: ProbeError },
}

/// Optional outcome handlers of one polling run.
#[derive(Clone, Default)]
pub struct PollCallbacks {
    on_complete: Option<CompletionHandler>,
    on_error: Option<ErrorHandler>,
}

impl std::fmt::Debug for PollCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollCallbacks")
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl PollCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: Fn(&JobId, &Value) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(handler));
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&JobId, &PollError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    fn complete(&self, job_id: &JobId, result: &Value) {
        if let Some(handler) = &self.on_complete {
            handler(job_id, result);
        }
    }

    fn fail(&self, job_id: &JobId, error: &PollError) {
        if let Some(handler) = &self.on_error {
            handler(job_id, error);
        }
    }
}

#[derive(Debug)]
struct ActivePoll {
    generation: u64,
    task: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<JobId, ActivePoll>>>;

/// Polls job status until each job resolves.
pub struct PollScheduler {
    store: Arc<TrackerStore>,
    source: Arc<dyn StatusSource>,
    settings: PollSettings,
    registry: Registry,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("settings", &self.settings)
            .field("active", &self.active_count())
            .finish()
    }
}

impl PollScheduler {
    pub fn new(
        store: Arc<TrackerStore>,
        source: Arc<dyn StatusSource>,
        settings: PollSettings,
    ) -> Self {
        Self {
            store,
            source,
            settings,
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Start polling `job_id`, replacing any task already polling it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_polling(&self, job_id: JobId, callbacks: PollCallbacks) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = registry.remove(&job_id) {
            previous.task.abort();
            debug!(job_id = %job_id, "replaced running poll");
        }
        self.spawn(&mut registry, job_id, callbacks);
    }

    /// Start polling `job_id` unless a task already polls it.
    ///
    /// Returns `true` if a new task was started.
    pub fn start_polling_if_idle(&self, job_id: JobId, callbacks: PollCallbacks) -> bool {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if registry.contains_key(&job_id) {
            return false;
        }
        self.spawn(&mut registry, job_id, callbacks);
        true
    }

    fn spawn(
        &self,
        registry: &mut HashMap<JobId, ActivePoll>,
        job_id: JobId,
        callbacks: PollCallbacks,
    ) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let run = PollRun {
            job_id: job_id.clone(),
            generation,
            store: self.store.clone(),
            source: self.source.clone(),
            settings: self.settings.clone(),
            registry: self.registry.clone(),
            callbacks,
        };
        let task = tokio::spawn(run.run());
        registry.insert(job_id, ActivePoll { generation, task });
    }

    /// Cancel polling of `job_id`. Returns `false` if it was not being polled.
    pub fn stop_polling(&self, job_id: &JobId) -> bool {
        let removed = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);

        match removed {
            Some(active) => {
                active.task.abort();
                debug!(job_id = %job_id, "stopped polling");
                true
            }
            None => false,
        }
    }

    /// Cancel polling of `job_id` and wait until its task has stopped.
    ///
    /// Once this returns, the cancelled task can no longer write to the store.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        let removed = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);

        let Some(active) = removed else {
            return false;
        };
        active.task.abort();
        // Cancelled or finished, either way the task is gone.
        let _ = active.task.await;
        debug!(job_id = %job_id, "cancelled polling");
        true
    }

    pub fn is_polling(&self, job_id: &JobId) -> bool {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_id)
    }

    pub fn active_count(&self) -> usize {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Cancel every running poll.
    pub fn stop_all(&self) {
        let drained: Vec<_> = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        for (_, active) in &drained {
            active.task.abort();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "stopped all polling");
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// State of one polling task.
struct PollRun {
    job_id: JobId,
    generation: u64,
    store: Arc<TrackerStore>,
    source: Arc<dyn StatusSource>,
    settings: PollSettings,
    registry: Registry,
    callbacks: PollCallbacks,
}

enum Outcome {
    Completed(Value),
    Failed(PollError),
}

impl PollRun {
    async fn run(self) {
        let deadline = self.deadline().await;
        let mut probes: u32 = 0;
        let mut failures: u32 = 0;

        loop {
            // The first probe always goes out, later ones only before the deadline.
            let answer = if probes == 0 {
                self.source.fetch_status(&self.job_id).await
            } else {
                let request = self.source.fetch_status(&self.job_id);
                match tokio::time::timeout_at(deadline, request).await {
                    Ok(answer) => answer,
                    Err(_) => {
                        let error = self.timeout_error();
                        return self.finish(Outcome::Failed(error)).await;
                    }
                }
            };
            probes += 1;

            if !self.is_current() {
                debug!(job_id = %self.job_id, "dropping probe result of a cancelled poll");
                return;
            }

            match answer {
                Ok(remote) => {
                    failures = 0;
                    if let Some(outcome) = self.on_status(remote).await {
                        return self.finish(outcome).await;
                    }
                }
                Err(err) => {
                    failures += 1;
                    self.store
                        .record_answer(&self.job_id, None, || self.is_current())
                        .await;
                    warn!(
                        job_id = %self.job_id,
                        failures,
                        max = self.settings.max_consecutive_failures,
                        "status check failed: {err}"
                    );
                    if failures >= self.settings.max_consecutive_failures {
                        return self
                            .finish(Outcome::Failed(PollError::Exhausted {
                                attempts: failures,
                                last_error: err,
                            }))
                            .await;
                    }
                }
            }

            let delay = self.settings.backoff.delay_for_attempt(probes);
            match Instant::now().checked_add(delay) {
                Some(wake) if wake < deadline => tokio::time::sleep_until(wake).await,
                _ => {
                    tokio::time::sleep_until(deadline).await;
                    let error = self.timeout_error();
                    return self.finish(Outcome::Failed(error)).await;
                }
            }
        }
    }

    /// Handle a successful probe; `Some` when the job reached a terminal status.
    async fn on_status(&self, remote: RemoteJobStatus) -> Option<Outcome> {
        match remote.status {
            JobStatus::Completed => Some(Outcome::Completed(
                remote.response_content.unwrap_or(Value::Null),
            )),
            JobStatus::Failed => Some(Outcome::Failed(PollError::Remote(
                remote
                    .error_message
                    .unwrap_or_else(|| "job failed without a message".to_string()),
            ))),
            status => {
                debug!(job_id = %self.job_id, %status, "job still in flight");
                self.store
                    .record_answer(&self.job_id, Some(status), || self.is_current())
                    .await;
                None
            }
        }
    }

    async fn deadline(&self) -> Instant {
        let remaining = match self.settings.timeout_policy {
            TimeoutPolicy::PerSession => self.settings.timeout,
            TimeoutPolicy::SinceCreated => {
                let elapsed = match self.store.get(&self.job_id).await {
                    Some(job) => (Utc::now() - job.created_at).to_std().unwrap_or_default(),
                    None => Duration::ZERO,
                };
                self.settings.timeout.saturating_sub(elapsed)
            }
        };

        let now = Instant::now();
        now.checked_add(remaining).unwrap_or_else(|| now + FAR_FUTURE)
    }

    fn timeout_error(&self) -> PollError {
        PollError::Timeout(self.settings.timeout)
    }

    fn is_current(&self) -> bool {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.job_id)
            .is_some_and(|active| active.generation == self.generation)
    }

    /// Deregister if still current; `false` when another caller got there first.
    ///
    /// Dropping our own handle detaches the task instead of aborting it.
    fn deregister(&self) -> bool {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        match registry.get(&self.job_id) {
            Some(active) if active.generation == self.generation => {
                registry.remove(&self.job_id);
                true
            }
            _ => false,
        }
    }

    async fn finish(self, outcome: Outcome) {
        if !self.is_current() {
            return;
        }
        // Still registered here, so a resume cannot start a second poll of a
        // job that is about to disappear.
        self.store.delete(&self.job_id).await;
        if !self.deregister() {
            return;
        }

        match outcome {
            Outcome::Completed(result) => {
                info!(job_id = %self.job_id, "job completed");
                self.callbacks.complete(&self.job_id, &result);
            }
            Outcome::Failed(error) => {
                warn!(job_id = %self.job_id, "polling ended: {error}");
                self.callbacks.fail(&self.job_id, &error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use docent_core::TrackedJob;

    use super::*;
    use crate::test_support::{Recorder, ScriptedSource};

    fn job_id(id: &str) -> JobId {
        JobId::new(id).unwrap()
    }

    fn answering(status: JobStatus) -> Arc<ScriptedSource> {
        Arc::new(ScriptedSource::repeating(Ok(RemoteJobStatus::new(status))))
    }

    async fn scheduler_with(
        source: Arc<ScriptedSource>,
        settings: PollSettings,
    ) -> (PollScheduler, Arc<TrackerStore>) {
        let store = Arc::new(TrackerStore::fallback_only());
        let scheduler = PollScheduler::new(store.clone(), source, settings);
        (scheduler, store)
    }

    /// Let spawned tasks run up to their next timer.
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completed_on_first_probe_calls_on_complete_once_and_deletes() {
        let source = Arc::new(ScriptedSource::repeating(Ok(RemoteJobStatus::completed(
            serde_json::json!({"answer": 42}),
        ))));
        let (scheduler, store) = scheduler_with(source.clone(), PollSettings::default()).await;
        store.put(&TrackedJob::new(job_id("abc"))).await;

        let recorder = Recorder::new();
        scheduler.start_polling(job_id("abc"), recorder.callbacks());
        settle().await;

        assert_eq!(
            recorder.completions(),
            vec![("abc".to_string(), serde_json::json!({"answer": 42}))]
        );
        assert!(recorder.errors().is_empty());
        assert_eq!(source.probes(), 1);
        assert!(store.get(&job_id("abc")).await.is_none());
        assert!(!scheduler.is_polling(&job_id("abc")));

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(source.probes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_reports_the_message() {
        let source = Arc::new(ScriptedSource::repeating(Ok(RemoteJobStatus::failed(
            "model overloaded",
        ))));
        let (scheduler, store) = scheduler_with(source, PollSettings::default()).await;
        store.put(&TrackedJob::new(job_id("abc"))).await;

        let recorder = Recorder::new();
        scheduler.start_polling(job_id("abc"), recorder.callbacks());
        settle().await;

        assert_eq!(
            recorder.errors(),
            vec![("abc".to_string(), PollError::Remote("model overloaded".to_string()))]
        );
        assert!(store.get(&job_id("abc")).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn follows_the_backoff_schedule_and_records_attempts() {
        let source = answering(JobStatus::Processing);
        let (scheduler, store) = scheduler_with(source.clone(), PollSettings::default()).await;
        store.put(&TrackedJob::new(job_id("abc"))).await;

        scheduler.start_polling(job_id("abc"), PollCallbacks::new());
        settle().await;
        assert_eq!(source.probes(), 1);

        // Probes at 0s, 3s, 9s, 21s, 33s.
        let start = Instant::now();
        for (at_ms, expected) in [(3_001, 2), (9_001, 3), (20_500, 3), (21_001, 4), (33_001, 5)] {
            let target = start + Duration::from_millis(at_ms);
            tokio::time::advance(target - Instant::now()).await;
            settle().await;
            assert_eq!(source.probes(), expected, "at {at_ms}ms");
        }

        let stored = store.get(&job_id("abc")).await.unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(stored.poll_attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_exactly_once_and_stops_probing() {
        let source = answering(JobStatus::Processing);
        let (scheduler, store) = scheduler_with(source.clone(), PollSettings::default()).await;
        store.put(&TrackedJob::new(job_id("slow"))).await;

        let recorder = Recorder::new();
        scheduler.start_polling(job_id("slow"), recorder.callbacks());
        settle().await;

        tokio::time::advance(Duration::from_secs(299)).await;
        settle().await;
        assert!(recorder.errors().is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(
            recorder.errors(),
            vec![("slow".to_string(), PollError::Timeout(Duration::from_secs(300)))]
        );
        let probes = source.probes();

        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(source.probes(), probes);
        assert_eq!(recorder.errors().len(), 1);
        assert!(recorder.completions().is_empty());
        assert!(store.get(&job_id("slow")).await.is_none());
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ten_consecutive_failures_give_up() {
        let source = Arc::new(ScriptedSource::repeating(Err(ProbeError::Network(
            "connection refused".to_string(),
        ))));
        let (scheduler, _store) = scheduler_with(source.clone(), PollSettings::default()).await;

        let recorder = Recorder::new();
        scheduler.start_polling(job_id("offline"), recorder.callbacks());

        // 0 + 3 + 6 + 12 * 7 = 93 seconds for ten probes.
        for _ in 0..120 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }

        assert_eq!(source.probes(), 10);
        let errors = recorder.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0].1,
            PollError::Exhausted { attempts: 10, last_error: ProbeError::Network(_) }
        ));
        assert!(!scheduler.is_polling(&job_id("offline")));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_answers_reset_the_failure_count() {
        let failure = || Err(ProbeError::Parse("not json".to_string()));
        let mut script = vec![failure(); 9];
        script.push(Ok(RemoteJobStatus::new(JobStatus::Queued)));
        script.extend(vec![failure(); 9]);
        script.push(Ok(RemoteJobStatus::completed(Value::Null)));
        let source = Arc::new(ScriptedSource::script(script));
        let settings = PollSettings::default()
            .with_backoff(crate::backoff::PollBackoff::fixed(Duration::from_secs(1)));
        let (scheduler, _store) = scheduler_with(source.clone(), settings).await;

        let recorder = Recorder::new();
        scheduler.start_polling(job_id("bumpy"), recorder.callbacks());
        for _ in 0..25 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }

        assert_eq!(source.probes(), 20);
        assert!(recorder.errors().is_empty());
        assert_eq!(recorder.completions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_polling_without_a_task_is_a_noop() {
        let source = answering(JobStatus::Pending);
        let (scheduler, _store) = scheduler_with(source.clone(), PollSettings::default()).await;

        assert!(!scheduler.stop_polling(&job_id("nothing")));
        assert!(!scheduler.stop_polling(&job_id("nothing")));
        assert_eq!(source.probes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_polling_cancels_future_probes_and_callbacks() {
        let source = answering(JobStatus::Processing);
        let (scheduler, _store) = scheduler_with(source.clone(), PollSettings::default()).await;

        let recorder = Recorder::new();
        scheduler.start_polling(job_id("abc"), recorder.callbacks());
        settle().await;
        assert!(scheduler.stop_polling(&job_id("abc")));

        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(source.probes(), 1);
        assert!(recorder.errors().is_empty());
        assert!(recorder.completions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_answer_after_stop_is_ignored() {
        let source = Arc::new(
            ScriptedSource::repeating(Ok(RemoteJobStatus::completed(Value::Null)))
                .with_latency(Duration::from_secs(5)),
        );
        let (scheduler, store) = scheduler_with(source.clone(), PollSettings::default()).await;
        store.put(&TrackedJob::new(job_id("abc"))).await;

        let recorder = Recorder::new();
        scheduler.start_polling(job_id("abc"), recorder.callbacks());
        settle().await;
        scheduler.stop_polling(&job_id("abc"));

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert!(recorder.completions().is_empty());
        assert!(store.get(&job_id("abc")).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_keeps_a_single_task() {
        let source = answering(JobStatus::Processing);
        let (scheduler, _store) = scheduler_with(source.clone(), PollSettings::default()).await;

        let first = Arc::new(AtomicUsize::new(0));
        let first_errors = first.clone();
        scheduler.start_polling(
            job_id("abc"),
            PollCallbacks::new().on_error(move |_, _| {
                first_errors.fetch_add(1, Ordering::SeqCst);
            }),
        );
        settle().await;

        let recorder = Recorder::new();
        scheduler.start_polling(job_id("abc"), recorder.callbacks());
        scheduler.start_polling(job_id("abc"), recorder.callbacks());
        settle().await;
        assert_eq!(scheduler.active_count(), 1);
        assert_eq!(source.probes(), 2);

        // One task left: it probes at 3s, not three of them.
        tokio::time::advance(Duration::from_millis(3_001)).await;
        settle().await;
        assert_eq!(source.probes(), 3);

        tokio::time::advance(Duration::from_secs(400)).await;
        settle().await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn since_created_policy_counts_time_before_resume() {
        let source = answering(JobStatus::Processing);
        let (scheduler, store) = scheduler_with(source.clone(), PollSettings::default()).await;
        let old =
            TrackedJob::new(job_id("old")).created_at(Utc::now() - chrono::Duration::minutes(10));
        store.put(&old).await;

        let recorder = Recorder::new();
        scheduler.start_polling(job_id("old"), recorder.callbacks());
        settle().await;

        // One last probe, then an immediate timeout.
        assert_eq!(source.probes(), 1);
        assert_eq!(recorder.errors().len(), 1);
        assert!(matches!(recorder.errors()[0].1, PollError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_timeout_polls_instead_of_panicking() {
        for policy in [TimeoutPolicy::PerSession, TimeoutPolicy::SinceCreated] {
            let source = answering(JobStatus::Processing);
            let settings = PollSettings::default()
                .with_timeout(Duration::from_secs(u64::MAX))
                .with_timeout_policy(policy);
            let (scheduler, store) = scheduler_with(source.clone(), settings).await;
            store.put(&TrackedJob::new(job_id("patient"))).await;

            let recorder = Recorder::new();
            scheduler.start_polling(job_id("patient"), recorder.callbacks());
            settle().await;
            assert_eq!(source.probes(), 1, "{policy:?}");

            tokio::time::advance(Duration::from_millis(3_001)).await;
            settle().await;
            assert_eq!(source.probes(), 2, "{policy:?}");
            assert!(scheduler.is_polling(&job_id("patient")));
            assert!(recorder.errors().is_empty());
            scheduler.stop_all();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_requests_are_counted() {
        let source = Arc::new(ScriptedSource::script(vec![
            Err(ProbeError::Network("reset".to_string())),
            Ok(RemoteJobStatus::new(JobStatus::Queued)),
        ]));
        let (scheduler, store) = scheduler_with(source.clone(), PollSettings::default()).await;
        store.put(&TrackedJob::new(job_id("abc"))).await;

        scheduler.start_polling(job_id("abc"), PollCallbacks::new());
        settle().await;
        let stored = store.get(&job_id("abc")).await.unwrap();
        assert_eq!((stored.status, stored.poll_attempts), (JobStatus::Pending, 1));

        tokio::time::advance(Duration::from_millis(3_001)).await;
        settle().await;
        let stored = store.get(&job_id("abc")).await.unwrap();
        assert_eq!((stored.status, stored.poll_attempts), (JobStatus::Queued, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_returns_once_the_task_is_gone() {
        let source = Arc::new(
            ScriptedSource::repeating(Ok(RemoteJobStatus::new(JobStatus::Processing)))
                .with_latency(Duration::from_secs(5)),
        );
        let (scheduler, store) = scheduler_with(source.clone(), PollSettings::default()).await;
        store.put(&TrackedJob::new(job_id("abc"))).await;

        scheduler.start_polling(job_id("abc"), PollCallbacks::new());
        settle().await;
        assert!(scheduler.cancel(&job_id("abc")).await);
        assert!(!scheduler.cancel(&job_id("abc")).await);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(store.get(&job_id("abc")).await.unwrap().poll_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn per_session_policy_restarts_the_clock() {
        let source = answering(JobStatus::Processing);
        let settings = PollSettings::default().with_timeout_policy(TimeoutPolicy::PerSession);
        let (scheduler, store) = scheduler_with(source.clone(), settings).await;
        let old =
            TrackedJob::new(job_id("old")).created_at(Utc::now() - chrono::Duration::minutes(10));
        store.put(&old).await;

        let recorder = Recorder::new();
        scheduler.start_polling(job_id("old"), recorder.callbacks());
        settle().await;
        tokio::time::advance(Duration::from_millis(3_001)).await;
        settle().await;

        assert_eq!(source.probes(), 2);
        assert!(recorder.errors().is_empty());
    }
}
