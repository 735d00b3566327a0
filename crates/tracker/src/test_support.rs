//! Fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use docent_core::{JobId, JobStats, PendingFilter, TrackedJob};

use crate::scheduler::{PollCallbacks, PollError};
use crate::status::{ProbeError, RemoteJobStatus, StatusSource};
use crate::store::{InMemoryJobStore, JobStore, StoreError};

type Answer = Result<RemoteJobStatus, ProbeError>;

/// Status source replaying a script; the last answer repeats forever.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Answer>>,
    last: Mutex<Answer>,
    latency: Duration,
    probes: AtomicUsize,
    probed_ids: Mutex<Vec<JobId>>,
}

impl ScriptedSource {
    pub fn repeating(answer: Answer) -> Self {
        Self::script(vec![answer])
    }

    pub fn script(answers: Vec<Answer>) -> Self {
        let mut script: VecDeque<_> = answers.into();
        let last = script
            .back()
            .cloned()
            .unwrap_or_else(|| Err(ProbeError::Network("empty script".to_string())));
        if script.len() == 1 {
            script.clear();
        }
        Self {
            script: Mutex::new(script),
            last: Mutex::new(last),
            latency: Duration::ZERO,
            probes: AtomicUsize::new(0),
            probed_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn probed_ids(&self) -> Vec<JobId> {
        self.probed_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusSource for ScriptedSource {
    async fn fetch_status(&self, job_id: &JobId) -> Result<RemoteJobStatus, ProbeError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.probed_ids.lock().unwrap().push(job_id.clone());

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.last.lock().unwrap().clone())
    }
}

/// Durable store stand-in that can be switched into failing.
pub struct FlakyStore {
    inner: InMemoryJobStore,
    failing: AtomicBool,
    delete_latency: Duration,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryJobStore::new(),
            failing: AtomicBool::new(false),
            delete_latency: Duration::ZERO,
        }
    }

    pub fn with_delete_latency(mut self, latency: Duration) -> Self {
        self.delete_latency = latency;
        self
    }

    pub fn fail_from_now(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Storage("disk I/O error".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn put(&self, job: &TrackedJob) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(job).await
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<TrackedJob>, StoreError> {
        self.check()?;
        self.inner.get(job_id).await
    }

    async fn query_pending(&self, filter: &PendingFilter) -> Result<Vec<TrackedJob>, StoreError> {
        self.check()?;
        self.inner.query_pending(filter).await
    }

    async fn delete(&self, job_id: &JobId) -> Result<(), StoreError> {
        if !self.delete_latency.is_zero() {
            tokio::time::sleep(self.delete_latency).await;
        }
        self.check()?;
        self.inner.delete(job_id).await
    }

    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.purge_terminal(cutoff).await
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        self.check()?;
        self.inner.stats().await
    }
}

/// Collects callback invocations.
#[derive(Clone, Default)]
pub struct Recorder {
    completions: Arc<Mutex<Vec<(String, Value)>>>,
    errors: Arc<Mutex<Vec<(String, PollError)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callbacks(&self) -> PollCallbacks {
        let completions = self.completions.clone();
        let errors = self.errors.clone();
        PollCallbacks::new()
            .on_complete(move |id, result| {
                completions.lock().unwrap().push((id.to_string(), result.clone()));
            })
            .on_error(move |id, error| {
                errors.lock().unwrap().push((id.to_string(), error.clone()));
            })
    }

    pub fn completions(&self) -> Vec<(String, Value)> {
        self.completions.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(String, PollError)> {
        self.errors.lock().unwrap().clone()
    }
}
