//! Tracked job record and its status lifecycle.

use core::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{ConversationId, JobId, LessonId};

/// Status of a backend job as last observed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted by the backend, not started yet
    Pending,
    /// Being worked on
    Processing,
    /// Waiting for a worker slot
    Queued,
    /// Finished with a result
    Completed,
    /// Finished with an error
    Failed,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Queued,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Statuses that keep a job under polling.
    pub const IN_FLIGHT: [JobStatus; 3] =
        [JobStatus::Pending, JobStatus::Processing, JobStatus::Queued];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Queued => "queued",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// `true` while the job still awaits resolution.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Processing | JobStatus::Queued
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::invalid_status(s))
    }
}

/// A job the client is waiting on.
///
/// Serialized with camelCase keys and epoch-millisecond timestamps, the same
/// shape the browser client persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedJob {
    pub job_id: JobId,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub lesson_id: Option<LessonId>,
    pub status: JobStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Status requests sent for this job, answered or not.
    #[serde(default)]
    pub poll_attempts: u32,
}

impl TrackedJob {
    /// Create a pending job stamped with the current time.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            conversation_id: None,
            lesson_id: None,
            status: JobStatus::Pending,
            created_at: now_millis(),
            updated_at: None,
            poll_attempts: 0,
        }
    }

    pub fn with_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_lesson(mut self, lesson_id: LessonId) -> Self {
        self.lesson_id = Some(lesson_id);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    /// Override the creation time (restoring a record, tests).
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at.trunc_subsecs(3);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    /// Set a new status and stamp `updated_at`.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Some(now_millis());
    }

    /// Record a probe that reported `status`.
    pub fn record_poll(&mut self, status: JobStatus) {
        self.set_status(status);
        self.record_attempt();
    }

    /// Record a status request that got no usable answer; the status stays as is.
    pub fn record_attempt(&mut self) {
        self.poll_attempts = self.poll_attempts.saturating_add(1);
    }
}

/// Current time truncated to the millisecond precision the store keeps.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Optional grouping keys used to select pending jobs.
///
/// Keys that are present must all match (AND semantics); absent keys match
/// anything, including jobs without that key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingFilter {
    pub conversation_id: Option<ConversationId>,
    pub lesson_id: Option<LessonId>,
}

impl PendingFilter {
    /// Filter matching every pending job.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn lesson(mut self, lesson_id: LessonId) -> Self {
        self.lesson_id = Some(lesson_id);
        self
    }

    /// `true` if `job` is pending and carries every key present in the filter.
    pub fn matches(&self, job: &TrackedJob) -> bool {
        job.is_pending()
            && self
                .conversation_id
                .as_ref()
                .is_none_or(|c| job.conversation_id.as_ref() == Some(c))
            && self
                .lesson_id
                .as_ref()
                .is_none_or(|l| job.lesson_id.as_ref() == Some(l))
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub queued: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus) {
        self.add(status, 1);
    }

    /// Count `n` jobs in `status`.
    pub fn add(&mut self, status: JobStatus, n: usize) {
        let slot = match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Processing => &mut self.processing,
            JobStatus::Queued => &mut self.queued,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
        };
        *slot += n;
    }

    /// Jobs still awaiting resolution.
    pub fn in_flight(&self) -> usize {
        self.pending + self.processing + self.queued
    }
}
