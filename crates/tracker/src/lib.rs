//! `docent-tracker`
//!
//! **Responsibility:** keep track of slow backend jobs across restarts.
//!
//! This crate provides:
//! - A job store that persists in SQLite and degrades to memory
//! - A per-job polling scheduler with increasing intervals and a hard timeout
//! - Resume of pending jobs when the host returns to the foreground
//!
//! The backend stays the authority on job state; the tracker only mirrors it
//! long enough to deliver one outcome per job.

pub mod backoff;
pub mod config;
pub mod error;
pub mod resume;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod tracker;

#[cfg(test)]
mod test_support;

pub use backoff::{BackoffStrategy, PollBackoff};
pub use config::{PollSettings, StoreLocation, TimeoutPolicy, TrackerConfig};
pub use error::{ConfigError, TrackerError};
pub use resume::{LifecycleSignal, ResumeWorker};
pub use scheduler::{PollCallbacks, PollError, PollScheduler};
pub use status::{HttpStatusClient, ProbeError, RemoteJobStatus, StatusSource};
pub use store::{InMemoryJobStore, JobStore, SqliteJobStore, StoreError, StoreMode, TrackerStore};
pub use tracker::JobTracker;

pub use docent_core::{
    ConversationId, JobId, JobStats, JobStatus, LessonId, PendingFilter, TrackedJob,
};
