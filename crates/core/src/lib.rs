//! `docent-core`: domain building blocks for background job tracking.
//!
//! This crate contains **pure domain** primitives (no persistence, no network).

pub mod error;
pub mod id;
pub mod job;

pub use error::DomainError;
pub use id::{ConversationId, JobId, LessonId};
pub use job::{JobStats, JobStatus, PendingFilter, TrackedJob};
