//! Durable job store persisted in SQLite.
//!
//! One row per job in `tracked_jobs`, keyed by `job_id`, with secondary
//! indexes on the grouping keys and the status. The schema version lives in
//! `PRAGMA user_version`.

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use docent_core::{ConversationId, JobId, JobStats, JobStatus, LessonId, PendingFilter, TrackedJob};

use super::{JobStore, StoreError};

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS tracked_jobs (
        job_id          TEXT PRIMARY KEY,
        conversation_id TEXT NULL,
        lesson_id       TEXT NULL,
        status          TEXT NOT NULL,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NULL,
        poll_attempts   INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tracked_jobs_conversation ON tracked_jobs (conversation_id)",
    "CREATE INDEX IF NOT EXISTS idx_tracked_jobs_lesson ON tracked_jobs (lesson_id)",
    "CREATE INDEX IF NOT EXISTS idx_tracked_jobs_status ON tracked_jobs (status)",
];

/// SQLite-backed job store.
///
/// This struct is cheap to clone and is safe to share across threads.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (or create) the database file at `path` and migrate it.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create job store directory at {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to create SQLite pool for job store at {:?}", path))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open a private in-memory database (single connection, never recycled).
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory SQLite URL")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to open in-memory SQLite job store")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Close the pool; later operations fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .context("failed to read job store schema version")?;

        if version > SCHEMA_VERSION {
            anyhow::bail!(
                "job store schema version {} is newer than supported version {}",
                version,
                SCHEMA_VERSION
            );
        }

        if version < 1 {
            let mut tx = self
                .pool
                .begin()
                .await
                .context("failed to begin job store migration")?;

            for statement in SCHEMA_V1 {
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .context("failed to create tracked_jobs schema")?;
            }

            sqlx::query("PRAGMA user_version = 1")
                .execute(&mut *tx)
                .await
                .context("failed to record job store schema version")?;

            tx.commit()
                .await
                .context("failed to commit job store migration")?;

            tracing::info!(version = SCHEMA_VERSION, "job store schema created");
        }

        Ok(())
    }

    async fn upsert(&self, job: &TrackedJob) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tracked_jobs (
                job_id,
                conversation_id,
                lesson_id,
                status,
                created_at,
                updated_at,
                poll_attempts
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (job_id) DO UPDATE SET
                conversation_id = excluded.conversation_id,
                lesson_id       = excluded.lesson_id,
                status          = excluded.status,
                created_at      = excluded.created_at,
                updated_at      = excluded.updated_at,
                poll_attempts   = excluded.poll_attempts
            "#,
        )
        .bind(job.job_id.as_str())
        .bind(job.conversation_id.as_ref().map(|c| c.as_str()))
        .bind(job.lesson_id.as_ref().map(|l| l.as_str()))
        .bind(job.status.as_str())
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.map(|t| t.timestamp_millis()))
        .bind(i64::from(job.poll_attempts))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert job {}", job.job_id))?;

        Ok(())
    }

    async fn fetch(&self, job_id: &JobId) -> anyhow::Result<Option<SqliteRow>> {
        sqlx::query(
            r#"
            SELECT job_id, conversation_id, lesson_id, status, created_at, updated_at, poll_attempts
            FROM tracked_jobs
            WHERE job_id = ?1
            "#,
        )
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load job {}", job_id))
    }

    async fn fetch_pending(&self, filter: &PendingFilter) -> anyhow::Result<Vec<SqliteRow>> {
        sqlx::query(
            r#"
            SELECT job_id, conversation_id, lesson_id, status, created_at, updated_at, poll_attempts
            FROM tracked_jobs
            WHERE status IN ('pending', 'processing', 'queued')
              AND (?1 IS NULL OR conversation_id = ?1)
              AND (?2 IS NULL OR lesson_id = ?2)
            ORDER BY created_at ASC, job_id ASC
            "#,
        )
        .bind(filter.conversation_id.as_ref().map(|c| c.as_str()))
        .bind(filter.lesson_id.as_ref().map(|l| l.as_str()))
        .fetch_all(&self.pool)
        .await
        .context("failed to list pending jobs")
    }

    async fn remove(&self, job_id: &JobId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM tracked_jobs WHERE job_id = ?1")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete job {}", job_id))?;
        Ok(())
    }

    async fn remove_terminal_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tracked_jobs
            WHERE status IN ('completed', 'failed')
              AND COALESCE(updated_at, created_at) <= ?1
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("failed to purge terminal jobs")?;

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self) -> anyhow::Result<JobStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM tracked_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .context("failed to count jobs by status")?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let status = JobStatus::from_str(&status)
                .with_context(|| format!("unknown status '{}' in tracked_jobs", status))?;
            let n = usize::try_from(n).context("negative job count in tracked_jobs")?;
            stats.add(status, n);
        }
        Ok(stats)
    }
}

fn storage(err: anyhow::Error) -> StoreError {
    StoreError::Storage(format!("{err:#}"))
}

fn corrupt(err: anyhow::Error) -> StoreError {
    StoreError::Corrupt(format!("{err:#}"))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn put(&self, job: &TrackedJob) -> Result<(), StoreError> {
        self.upsert(job).await.map_err(storage)
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<TrackedJob>, StoreError> {
        match self.fetch(job_id).await.map_err(storage)? {
            Some(row) => row_to_job(&row).map(Some).map_err(corrupt),
            None => Ok(None),
        }
    }

    async fn query_pending(&self, filter: &PendingFilter) -> Result<Vec<TrackedJob>, StoreError> {
        let rows = self.fetch_pending(filter).await.map_err(storage)?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            match row_to_job(&row) {
                Ok(job) => jobs.push(job),
                Err(err) => tracing::warn!("skipping unreadable job row: {err:#}"),
            }
        }
        Ok(jobs)
    }

    async fn delete(&self, job_id: &JobId) -> Result<(), StoreError> {
        self.remove(job_id).await.map_err(storage)
    }

    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.remove_terminal_before(cutoff).await.map_err(storage)
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        self.count_by_status().await.map_err(storage)
    }
}

/// Map a database row into a `TrackedJob`.
fn row_to_job(row: &SqliteRow) -> anyhow::Result<TrackedJob> {
    let job_id: String = row.try_get("job_id")?;
    let job_id = JobId::new(job_id).context("invalid job_id in tracked_jobs")?;

    let conversation_id = row
        .try_get::<Option<String>, _>("conversation_id")?
        .map(ConversationId::new)
        .transpose()
        .context("invalid conversation_id in tracked_jobs")?;

    let lesson_id = row
        .try_get::<Option<String>, _>("lesson_id")?
        .map(LessonId::new)
        .transpose()
        .context("invalid lesson_id in tracked_jobs")?;

    let status: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status)
        .with_context(|| format!("unknown job status '{}' in tracked_jobs", status))?;

    let created_at: i64 = row.try_get("created_at")?;
    let created_at = DateTime::from_timestamp_millis(created_at)
        .context("created_at out of range in tracked_jobs")?;

    let updated_at = row
        .try_get::<Option<i64>, _>("updated_at")?
        .map(|ms| {
            DateTime::from_timestamp_millis(ms).context("updated_at out of range in tracked_jobs")
        })
        .transpose()?;

    let poll_attempts: i64 = row.try_get("poll_attempts")?;
    let poll_attempts =
        u32::try_from(poll_attempts).context("poll_attempts out of range in tracked_jobs")?;

    Ok(TrackedJob {
        job_id,
        conversation_id,
        lesson_id,
        status,
        created_at,
        updated_at,
        poll_attempts,
    })
}
