// src/store/jobs.rs
// Background-task job lifecycle persistence (§3 Job, §4.1, §8 invariant 4).

use sqlx::{Row, SqlitePool};

use super::error::StoreError;
use super::models::{Job, JobStatus};

pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates on first `running`, replaces on terminal. Fails with
    /// `StateConflict` if a terminal status would be overwritten with a
    /// non-terminal one, or if `summary` would shrink on a terminal row.
    pub async fn upsert(&self, job: &Job) -> Result<(), StoreError> {
        let existing = self.get(&job.id).await?;

        if let Some(existing) = &existing {
            if existing.status.is_terminal() && !job.status.is_terminal() {
                return Err(StoreError::StateConflict(format!(
                    "job {} is already terminal ({}); refusing to revert to running",
                    job.id,
                    existing.status.as_str()
                )));
            }
            if existing.status.is_terminal() && job.summary.len() < existing.summary.len() {
                return Err(StoreError::StateConflict(format!(
                    "job {} terminal summary would shrink",
                    job.id
                )));
            }
        }

        sqlx::query(
            "INSERT INTO jobs (id, task_id, user_id, session_key, status, started_at, finished_at, duration_ms, summary)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                finished_at = excluded.finished_at,
                duration_ms = excluded.duration_ms,
                summary = excluded.summary",
        )
        .bind(&job.id)
        .bind(&job.task_id)
        .bind(&job.user_id)
        .bind(&job.session_key)
        .bind(job.status.as_str())
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.duration_ms)
        .bind(&job.summary)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(
            "SELECT id, task_id, user_id, session_key, status, started_at, finished_at, duration_ms, summary
             FROM jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_job(&r)).transpose()
    }

    /// Replaces `summary` only; rejected by the caller (JobRegistry) once the
    /// job is terminal, per §4.5.
    pub async fn append_output(&self, job_id: &str, summary: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET summary = ? WHERE id = ? AND status = 'running'")
            .bind(summary)
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Ordered by `startedAt` descending.
    pub async fn list_by_task(&self, task_id: &str, limit: i64) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, task_id, user_id, session_key, status, started_at, finished_at, duration_ms, summary
             FROM jobs WHERE task_id = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, StoreError> {
    let status_str: String = row.get("status");
    let status = JobStatus::from_str(&status_str)
        .ok_or_else(|| StoreError::StateConflict(format!("unknown job status: {}", status_str)))?;

    Ok(Job {
        id: row.get("id"),
        task_id: row.get("task_id"),
        user_id: row.get("user_id"),
        session_key: row.get("session_key"),
        status,
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        duration_ms: row.get("duration_ms"),
        summary: row.get("summary"),
    })
}
