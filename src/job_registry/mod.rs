// src/job_registry/mod.rs
// Background-task job lifecycle (§4.5). An in-memory state machine that
// persists every `job.update`/`job.output` while the job is running — so a
// crash mid-job loses at most the last chunk, not the whole in-flight
// summary — and stops writing once terminal, with a "prefer the longer
// summary" reconciliation rule so in-flight streaming output is never
// clobbered by a stale Store read.

use std::collections::HashMap;

use tracing::warn;

use crate::store::models::{Job, JobStatus};
use crate::store::{Store, StoreError};

#[derive(Default)]
pub struct JobRegistry {
    /// In-memory mirror of each job's current state, used so `job.output`
    /// chunks can grow `summary` beyond what's persisted without a Store
    /// round trip per chunk.
    jobs: HashMap<String, Job>,
}

pub enum UpdateOutcome {
    Applied,
    /// The job is already terminal; the update was dropped and logged.
    DroppedTerminal,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `job.update`. Creates on first `running`; subsequent `running`
    /// updates are idempotent. Any terminal status freezes the job.
    pub async fn on_job_update(&mut self, store: &Store, mut job: Job) -> Result<UpdateOutcome, StoreError> {
        if let Some(existing) = self.jobs.get(&job.id) {
            if existing.status.is_terminal() {
                warn!(job_id = %job.id, "job.update for already-terminal job, dropping");
                return Ok(UpdateOutcome::DroppedTerminal);
            }
            // Preserve in-memory summary growth from job.output chunks when
            // the incoming update doesn't carry a newer one.
            if job.summary.len() < existing.summary.len() {
                job.summary = existing.summary.clone();
            }
        }

        store.jobs.upsert(&job).await?;
        self.jobs.insert(job.id.clone(), job);
        Ok(UpdateOutcome::Applied)
    }

    /// `job.output`. Replaces the in-memory `summary` (cumulative, not
    /// incremental). Persisted to the Store only while `running`; dropped
    /// once terminal.
    pub async fn on_job_output(&mut self, store: &Store, job_id: &str, text: String) -> Result<UpdateOutcome, StoreError> {
        let Some(job) = self.jobs.get_mut(job_id) else {
            warn!(job_id, "job.output for unknown job, dropping");
            return Ok(UpdateOutcome::DroppedTerminal);
        };

        if job.status.is_terminal() {
            warn!(job_id, "job.output for already-terminal job, dropping");
            return Ok(UpdateOutcome::DroppedTerminal);
        }

        job.summary = text;
        store.jobs.append_output(job_id, &job.summary).await?;
        Ok(UpdateOutcome::Applied)
    }

    /// Reconciles the in-memory view with a fresh Store read, preferring
    /// whichever `summary` is longer (§4.5).
    pub fn reconcile(&mut self, job: Job) {
        match self.jobs.get_mut(&job.id) {
            Some(existing) if existing.summary.len() >= job.summary.len() => {
                existing.status = job.status;
                existing.finished_at = job.finished_at;
                existing.duration_ms = job.duration_ms;
            }
            _ => {
                self.jobs.insert(job.id.clone(), job);
            }
        }
    }

    pub fn get(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    pub fn status_of(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.get(job_id).map(|j| j.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> Store {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        sqlx::query("INSERT INTO users (id, password_hash, created_at) VALUES ('u1', 'x', 0)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO channels (id, user_id, name) VALUES ('c1', 'u1', 'General')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO tasks (id, channel_id, name, kind, enabled, created_at, updated_at) VALUES ('t1', 'c1', 'nightly', 'background', 1, 0, 0)")
            .execute(&pool)
            .await
            .unwrap();

        Store::from_pool(pool, std::path::PathBuf::from("/tmp"), crate::config::auth::MediaConfig {
            signing_secret: "test-secret-test-secret".to_string(),
            default_expiry_secs: 3600,
            bucket_prefix: "media".to_string(),
        })
    }

    fn running_job(id: &str, summary: &str) -> Job {
        Job {
            id: id.to_string(),
            task_id: "t1".to_string(),
            user_id: "u1".to_string(),
            session_key: "c1:General".to_string(),
            status: JobStatus::Running,
            started_at: 0,
            finished_at: None,
            duration_ms: None,
            summary: summary.to_string(),
        }
    }

    #[tokio::test]
    async fn terminal_status_freezes_the_job() {
        let store = test_store().await;
        let mut jobs = JobRegistry::new();

        jobs.on_job_update(&store, running_job("j1", "")).await.unwrap();

        let mut done = running_job("j1", "finished");
        done.status = JobStatus::Ok;
        done.finished_at = Some(100);
        assert!(matches!(jobs.on_job_update(&store, done).await.unwrap(), UpdateOutcome::Applied));

        let outcome = jobs.on_job_update(&store, running_job("j1", "resurrected?")).await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::DroppedTerminal));
        assert_eq!(jobs.status_of("j1"), Some(JobStatus::Ok));
    }

    #[tokio::test]
    async fn update_does_not_shrink_summary_grown_by_output_chunks() {
        let store = test_store().await;
        let mut jobs = JobRegistry::new();

        jobs.on_job_update(&store, running_job("j1", "")).await.unwrap();
        jobs.on_job_output(&store, "j1", "a long streamed summary".to_string()).await.unwrap();

        jobs.on_job_update(&store, running_job("j1", "short")).await.unwrap();
        assert_eq!(jobs.get("j1").unwrap().summary, "a long streamed summary");
    }

    #[tokio::test]
    async fn output_after_terminal_is_dropped() {
        let store = test_store().await;
        let mut jobs = JobRegistry::new();

        jobs.on_job_update(&store, running_job("j1", "")).await.unwrap();
        let mut done = running_job("j1", "done");
        done.status = JobStatus::Error;
        jobs.on_job_update(&store, done).await.unwrap();

        let outcome = jobs.on_job_output(&store, "j1", "late output".to_string()).await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::DroppedTerminal));
        assert_eq!(jobs.get("j1").unwrap().summary, "done");
    }

    #[tokio::test]
    async fn output_for_unknown_job_is_dropped() {
        let store = test_store().await;
        let mut jobs = JobRegistry::new();

        let outcome = jobs.on_job_output(&store, "ghost", "x".to_string()).await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::DroppedTerminal));
    }

    #[test]
    fn reconcile_prefers_the_longer_summary() {
        let mut jobs = JobRegistry::new();
        jobs.reconcile(running_job("j1", "a long in-memory summary"));

        let mut stale = running_job("j1", "short");
        stale.status = JobStatus::Ok;
        jobs.reconcile(stale);

        assert_eq!(jobs.get("j1").unwrap().summary, "a long in-memory summary");
        assert_eq!(jobs.status_of("j1"), Some(JobStatus::Ok));
    }
}
