// src/store/tasks.rs
// Task metadata CRUD (§3 Task). Schedule/instructions/model live in the plugin.

use sqlx::{Row, SqlitePool};

use super::error::StoreError;
use super::models::{Task, TaskKind};

pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tasks (id, channel_id, name, kind, openclaw_cron_job_id, session_key, enabled, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(&task.channel_id)
        .bind(&task.name)
        .bind(task.kind.as_str())
        .bind(&task.openclaw_cron_job_id)
        .bind(&task.session_key)
        .bind(task.enabled)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(
            "SELECT id, channel_id, name, kind, openclaw_cron_job_id, session_key, enabled, created_at, updated_at
             FROM tasks WHERE id = ?",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_task(&r)).transpose()
    }

    pub async fn list_for_channel(&self, channel_id: &str) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, channel_id, name, kind, openclaw_cron_job_id, session_key, enabled, created_at, updated_at
             FROM tasks WHERE channel_id = ? ORDER BY created_at DESC",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task).collect()
    }

    pub async fn set_enabled(&self, task_id: &str, enabled: bool) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE tasks SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(now)
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn delete(&self, task_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task, StoreError> {
    let kind_str: String = row.get("kind");
    let kind = TaskKind::from_str(&kind_str)
        .ok_or_else(|| StoreError::StateConflict(format!("unknown task kind: {}", kind_str)))?;

    Ok(Task {
        id: row.get("id"),
        channel_id: row.get("channel_id"),
        name: row.get("name"),
        kind,
        openclaw_cron_job_id: row.get("openclaw_cron_job_id"),
        session_key: row.get("session_key"),
        enabled: row.get("enabled"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
