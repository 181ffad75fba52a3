// src/store/channels.rs
// Channel and Session CRUD (§3 Channel, Session).

use sqlx::SqlitePool;

use super::error::StoreError;
use super::models::{Channel, Session};

pub struct ChannelStore {
    pool: SqlitePool,
}

impl ChannelStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates a channel, plus a "General" session, unless the caller supplies
    /// an explicit first session name. Minimum one session per channel (§3).
    pub async fn create_with_default_session(
        &self,
        user_id: &str,
        name: &str,
        openclaw_agent_id: Option<&str>,
    ) -> Result<(Channel, Session), StoreError> {
        let channel_id = uuid::Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO channels (id, user_id, name, openclaw_agent_id) VALUES (?, ?, ?, ?)",
        )
        .bind(&channel_id)
        .bind(user_id)
        .bind(name)
        .bind(openclaw_agent_id)
        .execute(&mut *tx)
        .await?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let session_key = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO sessions (id, channel_id, name, session_key) VALUES (?, ?, ?, ?)",
        )
        .bind(&session_id)
        .bind(&channel_id)
        .bind("General")
        .bind(&session_key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((
            Channel {
                id: channel_id.clone(),
                user_id: user_id.to_string(),
                name: name.to_string(),
                openclaw_agent_id: openclaw_agent_id.map(str::to_string),
            },
            Session {
                id: session_id,
                channel_id,
                name: "General".to_string(),
                session_key,
            },
        ))
    }

    pub async fn get_or_create_general(&self, user_id: &str) -> Result<Channel, StoreError> {
        if let Some(existing) = self.find_by_name(user_id, "General").await? {
            return Ok(existing);
        }
        let (channel, _session) = self.create_with_default_session(user_id, "General", None).await?;
        Ok(channel)
    }

    async fn find_by_name(&self, user_id: &str, name: &str) -> Result<Option<Channel>, StoreError> {
        let row = sqlx::query_as::<_, Channel>(
            "SELECT id, user_id, name, openclaw_agent_id FROM channels WHERE user_id = ? AND name = ?",
        )
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Channel>, StoreError> {
        let rows = sqlx::query_as::<_, Channel>(
            "SELECT id, user_id, name, openclaw_agent_id FROM channels WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Adds an additional session to an existing channel (§3: a channel may
    /// own more than one session; `create_with_default_session` only covers
    /// the first one).
    pub async fn add_session(&self, channel_id: &str, name: &str) -> Result<Session, StoreError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let session_key = uuid::Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO sessions (id, channel_id, name, session_key) VALUES (?, ?, ?, ?)")
            .bind(&session_id)
            .bind(channel_id)
            .bind(name)
            .bind(&session_key)
            .execute(&self.pool)
            .await?;

        Ok(Session {
            id: session_id,
            channel_id: channel_id.to_string(),
            name: name.to_string(),
            session_key,
        })
    }

    pub async fn list_sessions(&self, channel_id: &str) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query_as::<_, Session>(
            "SELECT id, channel_id, name, session_key FROM sessions WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Deleting the last session in a channel is forbidden (§3).
    pub async fn delete_session(&self, channel_id: &str, session_id: &str) -> Result<(), StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE channel_id = ?")
            .bind(channel_id)
            .fetch_one(&self.pool)
            .await?;

        if count <= 1 {
            return Err(StoreError::StateConflict(
                "cannot delete the last session in a channel".to_string(),
            ));
        }

        sqlx::query("DELETE FROM sessions WHERE id = ? AND channel_id = ?")
            .bind(session_id)
            .bind(channel_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn resolve_session_key(&self, session_key: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, Session>(
            "SELECT id, channel_id, name, session_key FROM sessions WHERE session_key = ?",
        )
        .bind(session_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
