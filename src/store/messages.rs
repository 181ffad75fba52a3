// src/store/messages.rs
// Durable chat log (§4.1, §8 invariant 6).

use std::collections::HashMap;

use sqlx::{Row, SqlitePool};

use super::error::StoreError;
use super::models::{Message, Sender};

pub struct MessageStore {
    pool: SqlitePool,
}

/// Result of a session history read: messages plus a summary of thread reply
/// counts for the base session (§3 Message invariant).
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub reply_counts: HashMap<String, i64>,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends a message. If `thread_id` is set, the message is stored under
    /// the synthetic session key `{base}:thread:{threadId}` and the base
    /// session's reply count for that thread root is incremented atomically.
    pub async fn append(&self, msg: &Message) -> Result<(), StoreError> {
        let storage_key = match &msg.thread_id {
            Some(thread_id) => format!("{}:thread:{}", base_key(&msg.session_key), thread_id),
            None => msg.session_key.clone(),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO messages (id, session_key, sender, text, media_url, a2ui, thread_id, encrypted, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&storage_key)
        .bind(msg.sender.as_str())
        .bind(&msg.text)
        .bind(&msg.media_url)
        .bind(&msg.a2ui)
        .bind(&msg.thread_id)
        .bind(msg.encrypted)
        .bind(msg.timestamp)
        .execute(&mut *tx)
        .await?;

        if let Some(thread_id) = &msg.thread_id {
            sqlx::query(
                "INSERT INTO reply_counts (session_key, message_id, count)
                 VALUES (?, ?, 1)
                 ON CONFLICT(session_key, message_id)
                 DO UPDATE SET count = count + 1",
            )
            .bind(base_key(&msg.session_key))
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Ordered ascending by `timestamp`, ties broken by `id` lexicographically.
    /// `limit` truncates the oldest entries when exceeded. For a base session
    /// (`thread_id == None`) the page also carries `replyCounts` (§4.1).
    pub async fn list(
        &self,
        session_key: &str,
        thread_id: Option<&str>,
        limit: i64,
    ) -> Result<MessagePage, StoreError> {
        let storage_key = match thread_id {
            Some(t) => format!("{}:thread:{}", session_key, t),
            None => session_key.to_string(),
        };

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE session_key = ?")
            .bind(&storage_key)
            .fetch_one(&self.pool)
            .await?;

        let offset = (total - limit).max(0);

        let rows = sqlx::query(
            "SELECT id, session_key, sender, text, media_url, a2ui, thread_id, encrypted, timestamp
             FROM messages WHERE session_key = ?
             ORDER BY timestamp ASC, id ASC
             LIMIT ? OFFSET ?",
        )
        .bind(&storage_key)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let messages = rows
            .iter()
            .map(|r| row_to_message(r))
            .collect::<Result<Vec<_>, _>>()?;

        let reply_counts = if thread_id.is_none() {
            let reply_rows = sqlx::query(
                "SELECT message_id, count FROM reply_counts WHERE session_key = ?",
            )
            .bind(session_key)
            .fetch_all(&self.pool)
            .await?;

            reply_rows
                .iter()
                .map(|r| (r.get::<String, _>("message_id"), r.get::<i64, _>("count")))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(MessagePage { messages, reply_counts })
    }

    pub async fn exists(&self, session_key: &str, message_id: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE session_key = ? AND id = ?",
        )
        .bind(session_key)
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }
}

fn base_key(session_key: &str) -> &str {
    match session_key.find(":thread:") {
        Some(idx) => &session_key[..idx],
        None => session_key,
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
    let sender_str: String = row.get("sender");
    let sender = Sender::from_str(&sender_str)
        .ok_or_else(|| StoreError::StateConflict(format!("unknown sender: {}", sender_str)))?;

    Ok(Message {
        id: row.get("id"),
        session_key: row.get("session_key"),
        sender,
        text: row.get("text"),
        media_url: row.get("media_url"),
        a2ui: row.get("a2ui"),
        thread_id: row.get("thread_id"),
        encrypted: row.get("encrypted"),
        timestamp: row.get("timestamp"),
    })
}
