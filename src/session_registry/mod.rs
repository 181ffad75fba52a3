// src/session_registry/mod.rs
// In-process (userId, sessionKey) -> SessionView index with a bounded
// recent-window cache over the durable message log (§4.3).
//
// Lives entirely on the Hub's single-writer executor, so no internal
// synchronization is needed — grounded on the teacher's `HashMap`-backed
// in-memory indexes (`src/session/manager.rs`) but without its `RwLock`,
// since this index is never touched from outside the hub task.

use std::collections::{HashMap, VecDeque};

use crate::store::models::Message;
use crate::store::{Store, StoreError};

/// A session's fast in-memory tail plus its authoritative-but-cached reply
/// counts. Older messages beyond the window are served from the Store.
#[derive(Debug, Default)]
pub struct SessionView {
    recent: VecDeque<Message>,
    reply_counts: HashMap<String, i64>,
}

impl SessionView {
    fn push(&mut self, msg: Message, window: usize) {
        self.recent.push_back(msg);
        while self.recent.len() > window {
            self.recent.pop_front();
        }
    }

    pub fn recent_messages(&self) -> impl Iterator<Item = &Message> {
        self.recent.iter()
    }

    pub fn reply_count(&self, message_id: &str) -> i64 {
        self.reply_counts.get(message_id).copied().unwrap_or(0)
    }
}

pub struct SessionRegistry {
    user_id: String,
    window: usize,
    views: HashMap<String, SessionView>,
}

impl SessionRegistry {
    pub fn new(user_id: impl Into<String>, window: usize) -> Self {
        Self {
            user_id: user_id.into(),
            window,
            views: HashMap::new(),
        }
    }

    /// Persists `msg` through the Store and updates the in-memory tail for
    /// its session. If `msg.thread_id` is set, the base session's reply
    /// count for that thread root is bumped to match the Store (§4.3).
    pub async fn append(&mut self, store: &Store, msg: Message) -> Result<(), StoreError> {
        store.messages.append(&msg).await?;

        let storage_key = match &msg.thread_id {
            Some(thread_id) => format!("{}:thread:{}", msg.session_key, thread_id),
            None => msg.session_key.clone(),
        };

        if let Some(thread_id) = msg.thread_id.clone() {
            let base = self.views.entry(msg.session_key.clone()).or_default();
            *base.reply_counts.entry(thread_id).or_insert(0) += 1;
        }

        let view = self.views.entry(storage_key).or_default();
        view.push(msg, self.window);
        Ok(())
    }

    /// Serves the most recent `limit` messages for `sessionKey`/`threadId`
    /// from the in-memory tail when it covers the whole request, falling
    /// back to the Store otherwise.
    pub async fn list(
        &mut self,
        store: &Store,
        session_key: &str,
        thread_id: Option<&str>,
        limit: i64,
    ) -> Result<(Vec<Message>, HashMap<String, i64>), StoreError> {
        let storage_key = match thread_id {
            Some(t) => format!("{session_key}:thread:{t}"),
            None => session_key.to_string(),
        };

        let cached = self.views.get(&storage_key);
        let cache_covers = cached.map(|v| v.recent.len() as i64 >= limit).unwrap_or(false);

        if cache_covers {
            let view = cached.unwrap();
            let messages: Vec<Message> = view
                .recent
                .iter()
                .rev()
                .take(limit as usize)
                .rev()
                .cloned()
                .collect();
            let reply_counts = if thread_id.is_none() {
                self.views
                    .get(session_key)
                    .map(|v| v.reply_counts.clone())
                    .unwrap_or_default()
            } else {
                HashMap::new()
            };
            return Ok((messages, reply_counts));
        }

        let page = store.messages.list(session_key, thread_id, limit).await?;

        // Backfill the cache so subsequent reads hit memory.
        let view = self.views.entry(storage_key).or_default();
        view.recent = page.messages.iter().cloned().collect();
        while view.recent.len() > self.window {
            view.recent.pop_front();
        }
        if thread_id.is_none() {
            let base = self.views.entry(session_key.to_string()).or_default();
            for (k, v) in &page.reply_counts {
                base.reply_counts.insert(k.clone(), *v);
            }
        }

        Ok((page.messages, page.reply_counts))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::auth::MediaConfig;
    use crate::store::models::Sender;
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
        sqlx::query("INSERT INTO sessions (id, channel_id, name, session_key) VALUES ('s1', 'c1', 'General', 'c1:General')")
            .execute(&pool)
            .await
            .unwrap();

        Store::from_pool(
            pool,
            std::path::PathBuf::from("/tmp"),
            MediaConfig {
                signing_secret: "test-secret-test-secret".to_string(),
                default_expiry_secs: 3600,
                bucket_prefix: "media".to_string(),
            },
        )
    }

    fn msg(id: &str, ts: i64, thread_id: Option<&str>) -> Message {
        Message {
            id: id.to_string(),
            session_key: "c1:General".to_string(),
            sender: Sender::User,
            text: format!("message {id}"),
            media_url: None,
            a2ui: None,
            thread_id: thread_id.map(str::to_string),
            encrypted: false,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn recent_window_evicts_beyond_its_capacity() {
        let store = test_store().await;
        let mut registry = SessionRegistry::new("u1", 2);

        registry.append(&store, msg("m1", 1, None)).await.unwrap();
        registry.append(&store, msg("m2", 2, None)).await.unwrap();
        registry.append(&store, msg("m3", 3, None)).await.unwrap();

        let (messages, _) = registry.list(&store, "c1:General", None, 2).await.unwrap();
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn thread_replies_bump_the_base_sessions_reply_count() {
        let store = test_store().await;
        let mut registry = SessionRegistry::new("u1", 10);

        registry.append(&store, msg("root", 1, None)).await.unwrap();
        registry.append(&store, msg("reply1", 2, Some("root"))).await.unwrap();
        registry.append(&store, msg("reply2", 3, Some("root"))).await.unwrap();

        let (_, reply_counts) = registry.list(&store, "c1:General", None, 10).await.unwrap();
        assert_eq!(reply_counts.get("root"), Some(&2));
    }

    #[tokio::test]
    async fn list_falls_back_to_the_store_when_the_cache_is_too_small() {
        let store = test_store().await;
        let mut registry = SessionRegistry::new("u1", 1);

        registry.append(&store, msg("m1", 1, None)).await.unwrap();
        registry.append(&store, msg("m2", 2, None)).await.unwrap();

        // The in-memory tail only holds 1 entry; asking for 2 must fall back.
        let (messages, _) = registry.list(&store, "c1:General", None, 2).await.unwrap();
        assert_eq!(messages.len(), 2);
    }
}
