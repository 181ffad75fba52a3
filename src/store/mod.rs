// src/store/mod.rs
// Durable persistence layer (§4.1 Store, §6 persisted state layout).
//
// Grounded on the teacher's `AppState` aggregation (`src/state.rs`): one
// struct per table-group, all sharing a single `SqlitePool`.

pub mod channels;
pub mod error;
pub mod jobs;
pub mod media;
pub mod messages;
pub mod models;
pub mod pairing_tokens;
pub mod tasks;
pub mod users;

use std::path::PathBuf;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::auth::MediaConfig;
use crate::error::GatewayError;

pub use error::StoreError;

#[derive(Clone)]
pub struct Store {
    pub users: std::sync::Arc<users::UserStore>,
    pub pairing_tokens: std::sync::Arc<pairing_tokens::PairingTokenStore>,
    pub channels: std::sync::Arc<channels::ChannelStore>,
    pub messages: std::sync::Arc<messages::MessageStore>,
    pub tasks: std::sync::Arc<tasks::TaskStore>,
    pub jobs: std::sync::Arc<jobs::JobStore>,
    pub media: std::sync::Arc<media::MediaStore>,
}

impl Store {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        media_root: PathBuf,
        media_config: MediaConfig,
    ) -> Result<Self, GatewayError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| anyhow::anyhow!("database connect: {e}"))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| anyhow::anyhow!("migration: {e}"))?;

        Ok(Self::from_pool(pool, media_root, media_config))
    }

    pub fn from_pool(pool: SqlitePool, media_root: PathBuf, media_config: MediaConfig) -> Self {
        Self {
            users: std::sync::Arc::new(users::UserStore::new(pool.clone())),
            pairing_tokens: std::sync::Arc::new(pairing_tokens::PairingTokenStore::new(pool.clone())),
            channels: std::sync::Arc::new(channels::ChannelStore::new(pool.clone())),
            messages: std::sync::Arc::new(messages::MessageStore::new(pool.clone())),
            tasks: std::sync::Arc::new(tasks::TaskStore::new(pool.clone())),
            jobs: std::sync::Arc::new(jobs::JobStore::new(pool.clone())),
            media: std::sync::Arc::new(media::MediaStore::new(media_root, media_config)),
        }
    }
}
