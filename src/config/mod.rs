// src/config/mod.rs
// Central configuration for the hub gateway.

pub mod auth;
pub mod helpers;
pub mod server;
pub mod socket;

use std::path::PathBuf;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

/// Top-level configuration, composed of domain configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: server::ServerConfig,
    pub database: server::DatabaseConfig,
    pub logging: server::LoggingConfig,
    pub cors: server::CorsConfig,
    pub auth: auth::AuthConfig,
    pub media: auth::MediaConfig,
    pub media_root: PathBuf,
    pub socket: socket::SocketConfig,
    pub hub: socket::HubConfig,
    /// Requests/minute allowed per client IP on `/auth/*` and plugin pairing
    /// attach (brute-force guard).
    pub auth_rate_limit_per_min: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            server: server::ServerConfig::from_env(),
            database: server::DatabaseConfig::from_env(),
            logging: server::LoggingConfig::from_env(),
            cors: server::CorsConfig::from_env(),
            auth: auth::AuthConfig::from_env(),
            media: auth::MediaConfig::from_env(),
            media_root: PathBuf::from(helpers::env_or("GATEWAY_MEDIA_ROOT", "data/media")),
            socket: socket::SocketConfig::from_env(),
            hub: socket::HubConfig::from_env(),
            auth_rate_limit_per_min: helpers::env_or_parsed("GATEWAY_AUTH_RATE_LIMIT_PER_MIN", 30),
        }
    }

    /// Validate config on startup.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.len() < 16 {
            anyhow::bail!("GATEWAY_JWT_SECRET must be at least 16 characters");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        self.server.bind_address()
    }
}
