// src/config/server.rs
// Server, database, and CORS configuration

use serde::{Deserialize, Serialize};

/// HTTP/WS bind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: super::helpers::env_or("GATEWAY_HOST", "0.0.0.0"),
            port: super::helpers::env_or_parsed("GATEWAY_PORT", 8787),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: super::helpers::env_or("DATABASE_URL", "sqlite://data/hub.db"),
            max_connections: super::helpers::env_or_parsed("GATEWAY_SQLITE_MAX_CONNECTIONS", 10),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub trace_sql: bool,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            level: super::helpers::env_or("GATEWAY_LOG_LEVEL", "info"),
            trace_sql: super::helpers::env_or_parsed("GATEWAY_TRACE_SQL", false),
        }
    }
}

/// CORS allowlist for the HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn from_env() -> Self {
        Self {
            allowed_origins: super::helpers::env_list("GATEWAY_ALLOWED_ORIGINS", &[]),
        }
    }
}
