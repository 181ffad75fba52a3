// src/config/socket.rs
// Tunables for SocketPair and the Hub executor (§4.2, §5).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Maximum frame size accepted by the reader, in bytes.
    pub max_frame_bytes: usize,
    /// Bounded outbound buffer depth before `Backpressure`.
    pub writer_buffer_frames: usize,
    /// Idle keepalive ping interval.
    pub ping_interval_secs: u64,
    /// Silence duration after which the connection is dropped.
    pub pong_timeout_secs: u64,
    /// Hub executor mailbox depth.
    pub mailbox_depth: usize,
    /// Writer drain deadline during shutdown.
    pub shutdown_drain_ms: u64,
}

impl SocketConfig {
    pub fn from_env() -> Self {
        Self {
            max_frame_bytes: super::helpers::env_or_parsed("GATEWAY_MAX_FRAME_BYTES", 1024 * 1024),
            writer_buffer_frames: super::helpers::env_or_parsed("GATEWAY_WRITER_BUFFER_FRAMES", 256),
            ping_interval_secs: super::helpers::env_or_parsed("GATEWAY_PING_INTERVAL_SECS", 30),
            pong_timeout_secs: super::helpers::env_or_parsed("GATEWAY_PONG_TIMEOUT_SECS", 90),
            mailbox_depth: super::helpers::env_or_parsed("GATEWAY_MAILBOX_DEPTH", 1024),
            shutdown_drain_ms: super::helpers::env_or_parsed("GATEWAY_SHUTDOWN_DRAIN_MS", 2000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Client auth handshake deadline.
    pub client_auth_timeout_secs: u64,
    /// Stream inactivity timeout before synthetic terminal (§4.4).
    pub stream_timeout_secs: u64,
    /// Hub quiescence before destruction (§4.7).
    pub quiescence_secs: u64,
    /// Bounded recent-window cache size per session (§4.3).
    pub session_cache_window: usize,
}

impl HubConfig {
    pub fn from_env() -> Self {
        Self {
            client_auth_timeout_secs: super::helpers::env_or_parsed("GATEWAY_CLIENT_AUTH_TIMEOUT_SECS", 5),
            stream_timeout_secs: super::helpers::env_or_parsed("GATEWAY_STREAM_TIMEOUT_SECS", 60),
            quiescence_secs: super::helpers::env_or_parsed("GATEWAY_HUB_QUIESCENCE_SECS", 300),
            session_cache_window: super::helpers::env_or_parsed("GATEWAY_SESSION_CACHE_WINDOW", 500),
        }
    }
}
