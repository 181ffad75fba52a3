// src/gateway/ws.rs
// Plugin and client WebSocket upgrades (§4.8). Grounded on the teacher's
// `web/ws.rs` upgrade handler, generalized from one broadcast socket to two
// distinct attach paths feeding a per-user Hub.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::{info, warn};

use super::AppState;
use crate::error::GatewayError;
use crate::store::StoreError;

#[derive(Deserialize)]
pub struct PairingQuery {
    token: Option<String>,
}

/// `GET /api/gateway/{connId}` — the plugin's attach point. `connId` is
/// either the literal user ID for single-user/dev deployments (`"default"`)
/// or a pairing token, taken from the path, `?token=`, or `X-Pairing-Token`
/// (§4.1 pairing-token resolution).
pub async fn plugin_ws_handler(
    ws: WebSocketUpgrade,
    Path(conn_id): Path<String>,
    Query(query): Query<PairingQuery>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GatewayError> {
    let ip = addr.ip().to_string();
    if conn_id != "default" && !state.ratelimit.check(&ip) {
        crate::metrics::auth_rejected("rate_limited");
        return Err(GatewayError::RateLimited);
    }
    let user_id = resolve_plugin_user(&state, &conn_id, query.token.as_deref(), &headers, &ip).await?;

    // §3 Channel lifecycle: auto-create "General" on first plugin attach so
    // messages the plugin streams in have a backing channel/session row.
    if let Err(e) = state.store.channels.get_or_create_general(&user_id).await {
        warn!(user_id, error = %e, "failed to ensure General channel on plugin attach");
    }

    info!(user_id, ip, "plugin attach");
    let hub = state.hubs.get_or_create(&user_id).await;
    let socket_config = state.hubs.socket_config().clone();

    Ok(ws.on_upgrade(move |socket| async move {
        hub.attach_plugin(socket, ip, &socket_config);
    }))
}

/// `GET /api/ws/{userId}/{sessionId}` — a client's attach point. The
/// connection starts unauthenticated; its first frame must be `{type:"auth"}`
/// (enforced by the Hub executor, not here).
pub async fn client_ws_handler(
    ws: WebSocketUpgrade,
    Path((user_id, session_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!(user_id, session_id, "client attach");
    let hub = state.hubs.get_or_create(&user_id).await;
    let socket_config = state.hubs.socket_config().clone();

    ws.on_upgrade(move |socket| async move {
        hub.attach_client(socket, &socket_config);
    })
}

async fn resolve_plugin_user(
    state: &AppState,
    conn_id: &str,
    token_param: Option<&str>,
    headers: &HeaderMap,
    ip: &str,
) -> Result<String, GatewayError> {
    if conn_id == "default" {
        return Ok("default".to_string());
    }

    let token = token_param
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("x-pairing-token")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| conn_id.to_string());

    let (user_id, token_id) = state.store.pairing_tokens.resolve(&token).await.map_err(|e| match e {
        StoreError::NotFound | StoreError::Revoked => GatewayError::Unauthorized,
        other => GatewayError::Internal(other.into()),
    })?;

    if let Err(e) = state.store.pairing_tokens.record_use(&token_id, ip).await {
        warn!(token_id, error = %e, "failed to record pairing-token use");
    }

    Ok(user_id)
}
