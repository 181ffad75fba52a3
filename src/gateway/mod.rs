// src/gateway/mod.rs
// HTTP + WebSocket surface (§4.8). Grounded on the teacher's
// `crates/mira-server/src/web/mod.rs` router assembly: one `AppState`, a
// nested `/api` router, CORS + tracing layers, `axum::serve` in `main.rs`.

pub mod auth;
pub mod rest;
pub mod ws;

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AuthService;
use crate::config::auth::AuthConfig;
use crate::error::GatewayError;
use crate::hub::HubRegistry;
use crate::ratelimit::RateLimiterRegistry;
use crate::store::Store;

/// Shared state threaded through every Gateway handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub hubs: Arc<HubRegistry>,
    pub auth: Arc<AuthService>,
    pub auth_config: AuthConfig,
    pub ratelimit: Arc<RateLimiterRegistry>,
}

/// Builds the full Gateway router (§4.8): plugin/client WS upgrades, bearer
/// auth, and the REST surface backing channels/tasks/pairing tokens.
pub fn create_router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = build_cors(allowed_origins);

    let api_router = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/verify", post(auth::verify))
        .route("/channels", get(rest::list_channels).post(rest::create_channel))
        .route("/channels/{channel_id}/sessions", get(rest::list_sessions).post(rest::create_session))
        .route("/channels/{channel_id}/sessions/{session_id}", axum::routing::delete(rest::delete_session))
        .route("/channels/{channel_id}/tasks", get(rest::list_tasks).post(rest::create_task))
        .route("/tasks/{task_id}", axum::routing::delete(rest::delete_task))
        .route("/tasks/{task_id}/enabled", post(rest::set_task_enabled))
        .route("/tasks/{task_id}/jobs", get(rest::list_jobs))
        .route("/pairing-tokens", get(rest::list_pairing_tokens).post(rest::create_pairing_token))
        .route("/pairing-tokens/{token_id}", axum::routing::delete(rest::revoke_pairing_token))
        .route("/media", post(rest::upload_media))
        .route("/media/{user_id}/{filename}", get(rest::get_media))
        .route("/hub/{user_id}/status", get(rest::hub_status))
        .route("/hub/{user_id}/send", post(rest::hub_send))
        .route("/hub/{user_id}/history", get(rest::hub_history))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .nest("/api", api_router)
        .route("/api/gateway/{conn_id}", get(ws::plugin_ws_handler))
        .route("/api/ws/{user_id}/{session_id}", get(ws::client_ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

/// Extracts and validates the bearer token from `Authorization`, returning
/// the authenticated user ID. Used by every REST handler that acts on behalf
/// of a user (§4.8 failure semantics: missing/invalid token is `401`).
pub struct BearerUser(pub String);

impl<S> FromRequestParts<S> for BearerUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(GatewayError::Unauthorized)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(GatewayError::Unauthorized)?;

        let user_id = app_state
            .auth
            .authenticate_token(token)
            .map_err(|_| GatewayError::Unauthorized)?;

        Ok(BearerUser(user_id))
    }
}

// Re-exported so `BearerUser`'s `FromRequestParts` bound resolves without
// callers needing to import axum's internal trait path.
pub use axum::extract::FromRef;
