// src/gateway/auth.rs
// Bearer-token registration/login (§4.8 HTTP surface). Grounded on the
// teacher's `api/http/auth.rs` — same three routes, same error-to-status
// mapping, adapted to this crate's `AuthService`/`GatewayError`.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::GatewayError;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user_id: String,
    pub email: Option<String>,
    pub token: String,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub user_id: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, GatewayError> {
    if !state.ratelimit.check(&addr.ip().to_string()) {
        crate::metrics::auth_rejected("rate_limited");
        return Err(GatewayError::RateLimited);
    }

    let response = state
        .auth
        .register(&req.email, &req.password)
        .await
        .map_err(|e| GatewayError::BadRequest(e.to_string()))?;

    Ok(Json(AuthResponse {
        user_id: response.user.id,
        email: response.user.email,
        token: response.token,
    }))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, GatewayError> {
    if !state.ratelimit.check(&addr.ip().to_string()) {
        crate::metrics::auth_rejected("rate_limited");
        return Err(GatewayError::RateLimited);
    }

    let response = state.auth.login(&req.email, &req.password).await.map_err(|_| {
        crate::metrics::auth_rejected("bad_credentials");
        GatewayError::Unauthorized
    })?;

    Ok(Json(AuthResponse {
        user_id: response.user.id,
        email: response.user.email,
        token: response.token,
    }))
}

pub async fn verify(State(state): State<AppState>, Json(req): Json<VerifyRequest>) -> Json<VerifyResponse> {
    match state.auth.authenticate_token(&req.token) {
        Ok(user_id) => Json(VerifyResponse {
            valid: true,
            user_id: Some(user_id),
        }),
        Err(_) => Json(VerifyResponse {
            valid: false,
            user_id: None,
        }),
    }
}
