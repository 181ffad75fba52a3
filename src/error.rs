// src/error.rs
// Error kinds shared across the hub (§7). Component boundaries return these;
// the hub executor decides disconnect-vs-drop-and-log from the variant alone.

use thiserror::Error;

/// WS close code carried by a given error, where applicable.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_AUTH_FAILURE: u16 = 4001;
pub const CLOSE_OVERLOADED: u16 = 4008;
pub const CLOSE_PROTOCOL_ERROR: u16 = 4009;
pub const CLOSE_PLUGIN_REPLACED: u16 = 4010;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("auth failure: {0}")]
    AuthFailure(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("backpressure: {0}")]
    Backpressure(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] anyhow::Error),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("connection closed")]
    Closed,
}

impl HubError {
    /// The WS close code a socket should be closed with, if any. `None` means
    /// the frame should be dropped-and-logged rather than disconnecting the peer.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            HubError::AuthFailure(_) => Some(CLOSE_AUTH_FAILURE),
            HubError::ProtocolError(_) => Some(CLOSE_PROTOCOL_ERROR),
            HubError::Backpressure(_) => Some(CLOSE_OVERLOADED),
            HubError::StateConflict(_) => None,
            HubError::StoreUnavailable(_) => None,
            HubError::Fatal(_) => Some(1011),
            HubError::Closed => Some(CLOSE_NORMAL),
        }
    }

    pub fn is_disconnect(&self) -> bool {
        self.close_code().is_some()
    }
}

/// HTTP-facing error for the Gateway's REST surface (§4.8 failure semantics).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("too many requests")]
    RateLimited,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::Json;

        let (status, message) = match &self {
            GatewayError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            GatewayError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            GatewayError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            GatewayError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            GatewayError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            GatewayError::Internal(e) => {
                tracing::error!("internal gateway error: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
