// src/config/auth.rs
// Auth, JWT and media-signing configuration. Passed explicitly to the Gateway
// rather than read from process-wide globals (REDESIGN FLAGS: no global JWT secret access).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Accepted clock skew for JWT `exp`/`iat` validation, in seconds.
    pub clock_skew_secs: u64,
    /// TTL for newly issued bearer tokens, in days.
    pub token_ttl_days: i64,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            jwt_secret: super::helpers::require_env("GATEWAY_JWT_SECRET"),
            clock_skew_secs: super::helpers::env_or_parsed("GATEWAY_CLOCK_SKEW_SECS", 60),
            token_ttl_days: super::helpers::env_or_parsed("GATEWAY_TOKEN_TTL_DAYS", 365),
        }
    }
}

/// Signed media URL configuration (HMAC-SHA256 over `userId|filename|expires`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub signing_secret: String,
    pub default_expiry_secs: i64,
    pub bucket_prefix: String,
}

impl MediaConfig {
    pub fn from_env() -> Self {
        Self {
            signing_secret: super::helpers::require_env("GATEWAY_JWT_SECRET"),
            default_expiry_secs: super::helpers::env_or_parsed("GATEWAY_MEDIA_URL_TTL_SECS", 3600),
            bucket_prefix: super::helpers::env_or("GATEWAY_MEDIA_PREFIX", "media"),
        }
    }
}
