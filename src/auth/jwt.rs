// src/auth/jwt.rs
// Bearer-token issuance/verification. Grounded on the teacher's
// `auth/jwt.rs`, but the secret is threaded through `AuthConfig` explicitly
// rather than read from a process-wide env lookup on every call.

use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::auth::AuthConfig;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

pub fn create_token(config: &AuthConfig, user_id: &str) -> Result<String> {
    let now = chrono::Utc::now();
    let expiration = now
        .checked_add_signed(chrono::Duration::days(config.token_ttl_days))
        .ok_or_else(|| anyhow!("token TTL overflowed"))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
        iat: now.timestamp() as usize,
    };

    let key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
    encode(&Header::default(), &claims, &key).map_err(|e| anyhow!("failed to create token: {e}"))
}

pub fn verify_token(config: &AuthConfig, token: &str) -> Result<Claims> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let mut validation = Validation::default();
    validation.leeway = config.clock_skew_secs;

    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| anyhow!("invalid token: {e}"))
}
