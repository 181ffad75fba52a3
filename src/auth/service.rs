// src/auth/service.rs
// Registration/login over the Store's UserStore (§6 HTTP surface, bearer
// auth). Grounded on the teacher's `auth/service.rs`.

use anyhow::{anyhow, Result};

use super::jwt::{create_token, verify_token};
use super::password::{hash_password, verify_password};
use crate::config::auth::AuthConfig;
use crate::store::models::User;
use crate::store::users::UserStore;

pub struct AuthService {
    users: std::sync::Arc<UserStore>,
    config: AuthConfig,
}

pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

impl AuthService {
    pub fn new(users: std::sync::Arc<UserStore>, config: AuthConfig) -> Self {
        Self { users, config }
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<AuthResponse> {
        if self.users.find_by_email(email).await?.is_some() {
            return Err(anyhow!("email already registered"));
        }
        if password.len() < 8 {
            return Err(anyhow!("password must be at least 8 characters"));
        }

        let password_hash = hash_password(password)?;
        let user = self.users.create(Some(email), &password_hash).await?;
        let token = create_token(&self.config, &user.id)?;

        Ok(AuthResponse { user, token })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| anyhow!("invalid credentials"))?;

        if !verify_password(password, &user.password_hash)? {
            return Err(anyhow!("invalid credentials"));
        }

        let token = create_token(&self.config, &user.id)?;
        Ok(AuthResponse { user, token })
    }

    /// Validates a bearer token and returns the user ID it authenticates.
    /// Used both for HTTP routes and for a client's first `{type:"auth"}`
    /// WS frame (§4.7 Client attach protocol).
    pub fn authenticate_token(&self, token: &str) -> Result<String> {
        let claims = verify_token(&self.config, token)?;
        Ok(claims.sub)
    }
}
