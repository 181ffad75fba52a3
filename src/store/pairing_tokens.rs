// src/store/pairing_tokens.rs
// Pairing-token resolution and audit trail (§4.1, §8 S3).

use sqlx::{Row, SqlitePool};

use super::error::StoreError;
use super::models::PairingToken;

pub struct PairingTokenStore {
    pool: SqlitePool,
}

impl PairingTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Resolve a bare token string to `(userId, tokenId)`, or `NotFound`/`Revoked`.
    pub async fn resolve(&self, token: &str) -> Result<(String, String), StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, revoked_at FROM pairing_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(StoreError::NotFound)?;
        let revoked_at: Option<i64> = row.get("revoked_at");
        if revoked_at.is_some() {
            return Err(StoreError::Revoked);
        }

        Ok((row.get("user_id"), row.get("id")))
    }

    /// Idempotent per connection attempt: increments `connection_count`,
    /// refreshes `last_connected_at`/`last_ip`.
    pub async fn record_use(&self, token_id: &str, ip: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE pairing_tokens
             SET last_connected_at = ?, last_ip = ?, connection_count = connection_count + 1
             WHERE id = ?",
        )
        .bind(now)
        .bind(ip)
        .bind(token_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create(&self, user_id: &str, label: Option<&str>) -> Result<PairingToken, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let token = generate_token();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO pairing_tokens (id, user_id, token, label, connection_count, created_at)
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(&token)
        .bind(label)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(PairingToken {
            id,
            user_id: user_id.to_string(),
            token,
            label: label.map(str::to_string),
            last_connected_at: None,
            last_ip: None,
            connection_count: 0,
            revoked_at: None,
            created_at: now,
        })
    }

    /// Soft-delete only: audit fields (`last_connected_at`, `last_ip`,
    /// `connection_count`) are never erased.
    pub async fn revoke(&self, token_id: &str, user_id: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE pairing_tokens SET revoked_at = ? WHERE id = ? AND user_id = ? AND revoked_at IS NULL",
        )
        .bind(now)
        .bind(token_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<PairingToken>, StoreError> {
        let rows = sqlx::query_as::<_, PairingToken>(
            "SELECT id, user_id, token, label, last_connected_at, last_ip,
                    connection_count, revoked_at, created_at
             FROM pairing_tokens WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// 128+ bits of entropy, URL-safe.
fn generate_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
