// src/store/users.rs
// Account storage backing bearer/password auth (§3 User).

use sqlx::SqlitePool;

use super::error::StoreError;
use super::models::User;

pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, email: Option<&str>, password_hash: &str) -> Result<User, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO users (id, email, password_hash, display_name, auth_provider, firebase_uid, settings_json, created_at)
             VALUES (?, ?, ?, NULL, 'password', NULL, NULL, ?)",
        )
        .bind(&id)
        .bind(email)
        .bind(password_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(User {
            id,
            email: email.map(str::to_string),
            password_hash: password_hash.to_string(),
            display_name: None,
            auth_provider: "password".to_string(),
            firebase_uid: None,
            settings_json: None,
            created_at: now,
        })
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, display_name, auth_provider, firebase_uid, settings_json, created_at
             FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, display_name, auth_provider, firebase_uid, settings_json, created_at
             FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn update_display_name(&self, user_id: &str, display_name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET display_name = ? WHERE id = ?")
            .bind(display_name)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
