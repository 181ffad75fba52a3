// src/store/error.rs

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("revoked")]
    Revoked,

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
