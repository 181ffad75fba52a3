// src/store/media.rs
// Local object store for media attachments, plus HMAC-SHA256 signed URLs
// (§6 Media: `media/{userId}/{filename}` blobs, signed GET URLs).

use std::path::PathBuf;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::error::StoreError;
use crate::config::auth::MediaConfig;

type HmacSha256 = Hmac<Sha256>;

pub struct MediaStore {
    root: PathBuf,
    config: MediaConfig,
}

impl MediaStore {
    pub fn new(root: PathBuf, config: MediaConfig) -> Self {
        Self { root, config }
    }

    /// Writes `bytes` to `{root}/{bucketPrefix}/{userId}/{filename}`, creating
    /// parent directories as needed.
    pub async fn put(&self, user_id: &str, filename: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = self.root.join(&self.config.bucket_prefix).join(user_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::StateConflict(format!("media dir: {e}")))?;

        let mut file = fs::File::create(dir.join(filename))
            .await
            .map_err(|e| StoreError::StateConflict(format!("media create: {e}")))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StoreError::StateConflict(format!("media write: {e}")))?;

        Ok(())
    }

    pub async fn get(&self, user_id: &str, filename: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.root.join(&self.config.bucket_prefix).join(user_id).join(filename);
        fs::read(&path).await.map_err(|_| StoreError::NotFound)
    }

    /// Builds a signed path: `/media/{userId}/{filename}?expires={unix}&sig={hex}`.
    /// `ttl_secs` defaults to the configured expiry when `None`.
    pub fn sign_url(&self, user_id: &str, filename: &str, ttl_secs: Option<i64>) -> String {
        let expires = chrono::Utc::now().timestamp() + ttl_secs.unwrap_or(self.config.default_expiry_secs);
        let sig = self.sign(user_id, filename, expires);
        format!(
            "/{}/{user_id}/{filename}?expires={expires}&sig={sig}",
            self.config.bucket_prefix
        )
    }

    /// Verifies a previously issued signature. Constant-time compare via `Mac::verify_slice`.
    pub fn verify_url(&self, user_id: &str, filename: &str, expires: i64, sig_hex: &str) -> bool {
        if chrono::Utc::now().timestamp() > expires {
            return false;
        }
        let Ok(sig_bytes) = hex::decode(sig_hex) else {
            return false;
        };

        self.expected_mac(user_id, filename, expires)
            .verify_slice(&sig_bytes)
            .is_ok()
    }

    fn sign(&self, user_id: &str, filename: &str, expires: i64) -> String {
        let mac = self.expected_mac(user_id, filename, expires);
        hex::encode(mac.finalize().into_bytes())
    }

    fn expected_mac(&self, user_id: &str, filename: &str, expires: i64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.config.signing_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(format!("{user_id}|{filename}|{expires}").as_bytes());
        mac
    }
}
