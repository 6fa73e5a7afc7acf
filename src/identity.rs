use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

use crate::error::RelayError;
use crate::storage::Storage;

/// Identity & Key Registry (C1): `{user_id -> public_key}`.
pub struct IdentityRegistry {
    storage: Arc<Storage>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UserInfo {
    pub user_id: String,
    pub username: String,
    pub public_key: String,
}

impl IdentityRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub async fn register(
        &self,
        user_id: &str,
        username: &str,
        public_key_b64: &str,
    ) -> Result<(), RelayError> {
        let decoded = B64
            .decode(public_key_b64)
            .map_err(|_| RelayError::InvalidArgument("public_key is not valid base64".into()))?;
        if decoded.len() != 32 {
            return Err(RelayError::InvalidArgument(
                "public_key must decode to 32 bytes".into(),
            ));
        }

        self.storage
            .create_user(user_id, username, public_key_b64)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    RelayError::Conflict(format!("user_id {user_id} already registered"))
                }
                other => RelayError::Internal(other.into()),
            })
    }

    pub async fn get_user(&self, user_id: &str) -> Result<UserInfo, RelayError> {
        let row = self
            .storage
            .get_user(user_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("user {user_id} not found")))?;
        Ok(UserInfo {
            user_id: row.user_id,
            username: row.username,
            public_key: row.public_key,
        })
    }

    pub async fn user_exists(&self, user_id: &str) -> Result<bool, RelayError> {
        Ok(self.storage.user_exists(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_rejects_short_key() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let registry = IdentityRegistry::new(storage);
        let err = registry.register("alice", "Alice", "short").await;
        assert!(matches!(err, Err(RelayError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let registry = IdentityRegistry::new(storage);
        let key = B64.encode([7u8; 32]);
        registry.register("alice", "Alice", &key).await.unwrap();
        let info = registry.get_user("alice").await.unwrap();
        assert_eq!(info.public_key, key);
        assert!(registry.user_exists("alice").await.unwrap());
        assert!(!registry.user_exists("bob").await.unwrap());
    }
}
