use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use ed25519_dalek::VerifyingKey;
use tokio::sync::RwLock;

use crate::client::http_client::HttpClient;

/// Per-client, in-memory `user_id -> public_key` cache. Shared between
/// the read and write pumps; entries are only ever inserted, never
/// removed, since a key once fetched is never expected to change under
/// the same user_id.
pub struct KeyCache {
    entries: RwLock<HashMap<String, VerifyingKey>>,
    http: Arc<HttpClient>,
}

impl KeyCache {
    pub fn new(http: Arc<HttpClient>, own_user_id: &str, own_key: VerifyingKey) -> Self {
        let mut entries = HashMap::new();
        entries.insert(own_user_id.to_string(), own_key);
        Self {
            entries: RwLock::new(entries),
            http,
        }
    }

    /// Resolve a user's verification key, consulting the cache first and
    /// falling back to an HTTP lookup on a miss.
    pub async fn resolve(&self, user_id: &str) -> anyhow::Result<VerifyingKey> {
        if let Some(key) = self.entries.read().await.get(user_id) {
            return Ok(*key);
        }

        let public_key_b64 = self.http.get_user(user_id).await?;
        let bytes = B64.decode(&public_key_b64)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("public key for {user_id} is not 32 bytes"))?;
        let key = VerifyingKey::from_bytes(&bytes)?;
        self.entries.write().await.insert(user_id.to_string(), key);
        Ok(key)
    }

    #[cfg(test)]
    pub fn entries_for_test(&self) -> &RwLock<HashMap<String, VerifyingKey>> {
        &self.entries
    }
}
