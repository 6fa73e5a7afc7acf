use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::VerifyingKey;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::crypto;
use crate::error::RelayError;
use crate::identity::IdentityRegistry;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: String,
    exp: i64,
}

/// Challenge/response auth service (C2): issues one-time nonces and
/// HMAC-signed bearer tokens.
pub struct AuthService {
    identity: Arc<IdentityRegistry>,
    hmac_secret: Vec<u8>,
    token_ttl: Duration,
    /// Pending challenges, keyed by user_id. Shared concurrent map per the
    /// relay's resource model; a fresh login overwrites any prior entry.
    challenges: Mutex<HashMap<String, [u8; 32]>>,
}

impl AuthService {
    pub fn new(identity: Arc<IdentityRegistry>, hmac_secret: Vec<u8>, token_ttl_secs: i64) -> Self {
        Self {
            identity,
            hmac_secret,
            token_ttl: Duration::seconds(token_ttl_secs),
            challenges: Mutex::new(HashMap::new()),
        }
    }

    /// Phase 1: generate and store a fresh challenge nonce for `user_id`.
    pub async fn begin_login(&self, user_id: &str) -> [u8; 32] {
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.challenges.lock().await.insert(user_id.to_string(), nonce);
        nonce
    }

    /// Phase 2: verify the signature over the stored challenge and mint a
    /// token on success. The challenge is consumed (dropped) either way.
    pub async fn verify_login(&self, user_id: &str, signature_b64: &str) -> Result<String, RelayError> {
        let nonce = self.challenges.lock().await.remove(user_id);
        let Some(nonce) = nonce else {
            return Err(RelayError::BadRequest("no pending challenge".into()));
        };

        let user = self
            .identity
            .get_user(user_id)
            .await
            .map_err(|_| RelayError::Unauthorized)?;
        let key_bytes = B64
            .decode(&user.public_key)
            .map_err(|_| RelayError::Unauthorized)?;
        let key_bytes: [u8; 32] = key_bytes.try_into().map_err(|_| RelayError::Unauthorized)?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| RelayError::Unauthorized)?;

        if !crypto::verify(&verifying_key, &nonce, signature_b64) {
            return Err(RelayError::Unauthorized);
        }

        Ok(self.mint_token(user_id))
    }

    fn mint_token(&self, user_id: &str) -> String {
        let claims = Claims {
            user_id: user_id.to_string(),
            exp: (Utc::now() + self.token_ttl).timestamp(),
        };
        let claims_json = serde_json::to_vec(&claims).expect("claims always serialize");
        let claims_b64 = B64.encode(&claims_json);

        let mut mac = HmacSha256::new_from_slice(&self.hmac_secret).expect("hmac accepts any key length");
        mac.update(claims_b64.as_bytes());
        let sig_b64 = B64.encode(mac.finalize().into_bytes());

        format!("{claims_b64}.{sig_b64}")
    }

    /// Verify a bearer token: HMAC must match, `exp` must be in the
    /// future, and the claimed user must still exist in the registry.
    pub async fn verify_token(&self, token: &str) -> Result<String, RelayError> {
        let (claims_b64, sig_b64) = token.split_once('.').ok_or(RelayError::Unauthorized)?;

        let mut mac = HmacSha256::new_from_slice(&self.hmac_secret).expect("hmac accepts any key length");
        mac.update(claims_b64.as_bytes());
        let expected_sig = B64.decode(sig_b64).map_err(|_| RelayError::Unauthorized)?;
        mac.verify_slice(&expected_sig).map_err(|_| RelayError::Unauthorized)?;

        let claims_json = B64.decode(claims_b64).map_err(|_| RelayError::Unauthorized)?;
        let claims: Claims = serde_json::from_slice(&claims_json).map_err(|_| RelayError::Unauthorized)?;

        let exp: DateTime<Utc> = DateTime::from_timestamp(claims.exp, 0).ok_or(RelayError::Unauthorized)?;
        if exp <= Utc::now() {
            return Err(RelayError::Unauthorized);
        }

        if !self
            .identity
            .user_exists(&claims.user_id)
            .await
            .map_err(|_| RelayError::Unauthorized)?
        {
            return Err(RelayError::Unauthorized);
        }

        Ok(claims.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    async fn test_service() -> (AuthService, SigningKey) {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let identity = Arc::new(IdentityRegistry::new(storage));
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key_b64 = B64.encode(signing_key.verifying_key().as_bytes());
        identity.register("alice", "Alice", &public_key_b64).await.unwrap();
        (AuthService::new(identity, b"test-secret".to_vec(), 3600), signing_key)
    }

    #[tokio::test]
    async fn correct_signature_yields_verifiable_token() {
        let (auth, key) = test_service().await;
        let challenge = auth.begin_login("alice").await;
        let sig = crypto::sign(&key, &challenge);
        let token = auth.verify_login("alice", &sig).await.unwrap();
        let user_id = auth.verify_token(&token).await.unwrap();
        assert_eq!(user_id, "alice");
    }

    #[tokio::test]
    async fn wrong_key_always_fails() {
        let (auth, _key) = test_service().await;
        let other = SigningKey::generate(&mut OsRng);
        let challenge = auth.begin_login("alice").await;
        let sig = crypto::sign(&other, &challenge);
        assert!(auth.verify_login("alice", &sig).await.is_err());
    }

    #[tokio::test]
    async fn tampered_token_rejected() {
        let (auth, key) = test_service().await;
        let challenge = auth.begin_login("alice").await;
        let sig = crypto::sign(&key, &challenge);
        let mut token = auth.verify_login("alice", &sig).await.unwrap();
        token.push('x');
        assert!(auth.verify_token(&token).await.is_err());
    }
}
