use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use serde_json::json;
use tokio::sync::RwLock;

use crate::client::keys::public_key_b64;
use crate::crypto;

/// HTTP-side calls the client makes to the relay: registration, the
/// challenge/response login flow, descriptions, and presence.
pub struct HttpClient {
    base_url: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

fn ws_to_http(server_url: &str) -> String {
    server_url
        .replacen("wss://", "https://", 1)
        .replacen("ws://", "http://", 1)
        .trim_end_matches("/ws")
        .to_string()
}

impl HttpClient {
    pub fn new(server_url: &str) -> Self {
        Self {
            base_url: ws_to_http(server_url),
            client: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    pub async fn set_token(&self, token: String) {
        *self.token.write().await = Some(token);
    }

    async fn bearer(&self) -> Result<String> {
        self.token
            .read()
            .await
            .clone()
            .context("no session token; login first")
    }

    pub async fn register(&self, user_id: &str, username: &str, signing_key: &SigningKey) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/auth/register", self.base_url))
            .json(&json!({
                "user_id": user_id,
                "username": username,
                "public_key": public_key_b64(signing_key),
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("registration failed: {}", resp.status());
        }
        Ok(())
    }

    /// Full two-phase login: fetch a challenge, sign it, exchange for a
    /// bearer token, and cache the token for subsequent calls.
    pub async fn login(&self, user_id: &str, signing_key: &SigningKey) -> Result<String> {
        let challenge_resp: serde_json::Value = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .json(&json!({ "user_id": user_id }))
            .send()
            .await?
            .json()
            .await?;
        let challenge_b64 = challenge_resp["challenge"]
            .as_str()
            .context("missing challenge in response")?;
        let challenge = B64.decode(challenge_b64)?;

        let signature = crypto::sign(signing_key, &challenge);
        let token_resp: serde_json::Value = self
            .client
            .post(format!("{}/auth/login?verify=true", self.base_url))
            .json(&json!({ "user_id": user_id, "signature": signature }))
            .send()
            .await?
            .json()
            .await?;
        let token = token_resp["token"]
            .as_str()
            .context("login rejected: no token in response")?
            .to_string();
        self.set_token(token.clone()).await;
        Ok(token)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<String> {
        let token = self.bearer().await?;
        let resp: serde_json::Value = self
            .client
            .get(format!("{}/auth/users/{}", self.base_url, user_id))
            .bearer_auth(token)
            .send()
            .await?
            .json()
            .await?;
        resp["public_key"]
            .as_str()
            .map(str::to_string)
            .context("missing public_key in response")
    }

    pub async fn check_user_id(&self, user_id: &str) -> Result<bool> {
        let resp: serde_json::Value = self
            .client
            .get(format!("{}/auth/check-userid/{}", self.base_url, user_id))
            .send()
            .await?
            .json()
            .await?;
        Ok(resp["exists"].as_bool().unwrap_or(false))
    }

    pub async fn get_descriptions(&self, user_id: &str) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/user/descriptions/{}", self.base_url, user_id))
            .send()
            .await?
            .json()
            .await?;
        Ok(resp)
    }

    pub async fn set_descriptions(&self, descriptions: &[String]) -> Result<()> {
        let token = self.bearer().await?;
        let resp = self
            .client
            .post(format!("{}/user/descriptions", self.base_url))
            .bearer_auth(token)
            .json(descriptions)
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("set_descriptions failed: {}", resp.status());
        }
        Ok(())
    }

    pub async fn active_users(&self) -> Result<(Vec<String>, Vec<String>)> {
        let token = self.bearer().await?;
        let resp: serde_json::Value = self
            .client
            .get(format!("{}/active-users", self.base_url))
            .bearer_auth(token)
            .send()
            .await?
            .json()
            .await?;
        let online = resp["online"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let offline = resp["offline"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        Ok((online, offline))
    }

    pub fn ws_url(&self, server_url: &str, token: &str) -> String {
        format!("{server_url}?token={token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_ws_scheme_to_http() {
        assert_eq!(ws_to_http("wss://relay.example/ws"), "https://relay.example");
        assert_eq!(ws_to_http("ws://127.0.0.1:4300/ws"), "http://127.0.0.1:4300");
    }
}
