pub mod connection;
pub mod http;
pub mod router;
pub mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::auth::AuthService;
use crate::config::RelayConfig;
use crate::identity::IdentityRegistry;
use crate::storage::Storage;

pub use state::RelayState;

/// Build the relay's shared state and bind its HTTP/WebSocket listener.
pub async fn serve(config: RelayConfig) -> Result<()> {
    let storage = Arc::new(Storage::new(&config.data_dir).await?);
    let identity = Arc::new(IdentityRegistry::new(storage.clone()));
    let auth = Arc::new(AuthService::new(
        identity.clone(),
        config.hmac_secret.clone(),
        config.token_ttl_secs,
    ));
    let state = Arc::new(RelayState::new(storage, identity, auth, config.spool_capacity));

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "relay listening");
    axum::serve(listener, app)
        .await
        .context("relay server loop exited")?;
    Ok(())
}
