use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::message::Message;
use crate::relay::router;
use crate::relay::state::{ConnectionHandle, RelayState, WRITE_QUEUE_CAPACITY};

/// Idle read deadline; the relay closes a connection that misses two ping
/// cycles in a row.
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Ping cadence: comfortably under the read deadline so a client that is
/// merely slow, not dead, survives one missed beat.
const PING_INTERVAL: Duration = Duration::from_secs(54);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// `GET /ws?token=<session_token>` — upgrade to WebSocket after verifying
/// the bearer token carried in the query string.
pub async fn ws_handler(
    State(state): State<Arc<RelayState>>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, RelayError> {
    let user_id = state.auth.verify_token(&params.token).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(state, user_id, socket)))
}

async fn handle_socket(state: Arc<RelayState>, user_id: String, socket: WebSocket) {
    info!(user_id = %user_id, "connection established");
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WRITE_QUEUE_CAPACITY);
    let (close_tx, mut close_rx) = mpsc::channel::<()>(1);

    let handle = ConnectionHandle { tx: tx.clone(), close: close_tx };
    if let Some(previous) = state.insert_connection(user_id.clone(), handle).await {
        debug!(user_id = %user_id, "replacing prior connection");
        let _ = previous.close.try_send(());
    }

    router::drain_spool_to(&state, &user_id, &tx).await;

    let mut ping_ticker = tokio::time::interval(PING_INTERVAL);
    ping_ticker.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            _ = close_rx.recv() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
            _ = ping_ticker.tick() => {
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(message) => {
                        let Ok(json) = serde_json::to_string(&message) else { continue };
                        if sink.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = tokio::time::timeout(READ_IDLE_TIMEOUT, stream.next()) => {
                match inbound {
                    Ok(Some(Ok(WsMessage::Text(text)))) => {
                        match serde_json::from_str::<Message>(&text) {
                            Ok(message) => router::route(&state, &user_id, message).await,
                            Err(e) => warn!(user_id = %user_id, err = %e, "dropping unparseable frame"),
                        }
                    }
                    Ok(Some(Ok(WsMessage::Close(_)))) => break,
                    Ok(Some(Ok(_))) => {} // ping/pong/binary: no application meaning here
                    Ok(Some(Err(e))) => {
                        warn!(user_id = %user_id, err = %e, "transport error");
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(user_id = %user_id, "idle timeout, closing connection");
                        break;
                    }
                }
            }
        }
    }

    state.remove_connection_matching(&user_id, &tx).await;
    info!(user_id = %user_id, "connection closed");
}
