pub mod http_client;
pub mod keycache;
pub mod keys;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ed25519_dalek::SigningKey;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};

use crate::client::http_client::HttpClient;
use crate::client::keycache::KeyCache;
use crate::config::ClientConfig;
use crate::crypto;
use crate::error::ClientError;
use crate::message::{Envelope, Message, MessageStatus, BROADCAST, SYSTEM_SENDER};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const PING_INTERVAL: Duration = Duration::from_secs(54);
const OUTBOUND_QUEUE_CAPACITY: usize = 256;
const INBOUND_QUEUE_CAPACITY: usize = 256;

/// The client's auto-reconnecting session (C6). Exposes an inbound
/// stream of received messages and an outbound `send` operation; owns
/// the WebSocket exclusively across reconnections.
pub struct ClientSession {
    outbound_tx: mpsc::Sender<Message>,
    inbound_rx: Mutex<mpsc::Receiver<Message>>,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ClientSession {
    /// Register (if unknown), log in, and start the reconnecting session
    /// loop in the background.
    pub async fn connect(config: ClientConfig) -> anyhow::Result<Self> {
        let signing_key = keys::load_or_generate(&config.private_key_path, &config.public_key_path)?;
        let http = Arc::new(HttpClient::new(&config.server_url));

        if !http.check_user_id(&config.user_id).await.unwrap_or(false) {
            http.register(&config.user_id, &config.user_id, &signing_key).await?;
        }
        let token = http.login(&config.user_id, &signing_key).await?;

        let keycache = Arc::new(KeyCache::new(
            http.clone(),
            &config.user_id,
            signing_key.verifying_key(),
        ));

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ws_url = http.ws_url(&config.server_url, &token);
        let reconnect_base = config.reconnect_base_secs;
        let reconnect_max = config.reconnect_max_secs;

        let task = tokio::spawn(session_loop(
            ws_url,
            signing_key,
            keycache,
            outbound_rx,
            inbound_tx,
            shutdown_rx,
            reconnect_base,
            reconnect_max,
        ));

        Ok(Self {
            outbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            shutdown_tx,
            task,
        })
    }

    /// Submit a message for delivery. Fails with `ClientError::Timeout`
    /// if the outbound queue cannot accept it within 10 s, or
    /// `ClientError::Terminated` if the session has been disconnected.
    pub async fn send(&self, to: &str, content: &str) -> Result<(), ClientError> {
        let message = Message {
            id: None,
            from: String::new(), // stamped by the relay on ingress
            to: to.to_string(),
            timestamp_ns: now_ns(),
            content: content.to_string(),
            status: None,
            signature: None,
            is_forward_message: false,
        };
        match tokio::time::timeout(SEND_TIMEOUT, self.outbound_tx.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClientError::Terminated),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Receive the next inbound message. Resolves to `None` once the
    /// session is terminated and no further messages are buffered.
    pub async fn recv(&self) -> Option<Message> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Terminate the session: both pumps observe this within one
    /// scheduling cycle, send a normal-closure frame, and exit without
    /// reconnecting.
    pub async fn disconnect(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[allow(clippy::too_many_arguments)]
async fn session_loop(
    ws_url: String,
    signing_key: SigningKey,
    keycache: Arc<KeyCache>,
    mut outbound_rx: mpsc::Receiver<Message>,
    inbound_tx: mpsc::Sender<Message>,
    mut shutdown_rx: watch::Receiver<bool>,
    reconnect_base: u64,
    reconnect_max: u64,
) {
    let mut backoff = Duration::from_secs(reconnect_base);

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        match transport::connect(&ws_url).await {
            Ok((sink, source)) => {
                info!("session connected");
                backoff = Duration::from_secs(reconnect_base);
                let outcome = run_connection(
                    sink,
                    source,
                    &signing_key,
                    &keycache,
                    &mut outbound_rx,
                    &inbound_tx,
                    &mut shutdown_rx,
                )
                .await;
                if outcome == ConnectionOutcome::Terminated {
                    return;
                }
            }
            Err(e) => {
                warn!(err = %e, backoff_secs = backoff.as_secs(), "dial failed, backing off");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
        }
        backoff = std::cmp::min(backoff * 2, Duration::from_secs(reconnect_max));
    }
}

#[derive(PartialEq, Eq)]
enum ConnectionOutcome {
    Terminated,
    Disconnected,
}

#[allow(clippy::too_many_arguments)]
async fn run_connection(
    mut sink: transport::WsSink,
    mut source: transport::WsSource,
    signing_key: &SigningKey,
    keycache: &Arc<KeyCache>,
    outbound_rx: &mut mpsc::Receiver<Message>,
    inbound_tx: &mpsc::Sender<Message>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> ConnectionOutcome {
    let mut ping_ticker = tokio::time::interval(PING_INTERVAL);
    ping_ticker.tick().await;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    let _ = tokio::time::timeout(CLOSE_WRITE_TIMEOUT, sink.send(WsMessage::Close(None))).await;
                    return ConnectionOutcome::Terminated;
                }
            }
            _ = ping_ticker.tick() => {
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    return ConnectionOutcome::Disconnected;
                }
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(message) => {
                        let Ok(signed) = prepare_outbound(signing_key, keycache, message).await else {
                            continue;
                        };
                        let Ok(json) = serde_json::to_string(&signed) else { continue };
                        if sink.send(WsMessage::Text(json)).await.is_err() {
                            return ConnectionOutcome::Disconnected;
                        }
                    }
                    None => return ConnectionOutcome::Terminated,
                }
            }
            inbound = tokio::time::timeout(READ_IDLE_TIMEOUT, source.next()) => {
                match inbound {
                    Ok(Some(Ok(WsMessage::Text(text)))) => {
                        if let Ok(mut message) = serde_json::from_str::<Message>(&text) {
                            process_inbound(&mut message, signing_key, keycache).await;
                            if inbound_tx.send(message).await.is_err() {
                                return ConnectionOutcome::Terminated;
                            }
                        }
                    }
                    Ok(Some(Ok(WsMessage::Close(_)))) => return ConnectionOutcome::Disconnected,
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => {
                        warn!(err = %e, "transport error, reconnecting");
                        return ConnectionOutcome::Disconnected;
                    }
                    Ok(None) => return ConnectionOutcome::Disconnected,
                    Err(_) => {
                        warn!("read idle timeout, reconnecting");
                        return ConnectionOutcome::Disconnected;
                    }
                }
            }
        }
    }
}

/// Sign (and, for direct messages, encrypt) an outbound message.
/// Encryption happens before signing so the signature covers the
/// ciphertext actually placed on the wire, not the plaintext.
async fn prepare_outbound(
    signing_key: &SigningKey,
    keycache: &Arc<KeyCache>,
    mut message: Message,
) -> anyhow::Result<Message> {
    if message.is_forward_message || message.from == SYSTEM_SENDER {
        return Ok(message);
    }

    if !message.is_broadcast() && !message.is_channel() {
        let recipient_key = keycache.resolve(&message.to).await?;
        let envelope = crypto::encrypt_envelope(&recipient_key, message.content.as_bytes())
            .context("encrypting direct message")?;
        message.content = serde_json::to_string(&envelope)?;
    }

    let canonical = message.canonical_bytes();
    message.signature = Some(crypto::sign(signing_key, &canonical));
    Ok(message)
}

/// Verify (and, for direct messages, decrypt) an inbound message.
/// Signature status is always recorded, even on decryption failure, so
/// the caller can distinguish a spoofed sender from an undeliverable
/// payload.
async fn process_inbound(message: &mut Message, signing_key: &SigningKey, keycache: &Arc<KeyCache>) {
    if message.is_forward_message || message.is_system() {
        return;
    }

    let canonical = message.canonical_bytes();
    let status = match &message.signature {
        None => MessageStatus::Unsigned,
        Some(sig) => match keycache.resolve(&message.from).await {
            Ok(key) if crypto::verify(&key, &canonical, sig) => MessageStatus::Verified,
            Ok(_) => MessageStatus::InvalidSignature,
            Err(_) => MessageStatus::Unverified,
        },
    };
    message.mark_status(status);

    if message.is_broadcast() || message.is_channel() {
        return;
    }

    match serde_json::from_str::<Envelope>(&message.content) {
        Ok(envelope) => match crypto::decrypt_envelope(signing_key, &envelope) {
            Ok(plaintext) => {
                if let Ok(text) = String::from_utf8(plaintext) {
                    message.content = text;
                }
            }
            Err(_) => message.mark_status(MessageStatus::DecryptionFailed),
        },
        Err(_) => message.mark_status(MessageStatus::DecryptionFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey as SK;
    use rand_core::OsRng;

    fn key() -> HttpClient {
        HttpClient::new("ws://127.0.0.1:4300/ws")
    }

    #[tokio::test]
    async fn direct_message_roundtrips_through_prepare_and_process() {
        let sender = SK::generate(&mut OsRng);
        let recipient = SK::generate(&mut OsRng);
        let http = Arc::new(key());
        let keycache = Arc::new(KeyCache::new(http, "alice", sender.verifying_key()));
        keycache
            .entries_for_test()
            .write()
            .await
            .insert("bob".into(), recipient.verifying_key());

        let outgoing = Message {
            id: None,
            from: "alice".into(),
            to: "bob".into(),
            timestamp_ns: 7,
            content: "hello".into(),
            status: None,
            signature: None,
            is_forward_message: false,
        };
        let mut prepared = prepare_outbound(&sender, &keycache, outgoing).await.unwrap();
        prepared.from = "alice".into(); // relay would stamp this on ingress

        let recipient_keycache = Arc::new(KeyCache::new(Arc::new(key()), "bob", recipient.verifying_key()));
        recipient_keycache
            .entries_for_test()
            .write()
            .await
            .insert("alice".into(), sender.verifying_key());

        process_inbound(&mut prepared, &recipient, &recipient_keycache).await;
        assert_eq!(prepared.content, "hello");
        assert_eq!(prepared.status.as_deref(), Some("verified"));
    }

    #[tokio::test]
    async fn broadcast_is_signed_but_not_encrypted() {
        let sender = SK::generate(&mut OsRng);
        let keycache = Arc::new(KeyCache::new(Arc::new(key()), "alice", sender.verifying_key()));

        let outgoing = Message {
            id: None,
            from: "alice".into(),
            to: BROADCAST.into(),
            timestamp_ns: 1,
            content: "hi all".into(),
            status: None,
            signature: None,
            is_forward_message: false,
        };
        let prepared = prepare_outbound(&sender, &keycache, outgoing).await.unwrap();
        assert_eq!(prepared.content, "hi all");
        assert!(prepared.signature.is_some());
    }

    #[tokio::test]
    async fn forward_message_bypasses_signing_and_encryption() {
        let sender = SK::generate(&mut OsRng);
        let keycache = Arc::new(KeyCache::new(Arc::new(key()), "alice", sender.verifying_key()));
        let outgoing = Message {
            id: None,
            from: "carol".into(),
            to: "dave".into(),
            timestamp_ns: 1,
            content: "raw".into(),
            status: None,
            signature: None,
            is_forward_message: true,
        };
        let prepared = prepare_outbound(&sender, &keycache, outgoing).await.unwrap();
        assert_eq!(prepared.content, "raw");
        assert!(prepared.signature.is_none());
    }
}
