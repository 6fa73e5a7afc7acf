use std::sync::Arc;

use tracing::{debug, warn};

use crate::message::{Message, BROADCAST};
use crate::relay::state::RelayState;

/// Route one authenticated frame from `sender_user_id`.
///
/// `from` is stamped to the authenticated connection's user_id
/// regardless of what the client sent, preventing spoofing. Broadcasts
/// fan out to every other connected user; channel tags (`#foo`) are
/// treated as a degenerate broadcast to the same set, since this relay
/// has no notion of channel membership to narrow the fan-out to. Direct
/// messages go to the recipient's live write queue if connected, else
/// the offline spool.
pub async fn route(state: &Arc<RelayState>, sender_user_id: &str, mut message: Message) {
    message.from = sender_user_id.to_string();

    if message.is_broadcast() || message.is_channel() {
        let recipients = state.connected_user_ids().await;
        for user_id in recipients {
            if user_id == sender_user_id {
                continue;
            }
            deliver_live(state, &user_id, message.clone()).await;
        }
        return;
    }

    let recipient = message.to.clone();
    if state.is_online(&recipient).await {
        deliver_live(state, &recipient, message).await;
    } else {
        debug!(recipient = %recipient, "recipient offline, spooling");
        state.spool_push(&recipient, message).await;
    }
}

/// Enqueue `message` on `recipient`'s write queue. If the queue is full
/// the connection is considered backpressured and is torn down; the
/// relay prefers closing the slow reader over dropping frames silently —
/// the message itself falls back to the offline spool.
async fn deliver_live(state: &Arc<RelayState>, recipient: &str, message: Message) {
    let Some(handle) = state.get_connection(recipient).await else {
        state.spool_push(recipient, message).await;
        return;
    };

    match handle.tx.try_send(message.clone()) {
        Ok(()) => {}
        Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
            warn!(recipient = %recipient, "write queue full, closing connection");
            state.remove_connection_if_current(recipient, &handle).await;
            let _ = handle.close.try_send(());
            state.spool_push(recipient, message).await;
        }
        Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
            state.remove_connection_if_current(recipient, &handle).await;
            state.spool_push(recipient, message).await;
        }
    }
}

/// Drain a user's offline spool onto their fresh write queue, preserving
/// arrival order, before resuming normal traffic.
pub async fn drain_spool_to(state: &Arc<RelayState>, user_id: &str, tx: &tokio::sync::mpsc::Sender<Message>) {
    for message in state.spool_drain(user_id).await {
        if tx.send(message).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthService;
    use crate::identity::IdentityRegistry;
    use crate::storage::Storage;
    use tokio::sync::mpsc;

    fn msg(from: &str, to: &str, content: &str) -> Message {
        Message {
            id: None,
            from: from.into(),
            to: to.into(),
            timestamp_ns: 0,
            content: content.into(),
            status: None,
            signature: None,
            is_forward_message: false,
        }
    }

    async fn test_state() -> Arc<RelayState> {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let identity = Arc::new(IdentityRegistry::new(storage.clone()));
        let auth = Arc::new(AuthService::new(identity.clone(), b"secret".to_vec(), 3600));
        Arc::new(RelayState::new(storage, identity, auth, 256))
    }

    fn handle() -> (crate::relay::state::ConnectionHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        let (close, _close_rx) = mpsc::channel(1);
        (crate::relay::state::ConnectionHandle { tx, close }, rx)
    }

    #[tokio::test]
    async fn from_is_stamped_to_authenticated_sender() {
        let state = test_state().await;
        let (h, mut rx) = handle();
        state.insert_connection("bob".into(), h).await;

        route(&state, "alice", msg("mallory", "bob", "hi")).await;

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.from, "alice");
    }

    #[tokio::test]
    async fn offline_recipient_gets_spooled() {
        let state = test_state().await;
        route(&state, "alice", msg("alice", "bob", "hi")).await;
        let drained = state.spool_drain("bob").await;
        assert_eq!(drained.len(), 1);
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let state = test_state().await;
        let (h_bob, mut rx_bob) = handle();
        let (h_alice, mut rx_alice) = handle();
        state.insert_connection("bob".into(), h_bob).await;
        state.insert_connection("alice".into(), h_alice).await;

        route(&state, "alice", msg("alice", BROADCAST, "hello")).await;

        assert!(rx_bob.recv().await.is_some());
        assert!(rx_alice.try_recv().is_err());
    }
}
