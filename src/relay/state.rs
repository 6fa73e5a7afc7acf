use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};

use crate::auth::AuthService;
use crate::identity::IdentityRegistry;
use crate::message::Message;
use crate::storage::Storage;

/// Outbound write queue for one connection. Single-producer (router) /
/// single-consumer (that connection's write pump), bounded with
/// backpressure: a full queue causes the router to close the connection
/// rather than block or silently drop.
pub const WRITE_QUEUE_CAPACITY: usize = 256;

/// A connection's outbound handle: the write queue plus a side-channel
/// used to force-close the socket when it is replaced or backpressured.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub tx: mpsc::Sender<Message>,
    pub close: mpsc::Sender<()>,
}

impl ConnectionHandle {
    pub fn same_channel(&self, other: &ConnectionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

pub type WriteSender = ConnectionHandle;

/// Shared state for the relay: the live connection table, the offline
/// spool, and handles to the identity/auth/storage services.
pub struct RelayState {
    pub storage: Arc<Storage>,
    pub identity: Arc<IdentityRegistry>,
    pub auth: Arc<AuthService>,
    pub spool_capacity: usize,

    /// One entry per currently-connected user_id. A second connection
    /// for the same user replaces the first.
    connections: RwLock<HashMap<String, WriteSender>>,
    /// Per-recipient bounded FIFO of undelivered direct messages.
    spool: Mutex<HashMap<String, VecDeque<Message>>>,
}

impl RelayState {
    pub fn new(
        storage: Arc<Storage>,
        identity: Arc<IdentityRegistry>,
        auth: Arc<AuthService>,
        spool_capacity: usize,
    ) -> Self {
        Self {
            storage,
            identity,
            auth,
            spool_capacity,
            connections: RwLock::new(HashMap::new()),
            spool: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new live connection for `user_id`, replacing and
    /// returning the prior sender (if any) so the caller can close it
    /// with a normal-closure frame.
    pub async fn insert_connection(&self, user_id: String, tx: WriteSender) -> Option<WriteSender> {
        self.connections.write().await.insert(user_id, tx)
    }

    /// Remove a connection only if `tx` is still the registered sender
    /// for `user_id` — guards against a just-replaced connection
    /// clobbering the new one on teardown.
    pub async fn remove_connection_if_current(&self, user_id: &str, tx: &WriteSender) {
        self.remove_connection_matching(user_id, &tx.tx).await
    }

    /// As above, but compares only the message-queue half of the handle —
    /// lets a connection's own teardown code drop its entry without
    /// having to reconstruct a full `ConnectionHandle` just for the
    /// comparison.
    pub async fn remove_connection_matching(&self, user_id: &str, tx: &mpsc::Sender<Message>) {
        let mut connections = self.connections.write().await;
        if let Some(existing) = connections.get(user_id) {
            if existing.tx.same_channel(tx) {
                connections.remove(user_id);
            }
        }
    }

    pub async fn get_connection(&self, user_id: &str) -> Option<WriteSender> {
        self.connections.read().await.get(user_id).cloned()
    }

    pub async fn connected_user_ids(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.connections.read().await.contains_key(user_id)
    }

    /// Append to the recipient's spool, dropping the oldest entry if full.
    pub async fn spool_push(&self, recipient: &str, message: Message) {
        let mut spool = self.spool.lock().await;
        let queue = spool.entry(recipient.to_string()).or_default();
        if queue.len() >= self.spool_capacity {
            queue.pop_front();
        }
        queue.push_back(message);
    }

    /// Drain the recipient's spool in arrival order.
    pub async fn spool_drain(&self, recipient: &str) -> Vec<Message> {
        self.spool
            .lock()
            .await
            .remove(recipient)
            .map(Vec::from)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str) -> Message {
        Message {
            id: None,
            from: "alice".into(),
            to: "bob".into(),
            timestamp_ns: 0,
            content: content.into(),
            status: None,
            signature: None,
            is_forward_message: false,
        }
    }

    #[tokio::test]
    async fn spool_drops_oldest_when_full() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let identity = Arc::new(IdentityRegistry::new(storage.clone()));
        let auth = Arc::new(AuthService::new(identity.clone(), b"secret".to_vec(), 3600));
        let state = RelayState::new(storage, identity, auth, 3);

        for i in 0..5 {
            state.spool_push("bob", msg(&i.to_string())).await;
        }
        let drained = state.spool_drain("bob").await;
        let contents: Vec<_> = drained.iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn drain_empties_the_queue() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let identity = Arc::new(IdentityRegistry::new(storage.clone()));
        let auth = Arc::new(AuthService::new(identity.clone(), b"secret".to_vec(), 3600));
        let state = RelayState::new(storage, identity, auth, 3);

        state.spool_push("bob", msg("x")).await;
        assert_eq!(state.spool_drain("bob").await.len(), 1);
        assert_eq!(state.spool_drain("bob").await.len(), 0);
    }
}
