// In-memory conversation registry and fanout
//
// The Hub is a process-global map of conversation handles; a handle's
// lifetime is the process's. Broadcast takes a read lock on the member set
// and does a non-blocking enqueue per client: a full queue or a closing
// client drops the frame for that client and never blocks the
// conversation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::realtime::envelope::Envelope;

/// Frames travelling through a connection's send queue
#[derive(Debug)]
pub enum OutboundFrame {
    Frame(Envelope),
    Ping(Vec<u8>),
    Close(u16, String),
}

pub type ClientId = u64;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_client_id() -> ClientId {
    NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A connected client as the hub sees it: identity plus the bounded send
/// queue entrance
pub struct ClientHandle {
    pub id: ClientId,
    pub user_id: String,
    pub session_id: String,
    sender: mpsc::Sender<OutboundFrame>,
    closing: AtomicBool,
}

impl ClientHandle {
    pub fn new(
        id: ClientId,
        user_id: String,
        session_id: String,
        sender: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        Self {
            id,
            user_id,
            session_id,
            sender,
            closing: AtomicBool::new(false),
        }
    }

    /// Non-blocking enqueue; false when the queue is full or the client is
    /// shutting down (the frame is dropped)
    pub fn enqueue(&self, frame: OutboundFrame) -> bool {
        if self.closing.load(Ordering::Acquire) {
            return false;
        }
        self.sender.try_send(frame).is_ok()
    }

    /// Mark the client as closing; subsequent enqueues drop
    pub fn begin_close(&self) {
        self.closing.store(true, Ordering::Release);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

/// One conversation's broadcast set
pub struct ConversationHandle {
    pub id: String,
    members: RwLock<HashMap<ClientId, Arc<ClientHandle>>>,
}

impl ConversationHandle {
    fn new(id: String) -> Self {
        Self {
            id,
            members: RwLock::new(HashMap::new()),
        }
    }

    pub async fn join(&self, client: Arc<ClientHandle>) {
        self.members.write().await.insert(client.id, client);
    }

    pub async fn leave(&self, client_id: ClientId) {
        self.members.write().await.remove(&client_id);
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Fan a frame out to every member. Returns how many deliveries were
    /// dropped by backpressure.
    pub async fn broadcast(&self, frame: &Envelope) -> usize {
        let members = self.members.read().await;
        let mut dropped = 0;

        for client in members.values() {
            if !client.enqueue(OutboundFrame::Frame(frame.clone())) {
                dropped += 1;
                debug!(
                    conversation = %self.id,
                    client = client.id,
                    "frame dropped by backpressure"
                );
            }
        }

        dropped
    }
}

/// Process-global registry of conversation handles
#[derive(Default)]
pub struct Hub {
    conversations: RwLock<HashMap<String, Arc<ConversationHandle>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup under the read lock
    pub async fn get(&self, conversation_id: &str) -> Option<Arc<ConversationHandle>> {
        self.conversations.read().await.get(conversation_id).cloned()
    }

    /// Get-or-create; creation takes the write lock
    pub async fn conversation(&self, conversation_id: &str) -> Arc<ConversationHandle> {
        if let Some(handle) = self.get(conversation_id).await {
            return handle;
        }

        let mut map = self.conversations.write().await;
        map.entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(ConversationHandle::new(conversation_id.to_string())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::envelope::{Envelope, T_MESSAGE_NEW};

    fn client(id: ClientId, capacity: usize) -> (Arc<ClientHandle>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Arc::new(ClientHandle::new(
            id,
            format!("user-{}", id),
            format!("session-{}", id),
            tx,
        ));
        (handle, rx)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_members() {
        let hub = Hub::new();
        let conv = hub.conversation("c1").await;

        let (a, mut rx_a) = client(1, 4);
        let (b, mut rx_b) = client(2, 4);
        conv.join(a).await;
        conv.join(b).await;

        let frame = Envelope::server(T_MESSAGE_NEW, serde_json::json!({"seq": 1}));
        let dropped = conv.broadcast(&frame).await;

        assert_eq!(dropped, 0);
        assert!(matches!(rx_a.recv().await, Some(OutboundFrame::Frame(_))));
        assert!(matches!(rx_b.recv().await, Some(OutboundFrame::Frame(_))));
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let hub = Hub::new();
        let conv = hub.conversation("c1").await;

        let (a, _rx) = client(1, 1);
        conv.join(a).await;

        let frame = Envelope::server(T_MESSAGE_NEW, serde_json::json!({"seq": 1}));
        assert_eq!(conv.broadcast(&frame).await, 0);
        // Queue capacity 1 is now exhausted; the second broadcast drops
        assert_eq!(conv.broadcast(&frame).await, 1);
    }

    #[tokio::test]
    async fn test_closing_client_receives_nothing() {
        let hub = Hub::new();
        let conv = hub.conversation("c1").await;

        let (a, mut rx) = client(1, 4);
        conv.join(a.clone()).await;
        a.begin_close();

        let frame = Envelope::server(T_MESSAGE_NEW, serde_json::json!({"seq": 1}));
        assert_eq!(conv.broadcast(&frame).await, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_removes_member() {
        let hub = Hub::new();
        let conv = hub.conversation("c1").await;

        let (a, _rx) = client(1, 4);
        conv.join(a.clone()).await;
        assert_eq!(conv.member_count().await, 1);

        conv.leave(a.id).await;
        assert_eq!(conv.member_count().await, 0);
    }

    #[tokio::test]
    async fn test_hub_returns_same_handle() {
        let hub = Hub::new();
        let first = hub.conversation("c1").await;
        let second = hub.conversation("c1").await;
        assert!(Arc::ptr_eq(&first, &second));
    }
}
