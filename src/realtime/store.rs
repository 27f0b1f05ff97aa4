// Message and membership stores behind capability traits
//
// Production uses the database-backed implementations; the dev profile and
// tests substitute the in-memory variants. Both honor the same laws:
// gap-free per-conversation sequences, idempotent appends, and fail-closed
// membership.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::db::DieselPool;
use crate::models::message::{
    AppendRequest, Conversation, MessageError, MessageRow, StoredMessage, Visibility,
    MAX_STORED_TEXT_CHARS,
};
use crate::utils::new_server_msg_id;

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(
        &self,
        request: AppendRequest,
        now: DateTime<Utc>,
    ) -> Result<StoredMessage, MessageError>;

    async fn fetch_history(
        &self,
        conversation_id: &str,
        after_seq: i64,
        limit: i64,
    ) -> Result<(Vec<MessageRow>, bool), MessageError>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn is_member(&self, conversation_id: &str, user_id: &str)
        -> Result<bool, MessageError>;

    /// Permitted only on private conversations
    async fn add_member(
        &self,
        conversation_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), MessageError>;

    /// None for unknown conversations (callers treat as private non-member)
    async fn visibility(&self, conversation_id: &str) -> Result<Option<Visibility>, MessageError>;
}

// =============================================================================
// DATABASE-BACKED IMPLEMENTATIONS
// =============================================================================

pub struct PgMessageStore {
    pool: DieselPool,
}

impl PgMessageStore {
    pub fn new(pool: DieselPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append_message(
        &self,
        request: AppendRequest,
        now: DateTime<Utc>,
    ) -> Result<StoredMessage, MessageError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| MessageError::Unavailable(e.to_string()))?;
        MessageRow::append(&mut conn, request, now).await
    }

    async fn fetch_history(
        &self,
        conversation_id: &str,
        after_seq: i64,
        limit: i64,
    ) -> Result<(Vec<MessageRow>, bool), MessageError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| MessageError::Unavailable(e.to_string()))?;
        MessageRow::fetch_history(&mut conn, conversation_id, after_seq, limit).await
    }
}

pub struct PgMembershipStore {
    pool: DieselPool,
}

impl PgMembershipStore {
    pub fn new(pool: DieselPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    async fn is_member(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, MessageError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| MessageError::Unavailable(e.to_string()))?;
        Conversation::is_member(&mut conn, conversation_id, user_id).await
    }

    async fn add_member(
        &self,
        conversation_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), MessageError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| MessageError::Unavailable(e.to_string()))?;
        Conversation::add_member(&mut conn, conversation_id, user_id, now).await
    }

    async fn visibility(&self, conversation_id: &str) -> Result<Option<Visibility>, MessageError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| MessageError::Unavailable(e.to_string()))?;
        Conversation::visibility(&mut conn, conversation_id).await
    }
}

// =============================================================================
// IN-MEMORY IMPLEMENTATIONS (dev profile / tests)
// =============================================================================

#[derive(Default)]
struct MemConversation {
    next_seq: i64,
    by_client_msg_id: HashMap<String, usize>,
    rows: Vec<MessageRow>,
}

#[derive(Default)]
pub struct InMemoryMessageStore {
    conversations: Mutex<HashMap<String, MemConversation>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append_message(
        &self,
        request: AppendRequest,
        now: DateTime<Utc>,
    ) -> Result<StoredMessage, MessageError> {
        let chars = request.text.chars().count();
        if chars == 0 || chars > MAX_STORED_TEXT_CHARS {
            return Err(MessageError::InvalidInput(format!(
                "text must be 1..={} characters",
                MAX_STORED_TEXT_CHARS
            )));
        }
        if request.client_msg_id.is_empty() {
            return Err(MessageError::InvalidInput(
                "client_msg_id is required".to_string(),
            ));
        }

        // The mutex plays the advisory lock's role: one writer per map
        let mut conversations = self.conversations.lock().await;
        let conversation = conversations
            .entry(request.conversation_id.clone())
            .or_insert_with(|| MemConversation {
                next_seq: 1,
                ..Default::default()
            });

        if let Some(&idx) = conversation.by_client_msg_id.get(&request.client_msg_id) {
            return Ok(StoredMessage {
                row: conversation.rows[idx].clone(),
                duplicated: true,
            });
        }

        let seq = conversation.next_seq;
        conversation.next_seq += 1;

        let row = MessageRow {
            conversation_id: request.conversation_id.clone(),
            seq,
            server_msg_id: new_server_msg_id(),
            client_msg_id: request.client_msg_id.clone(),
            sender_user_id: request.sender_user_id.clone(),
            sender_session: request.sender_session.clone(),
            body: request.text.clone(),
            server_ts: now,
        };

        conversation
            .by_client_msg_id
            .insert(request.client_msg_id.clone(), conversation.rows.len());
        conversation.rows.push(row.clone());

        Ok(StoredMessage {
            row,
            duplicated: false,
        })
    }

    async fn fetch_history(
        &self,
        conversation_id: &str,
        after_seq: i64,
        limit: i64,
    ) -> Result<(Vec<MessageRow>, bool), MessageError> {
        let conversations = self.conversations.lock().await;
        let Some(conversation) = conversations.get(conversation_id) else {
            return Ok((Vec::new(), false));
        };

        // Rows are stored in ascending seq order by construction
        let matching: Vec<MessageRow> = conversation
            .rows
            .iter()
            .filter(|row| row.seq > after_seq)
            .cloned()
            .collect();

        let has_more = matching.len() as i64 > limit;
        let page = matching.into_iter().take(limit as usize).collect();
        Ok((page, has_more))
    }
}

#[derive(Default)]
pub struct InMemoryMembershipStore {
    visibility: Mutex<HashMap<String, Visibility>>,
    members: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation with an explicit visibility
    pub async fn create_conversation(&self, conversation_id: &str, visibility: Visibility) {
        self.visibility
            .lock()
            .await
            .insert(conversation_id.to_string(), visibility);
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn is_member(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, MessageError> {
        let members = self.members.lock().await;
        Ok(members
            .get(conversation_id)
            .map(|list| list.iter().any(|m| m == user_id))
            .unwrap_or(false))
    }

    async fn add_member(
        &self,
        conversation_id: &str,
        user_id: &str,
        _now: DateTime<Utc>,
    ) -> Result<(), MessageError> {
        match self.visibility.lock().await.get(conversation_id) {
            Some(Visibility::Private) => {},
            Some(Visibility::Public) => {
                return Err(MessageError::NotPermitted(
                    "members can only be added to private conversations".to_string(),
                ));
            },
            None => {
                return Err(MessageError::NotPermitted(
                    "unknown conversation".to_string(),
                ));
            },
        }

        let mut members = self.members.lock().await;
        let list = members.entry(conversation_id.to_string()).or_default();
        if !list.iter().any(|m| m == user_id) {
            list.push(user_id.to_string());
        }
        Ok(())
    }

    async fn visibility(&self, conversation_id: &str) -> Result<Option<Visibility>, MessageError> {
        Ok(self.visibility.lock().await.get(conversation_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::ConversationKind;

    fn append_request(conversation: &str, client_msg_id: &str, text: &str) -> AppendRequest {
        AppendRequest {
            conversation_id: conversation.to_string(),
            kind: ConversationKind::Room,
            client_msg_id: client_msg_id.to_string(),
            sender_user_id: "user-1".to_string(),
            sender_session: "session-1".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_sequences_are_gap_free() {
        let store = InMemoryMessageStore::new();
        let now = Utc::now();

        for i in 1..=5 {
            let stored = store
                .append_message(append_request("c1", &format!("m{}", i), "hello"), now)
                .await
                .unwrap();
            assert_eq!(stored.row.seq, i);
            assert!(!stored.duplicated);
        }
    }

    #[tokio::test]
    async fn test_duplicate_append_returns_original() {
        let store = InMemoryMessageStore::new();
        let now = Utc::now();

        let first = store
            .append_message(append_request("c1", "m1", "hello"), now)
            .await
            .unwrap();
        let second = store
            .append_message(append_request("c1", "m1", "hello"), now)
            .await
            .unwrap();

        assert!(!first.duplicated);
        assert!(second.duplicated);
        assert_eq!(first.row.seq, second.row.seq);
        assert_eq!(first.row.server_msg_id, second.row.server_msg_id);

        // The duplicate did not burn a sequence number
        let third = store
            .append_message(append_request("c1", "m2", "next"), now)
            .await
            .unwrap();
        assert_eq!(third.row.seq, 2);
    }

    #[tokio::test]
    async fn test_history_pagination() {
        let store = InMemoryMessageStore::new();
        let now = Utc::now();

        for i in 1..=7 {
            store
                .append_message(append_request("c1", &format!("m{}", i), "hello"), now)
                .await
                .unwrap();
        }

        let (page, has_more) = store.fetch_history("c1", 2, 3).await.unwrap();
        assert_eq!(page.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert!(has_more);

        let (page, has_more) = store.fetch_history("c1", 5, 10).await.unwrap();
        assert_eq!(page.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![6, 7]);
        assert!(!has_more);

        let (page, has_more) = store.fetch_history("unknown", 0, 10).await.unwrap();
        assert!(page.is_empty());
        assert!(!has_more);
    }

    #[tokio::test]
    async fn test_text_boundaries() {
        let store = InMemoryMessageStore::new();
        let now = Utc::now();

        assert!(store
            .append_message(append_request("c1", "m0", ""), now)
            .await
            .is_err());

        let at_limit = "x".repeat(MAX_STORED_TEXT_CHARS);
        assert!(store
            .append_message(append_request("c1", "m1", &at_limit), now)
            .await
            .is_ok());

        let over_limit = "x".repeat(MAX_STORED_TEXT_CHARS + 1);
        assert!(store
            .append_message(append_request("c1", "m2", &over_limit), now)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_membership_fails_closed() {
        let store = InMemoryMembershipStore::new();

        assert!(!store.is_member("unknown", "user-1").await.unwrap());
        assert!(store.visibility("unknown").await.unwrap().is_none());
        assert!(store.add_member("unknown", "user-1", Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_add_member_only_on_private() {
        let store = InMemoryMembershipStore::new();
        let now = Utc::now();

        store.create_conversation("open", Visibility::Public).await;
        store.create_conversation("closed", Visibility::Private).await;

        assert!(store.add_member("open", "user-1", now).await.is_err());
        assert!(store.add_member("closed", "user-1", now).await.is_ok());
        assert!(store.is_member("closed", "user-1").await.unwrap());
    }
}
