// Conversation, membership, cursor, and message database models
//
// AppendMessage allocates per-conversation sequence numbers under a
// transactional advisory lock keyed by the conversation id: all writers for
// one conversation serialize, unrelated conversations never block, and the
// allocated sequences are strictly 1, 2, 3, ... with no gaps. A repeated
// (conversation_id, client_msg_id) returns the original row with
// duplicated=true.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::schema::{conversation_cursors, conversation_members, conversations, messages};
use crate::utils::new_server_msg_id;

/// Maximum stored message length in characters
pub const MAX_STORED_TEXT_CHARS: usize = 4096;

/// Conversation kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
    Room,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
            ConversationKind::Room => "room",
        }
    }
}

impl From<&str> for ConversationKind {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "direct" => ConversationKind::Direct,
            "group" => ConversationKind::Group,
            _ => ConversationKind::Room,
        }
    }
}

/// Conversation visibility; unknown values collapse to private (fail closed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl From<&str> for Visibility {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "public" => Visibility::Public,
            _ => Visibility::Private,
        }
    }
}

/// Errors for message-store operations
#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Membership change not permitted: {0}")]
    NotPermitted(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Conversation row
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = conversations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Conversation {
    pub id: String,
    pub kind: String,
    pub visibility: String,
    pub created_at: DateTime<Utc>,
}

/// Message row
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MessageRow {
    pub conversation_id: String,
    pub seq: i64,
    pub server_msg_id: String,
    pub client_msg_id: String,
    pub sender_user_id: String,
    pub sender_session: String,
    pub body: String,
    pub server_ts: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
struct NewMessageRow {
    conversation_id: String,
    seq: i64,
    server_msg_id: String,
    client_msg_id: String,
    sender_user_id: String,
    sender_session: String,
    body: String,
    server_ts: DateTime<Utc>,
}

/// Inputs for an append
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub conversation_id: String,
    pub kind: ConversationKind,
    pub client_msg_id: String,
    pub sender_user_id: String,
    pub sender_session: String,
    pub text: String,
}

/// A stored message plus the idempotency verdict
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub row: MessageRow,
    pub duplicated: bool,
}

/// Take the conversation's transactional advisory lock. Must run inside a
/// transaction; released automatically at commit/rollback.
async fn lock_conversation(
    conn: &mut AsyncPgConnection,
    conversation_id: &str,
) -> Result<(), MessageError> {
    use diesel::sql_types::Text;

    diesel::sql_query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind::<Text, _>(conversation_id)
        .execute(conn)
        .await?;
    Ok(())
}

impl MessageRow {
    /// Append a message with idempotent, gap-free sequence allocation
    pub async fn append(
        conn: &mut AsyncPgConnection,
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

        conn.transaction::<_, MessageError, _>(|tx| {
            Box::pin(async move {
                lock_conversation(tx, &request.conversation_id).await?;

                diesel::insert_into(conversations::table)
                    .values((
                        conversations::id.eq(&request.conversation_id),
                        conversations::kind.eq(request.kind.as_str()),
                        conversations::visibility.eq(Visibility::Private.as_str()),
                        conversations::created_at.eq(now),
                    ))
                    .on_conflict(conversations::id)
                    .do_nothing()
                    .execute(tx)
                    .await?;

                // Idempotency: a replayed client_msg_id returns the original
                let existing: Option<MessageRow> = messages::table
                    .filter(messages::conversation_id.eq(&request.conversation_id))
                    .filter(messages::client_msg_id.eq(&request.client_msg_id))
                    .select(MessageRow::as_select())
                    .first(tx)
                    .await
                    .optional()?;

                if let Some(row) = existing {
                    return Ok(StoredMessage {
                        row,
                        duplicated: true,
                    });
                }

                diesel::insert_into(conversation_cursors::table)
                    .values((
                        conversation_cursors::conversation_id.eq(&request.conversation_id),
                        conversation_cursors::next_seq.eq(1i64),
                    ))
                    .on_conflict(conversation_cursors::conversation_id)
                    .do_nothing()
                    .execute(tx)
                    .await?;

                let advanced: i64 = diesel::update(
                    conversation_cursors::table
                        .filter(conversation_cursors::conversation_id.eq(&request.conversation_id)),
                )
                .set(conversation_cursors::next_seq.eq(conversation_cursors::next_seq + 1))
                .returning(conversation_cursors::next_seq)
                .get_result(tx)
                .await?;
                let seq = advanced - 1;

                let new_row = NewMessageRow {
                    conversation_id: request.conversation_id.clone(),
                    seq,
                    server_msg_id: new_server_msg_id(),
                    client_msg_id: request.client_msg_id.clone(),
                    sender_user_id: request.sender_user_id.clone(),
                    sender_session: request.sender_session.clone(),
                    body: request.text.clone(),
                    server_ts: now,
                };

                let row: MessageRow = diesel::insert_into(messages::table)
                    .values(&new_row)
                    .get_result(tx)
                    .await?;

                Ok(StoredMessage {
                    row,
                    duplicated: false,
                })
            })
        })
        .await
    }

    /// Ascending history after a sequence number; limit is clamped by the
    /// caller. has_more reports whether rows beyond the page exist.
    pub async fn fetch_history(
        conn: &mut AsyncPgConnection,
        conversation_id: &str,
        after_seq: i64,
        limit: i64,
    ) -> Result<(Vec<MessageRow>, bool), MessageError> {
        let rows: Vec<MessageRow> = messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .filter(messages::seq.gt(after_seq))
            .order(messages::seq.asc())
            .limit(limit + 1)
            .select(MessageRow::as_select())
            .load(conn)
            .await?;

        let has_more = rows.len() as i64 > limit;
        let page = rows.into_iter().take(limit as usize).collect();
        Ok((page, has_more))
    }
}

impl Conversation {
    /// Visibility of a conversation; unknown conversations and unknown
    /// values read as private (fail closed)
    pub async fn visibility(
        conn: &mut AsyncPgConnection,
        conversation_id: &str,
    ) -> Result<Option<Visibility>, MessageError> {
        let raw: Option<String> = conversations::table
            .find(conversation_id)
            .select(conversations::visibility)
            .first(conn)
            .await
            .optional()?;

        Ok(raw.map(|v| Visibility::from(v.as_str())))
    }

    pub async fn is_member(
        conn: &mut AsyncPgConnection,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, MessageError> {
        use diesel::dsl::count_star;

        let count: i64 = conversation_members::table
            .filter(conversation_members::conversation_id.eq(conversation_id))
            .filter(conversation_members::user_id.eq(user_id))
            .select(count_star())
            .get_result(conn)
            .await?;

        Ok(count > 0)
    }

    /// Add a member. Permitted only on private conversations; unknown
    /// conversations are rejected.
    pub async fn add_member(
        conn: &mut AsyncPgConnection,
        conversation_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), MessageError> {
        match Self::visibility(conn, conversation_id).await? {
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

        diesel::insert_into(conversation_members::table)
            .values((
                conversation_members::conversation_id.eq(conversation_id),
                conversation_members::user_id.eq(user_id),
                conversation_members::joined_at.eq(now),
                conversation_members::role.eq("member"),
            ))
            .on_conflict((
                conversation_members::conversation_id,
                conversation_members::user_id,
            ))
            .do_nothing()
            .execute(conn)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_fails_closed() {
        assert_eq!(Visibility::from("public"), Visibility::Public);
        assert_eq!(Visibility::from("private"), Visibility::Private);
        assert_eq!(Visibility::from("internal"), Visibility::Private);
        assert_eq!(Visibility::from(""), Visibility::Private);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(ConversationKind::from("direct"), ConversationKind::Direct);
        assert_eq!(ConversationKind::from("GROUP"), ConversationKind::Group);
        assert_eq!(ConversationKind::from("anything"), ConversationKind::Room);
    }
}
