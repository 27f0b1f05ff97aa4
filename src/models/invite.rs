// Invite database model with single-shot consumption
//
// An invite stores only the digest of its token. Consumption is a
// predicated UPDATE ... RETURNING so concurrent consumers of a single-use
// invite resolve to exactly one winner. The consume-and-create-user
// composite runs invite, user, credential, and first session in one
// transaction; an identifier conflict rolls the whole thing back and no
// invite use is burned.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::models::session::{DeviceInfo, Platform, Session, SessionError};
use crate::models::user::{NewUserSpec, User, UserError};
use crate::schema::invites;
use crate::services::token_hash::TokenHasher;
use crate::utils::{new_id, new_opaque_token};

/// Maximum invite note length in characters
pub const MAX_NOTE_LEN: usize = 512;

/// Errors for invite operations
#[derive(thiserror::Error, Debug)]
pub enum InviteError {
    #[error("Database error: {0}")]
    Database(diesel::result::Error),

    #[error("Invite not found")]
    NotFound,

    #[error("Invite is not active")]
    NotActive,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict on {0}")]
    Conflict(String),
}

impl From<diesel::result::Error> for InviteError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => InviteError::NotFound,
            other => InviteError::Database(other),
        }
    }
}

impl From<UserError> for InviteError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::Conflict(field) => InviteError::Conflict(field),
            UserError::InvalidInput(msg) => InviteError::InvalidInput(msg),
            UserError::NotFound => InviteError::NotFound,
            UserError::Database(e) => InviteError::Database(e),
            UserError::Password(e) => InviteError::InvalidInput(e.to_string()),
        }
    }
}

impl From<SessionError> for InviteError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Database(e) => InviteError::Database(e),
            other => InviteError::InvalidInput(other.to_string()),
        }
    }
}

/// Invite database model
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = invites)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Invite {
    pub id: String,
    pub token_hash: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_uses: i32,
    pub used_count: i32,
    pub revoked_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub consumed_by: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = invites)]
struct NewInvite {
    id: String,
    token_hash: String,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    max_uses: i32,
    note: Option<String>,
}

/// Result of the consume-and-create-user composite
#[derive(Debug)]
pub struct ConsumedSignup {
    pub invite_id: String,
    pub user: User,
    pub session: Session,
    pub refresh_token: String,
}

impl Invite {
    /// active: not revoked, not expired, uses remaining
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now && self.used_count < self.max_uses
    }

    /// Create an invite, returning the row and the token plaintext (shown
    /// exactly once)
    pub async fn create(
        conn: &mut AsyncPgConnection,
        hasher: &TokenHasher,
        created_by: Option<&str>,
        ttl: Duration,
        max_uses: i32,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(Invite, String), InviteError> {
        if let Some(note) = &note {
            if note.chars().count() > MAX_NOTE_LEN {
                return Err(InviteError::InvalidInput(format!(
                    "note exceeds {} characters",
                    MAX_NOTE_LEN
                )));
            }
        }
        if max_uses < 1 {
            return Err(InviteError::InvalidInput("max_uses must be >= 1".to_string()));
        }
        if ttl <= Duration::zero() {
            return Err(InviteError::InvalidInput("ttl must be positive".to_string()));
        }

        let plaintext = new_opaque_token();
        let new_invite = NewInvite {
            id: new_id(),
            token_hash: hasher.digest(&plaintext),
            created_by: created_by.map(str::to_string),
            created_at: now,
            expires_at: now + ttl,
            max_uses,
            note,
        };

        let invite: Invite = diesel::insert_into(invites::table)
            .values(&new_invite)
            .get_result(conn)
            .await?;

        Ok((invite, plaintext))
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        invite_id: &str,
    ) -> Result<Invite, InviteError> {
        invites::table
            .find(invite_id)
            .select(Invite::as_select())
            .first(conn)
            .await
            .map_err(Into::into)
    }

    /// Digest lookup; NotFound when no row carries this token
    pub async fn find_by_token(
        conn: &mut AsyncPgConnection,
        hasher: &TokenHasher,
        plain: &str,
    ) -> Result<Invite, InviteError> {
        let token_hash = hasher.digest(plain);
        invites::table
            .filter(invites::token_hash.eq(&token_hash))
            .select(Invite::as_select())
            .first(conn)
            .await
            .map_err(Into::into)
    }

    /// Predicated consumption: increments used_count and stamps the
    /// most-recent consumption under the active predicate. Zero rows are
    /// classified NotFound vs NotActive by a follow-up select.
    pub async fn consume(
        conn: &mut AsyncPgConnection,
        hasher: &TokenHasher,
        plain: &str,
        consumed_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Invite, InviteError> {
        let token_hash = hasher.digest(plain);
        Self::consume_by_hash(conn, &token_hash, consumed_by, now).await
    }

    async fn consume_by_hash(
        conn: &mut AsyncPgConnection,
        token_hash: &str,
        consumed_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Invite, InviteError> {
        let consumed: Option<Invite> = diesel::update(
            invites::table
                .filter(invites::token_hash.eq(token_hash))
                .filter(invites::revoked_at.is_null())
                .filter(invites::expires_at.gt(now))
                .filter(invites::used_count.lt(invites::max_uses)),
        )
        .set((
            invites::used_count.eq(invites::used_count + 1),
            invites::consumed_at.eq(Some(now)),
            invites::consumed_by.eq(consumed_by),
        ))
        .get_result(conn)
        .await
        .optional()?;

        match consumed {
            Some(invite) => Ok(invite),
            None => {
                let exists: Option<Invite> = invites::table
                    .filter(invites::token_hash.eq(token_hash))
                    .select(Invite::as_select())
                    .first(conn)
                    .await
                    .optional()?;
                match exists {
                    Some(_) => Err(InviteError::NotActive),
                    None => Err(InviteError::NotFound),
                }
            },
        }
    }

    /// Atomic composite: consume the invite, create user + credential, and
    /// issue the first session, all in one transaction
    #[allow(clippy::too_many_arguments)]
    pub async fn consume_and_create_user(
        conn: &mut AsyncPgConnection,
        hasher: &TokenHasher,
        plain: &str,
        spec: NewUserSpec,
        session_ttl: Duration,
        platform: Platform,
        device: DeviceInfo,
        now: DateTime<Utc>,
    ) -> Result<ConsumedSignup, InviteError> {
        let token_hash = hasher.digest(plain);
        let hasher = hasher.clone();
        conn.transaction::<_, InviteError, _>(|tx| {
            Box::pin(async move {
                // The consumer's id is allocated up front so consumed_by can
                // be stamped in the same predicated update
                let user_id = new_id();

                let invite =
                    Self::consume_by_hash(tx, &token_hash, Some(user_id.as_str()), now).await?;

                let user = User::insert_with_credential(tx, user_id, spec, now).await?;

                let (session, refresh_token) = Session::create(
                    tx,
                    &hasher,
                    &user.id,
                    session_ttl,
                    platform,
                    device,
                    now,
                )
                .await?;

                Ok(ConsumedSignup {
                    invite_id: invite.id,
                    user,
                    session,
                    refresh_token,
                })
            })
        })
        .await
    }

    /// Idempotent revocation by id
    pub async fn revoke(
        conn: &mut AsyncPgConnection,
        invite_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, InviteError> {
        let updated = diesel::update(
            invites::table
                .filter(invites::id.eq(invite_id))
                .filter(invites::revoked_at.is_null()),
        )
        .set(invites::revoked_at.eq(Some(now)))
        .execute(conn)
        .await?;

        Ok(updated > 0)
    }

    /// Delete rows that expired before the cutoff (periodic sweeper)
    pub async fn delete_expired_before(
        conn: &mut AsyncPgConnection,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, InviteError> {
        diesel::delete(invites::table.filter(invites::expires_at.le(cutoff)))
            .execute(conn)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_invite(now: DateTime<Utc>) -> Invite {
        Invite {
            id: "01J00000000000000000000INV".to_string(),
            token_hash: "b".repeat(64),
            created_by: None,
            created_at: now,
            expires_at: now + Duration::days(7),
            max_uses: 1,
            used_count: 0,
            revoked_at: None,
            note: None,
            consumed_at: None,
            consumed_by: None,
        }
    }

    #[test]
    fn test_invite_active_predicate() {
        let now = Utc::now();
        let invite = sample_invite(now);
        assert!(invite.is_active(now));

        let exhausted = Invite {
            used_count: 1,
            ..invite.clone()
        };
        assert!(!exhausted.is_active(now));

        let expired = Invite {
            expires_at: now - Duration::seconds(1),
            ..invite.clone()
        };
        assert!(!expired.is_active(now));

        let revoked = Invite {
            revoked_at: Some(now),
            ..invite
        };
        assert!(!revoked.is_active(now));
    }

    #[test]
    fn test_multi_use_invite_stays_active_until_exhausted() {
        let now = Utc::now();
        let invite = Invite {
            max_uses: 3,
            used_count: 2,
            ..sample_invite(now)
        };
        assert!(invite.is_active(now));

        let exhausted = Invite {
            used_count: 3,
            ..invite
        };
        assert!(!exhausted.is_active(now));
    }
}
