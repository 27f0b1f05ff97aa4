// Session database model with refresh-token rotation support
//
// A session row stores only the digest of its refresh token. Rotation forms
// a chain through replaced_by_session_id; the chain head is the single
// active session. The predicated update in rotate_locked makes rotation
// single-writer: at most one rotation can ever succeed per row.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::schema::sessions;
use crate::services::token_hash::{digest_eq, TokenHasher};
use crate::utils::{new_id, new_opaque_token};

/// Revocation reasons recorded on the session row
pub const REASON_ROTATION: &str = "rotation";
pub const REASON_LOGOUT: &str = "logout";
pub const REASON_REUSE_DETECTED: &str = "reuse_detected";

/// Device platform tag attached to each session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Web,
    Ios,
    Android,
    Desktop,
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Web => "web",
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Desktop => "desktop",
            Platform::Unknown => "unknown",
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Platform::Ios | Platform::Android | Platform::Desktop)
    }
}

impl From<&str> for Platform {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "web" => Platform::Web,
            "ios" => Platform::Ios,
            "android" => Platform::Android,
            "desktop" => Platform::Desktop,
            _ => Platform::Unknown,
        }
    }
}

/// Client metadata captured when a session is issued
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
}

/// Errors for session operations
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(diesel::result::Error),

    #[error("Session owner not found")]
    UserNotFound,

    #[error("Session not found")]
    NotFound,

    #[error("Session is not active")]
    NotActive,

    #[error("Refresh token hash collision")]
    HashCollision,
}

impl From<diesel::result::Error> for SessionError {
    fn from(err: diesel::result::Error) -> Self {
        match &err {
            diesel::result::Error::NotFound => SessionError::NotFound,
            diesel::result::Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                SessionError::UserNotFound
            },
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info)
                if info.constraint_name() == Some("sessions_refresh_token_hash_key") =>
            {
                tracing::error!("refresh token hash collision on insert");
                SessionError::HashCollision
            },
            _ => SessionError::Database(err),
        }
    }
}

/// Session database model
#[derive(
    Debug, Clone, Serialize, Deserialize, Queryable, QueryableByName, Selectable, Identifiable,
)]
#[diesel(table_name = sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub refresh_token_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_session_id: Option<String>,
    pub platform: String,
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
    pub revoked_reason: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sessions)]
struct NewSession {
    id: String,
    user_id: String,
    refresh_token_hash: String,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    platform: String,
    user_agent: Option<String>,
    client_ip: Option<String>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_replaced(&self) -> bool {
        self.replaced_by_session_id.is_some()
    }

    /// active: not revoked, not replaced, not expired
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_replaced() && !self.is_expired(now)
    }

    /// Create a session, returning the row and the refresh-token plaintext.
    /// The plaintext exists only in this return value; the row stores the
    /// digest. `ttl` is clamped to the configured default/max.
    pub async fn create(
        conn: &mut AsyncPgConnection,
        hasher: &TokenHasher,
        user_id: &str,
        ttl: Duration,
        platform: Platform,
        device: DeviceInfo,
        now: DateTime<Utc>,
    ) -> Result<(Session, String), SessionError> {
        let config = &crate::app_config::config().session;
        let max_ttl = Duration::days(config.max_ttl_days);
        let ttl = if ttl <= Duration::zero() {
            Duration::days(config.default_ttl_days)
        } else if ttl > max_ttl {
            max_ttl
        } else {
            ttl
        };

        let plaintext = new_opaque_token();
        let new_session = NewSession {
            id: new_id(),
            user_id: user_id.to_string(),
            refresh_token_hash: hasher.digest(&plaintext),
            created_at: now,
            last_used_at: now,
            expires_at: now + ttl,
            platform: platform.as_str().to_string(),
            user_agent: device.user_agent,
            client_ip: device.client_ip,
        };

        let session: Session = diesel::insert_into(sessions::table)
            .values(&new_session)
            .get_result(conn)
            .await?;

        Ok((session, plaintext))
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        session_id: &str,
    ) -> Result<Session, SessionError> {
        sessions::table
            .find(session_id)
            .select(Session::as_select())
            .first(conn)
            .await
            .map_err(Into::into)
    }

    /// Lock a session row by id with FOR UPDATE. Must run inside a
    /// transaction; concurrent rotators serialize here.
    pub async fn lock_by_id(
        conn: &mut AsyncPgConnection,
        session_id: &str,
    ) -> Result<Option<Session>, SessionError> {
        use diesel::sql_types::Text;

        diesel::sql_query(
            "SELECT id, user_id, refresh_token_hash, created_at, last_used_at, expires_at, \
             revoked_at, replaced_by_session_id, platform, user_agent, client_ip, revoked_reason \
             FROM sessions WHERE id = $1 FOR UPDATE",
        )
        .bind::<Text, _>(session_id)
        .get_result::<Session>(conn)
        .await
        .optional()
        .map_err(Into::into)
    }

    /// Lock a session row by refresh-token digest with FOR UPDATE
    pub async fn lock_by_refresh_hash(
        conn: &mut AsyncPgConnection,
        token_hash: &str,
    ) -> Result<Option<Session>, SessionError> {
        use diesel::sql_types::Text;

        diesel::sql_query(
            "SELECT id, user_id, refresh_token_hash, created_at, last_used_at, expires_at, \
             revoked_at, replaced_by_session_id, platform, user_agent, client_ip, revoked_reason \
             FROM sessions WHERE refresh_token_hash = $1 FOR UPDATE",
        )
        .bind::<Text, _>(token_hash)
        .get_result::<Session>(conn)
        .await
        .optional()
        .map_err(Into::into)
    }

    /// Rotate a refresh token. Every failure mode is the single NotActive
    /// error so callers cannot distinguish unknown, revoked, expired,
    /// replaced, or mismatched-token sessions through this operation.
    pub async fn rotate(
        conn: &mut AsyncPgConnection,
        hasher: &TokenHasher,
        session_id: &str,
        old_plain: &str,
        now: DateTime<Utc>,
    ) -> Result<(Session, String), SessionError> {
        let hasher = hasher.clone();
        let session_id = session_id.to_string();
        let old_plain = old_plain.to_string();
        conn.transaction::<_, SessionError, _>(|tx| {
            Box::pin(async move {
                let current = Session::lock_by_id(tx, &session_id)
                    .await?
                    .ok_or(SessionError::NotActive)?;
                Session::rotate_locked(tx, &hasher, &current, &old_plain, now).await
            })
        })
        .await
    }

    /// Rotation body over an already-locked row. Inserts the successor
    /// inheriting the original expires_at (rotation never extends
    /// lifetime), then retires the old row with a predicated update that
    /// re-asserts the full active predicate. Zero rows affected means a
    /// concurrent rotator won: NotActive.
    pub async fn rotate_locked(
        conn: &mut AsyncPgConnection,
        hasher: &TokenHasher,
        current: &Session,
        old_plain: &str,
        now: DateTime<Utc>,
    ) -> Result<(Session, String), SessionError> {
        if old_plain.len() > 4096 {
            return Err(SessionError::NotActive);
        }

        let old_hash = hasher.digest(old_plain);
        if !current.is_active(now) || !digest_eq(&current.refresh_token_hash, &old_hash) {
            return Err(SessionError::NotActive);
        }

        let plaintext = new_opaque_token();
        let successor = NewSession {
            id: new_id(),
            user_id: current.user_id.clone(),
            refresh_token_hash: hasher.digest(&plaintext),
            created_at: now,
            last_used_at: now,
            expires_at: current.expires_at,
            platform: current.platform.clone(),
            user_agent: current.user_agent.clone(),
            client_ip: current.client_ip.clone(),
        };

        let new_session: Session = diesel::insert_into(sessions::table)
            .values(&successor)
            .get_result(conn)
            .await?;

        let retired = diesel::update(
            sessions::table
                .filter(sessions::id.eq(&current.id))
                .filter(sessions::revoked_at.is_null())
                .filter(sessions::replaced_by_session_id.is_null())
                .filter(sessions::expires_at.gt(now))
                .filter(sessions::refresh_token_hash.eq(&old_hash)),
        )
        .set((
            sessions::revoked_at.eq(Some(now)),
            sessions::replaced_by_session_id.eq(Some(new_session.id.clone())),
            sessions::last_used_at.eq(now),
            sessions::revoked_reason.eq(Some(REASON_ROTATION)),
        ))
        .execute(conn)
        .await?;

        if retired == 0 {
            return Err(SessionError::NotActive);
        }

        Ok((new_session, plaintext))
    }

    /// Idempotent revocation; repeated calls leave the row unchanged
    pub async fn revoke(
        conn: &mut AsyncPgConnection,
        session_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        let updated = diesel::update(
            sessions::table
                .filter(sessions::id.eq(session_id))
                .filter(sessions::revoked_at.is_null()),
        )
        .set((
            sessions::revoked_at.eq(Some(now)),
            sessions::revoked_reason.eq(Some(reason)),
        ))
        .execute(conn)
        .await?;

        Ok(updated > 0)
    }

    /// Revoke every active session of a user; idempotent
    pub async fn revoke_all_for_user(
        conn: &mut AsyncPgConnection,
        user_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, SessionError> {
        let updated = diesel::update(
            sessions::table
                .filter(sessions::user_id.eq(user_id))
                .filter(sessions::revoked_at.is_null())
                .filter(sessions::expires_at.gt(now)),
        )
        .set((
            sessions::revoked_at.eq(Some(now)),
            sessions::revoked_reason.eq(Some(reason)),
        ))
        .execute(conn)
        .await?;

        Ok(updated)
    }

    /// Digest lookup returning the row only while active; everything else
    /// is NotActive
    pub async fn find_by_refresh_token(
        conn: &mut AsyncPgConnection,
        hasher: &TokenHasher,
        plain: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let token_hash = hasher.digest(plain);
        let session: Option<Session> = sessions::table
            .filter(sessions::refresh_token_hash.eq(&token_hash))
            .select(Session::as_select())
            .first(conn)
            .await
            .optional()?;

        match session {
            Some(session) if session.is_active(now) => Ok(session),
            _ => Err(SessionError::NotActive),
        }
    }

    /// Update last_used_at while the session is still active
    pub async fn touch_last_used(
        conn: &mut AsyncPgConnection,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let updated = diesel::update(
            sessions::table
                .filter(sessions::id.eq(session_id))
                .filter(sessions::revoked_at.is_null())
                .filter(sessions::replaced_by_session_id.is_null())
                .filter(sessions::expires_at.gt(now)),
        )
        .set(sessions::last_used_at.eq(now))
        .execute(conn)
        .await?;

        if updated == 0 {
            return Err(SessionError::NotActive);
        }
        Ok(())
    }

    /// All sessions of a user that are still active, newest first
    pub async fn list_active_for_user(
        conn: &mut AsyncPgConnection,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, SessionError> {
        sessions::table
            .filter(sessions::user_id.eq(user_id))
            .filter(sessions::revoked_at.is_null())
            .filter(sessions::replaced_by_session_id.is_null())
            .filter(sessions::expires_at.gt(now))
            .order(sessions::created_at.desc())
            .select(Session::as_select())
            .load(conn)
            .await
            .map_err(Into::into)
    }

    /// Delete rows that expired before the cutoff (periodic sweeper)
    pub async fn delete_expired_before(
        conn: &mut AsyncPgConnection,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, SessionError> {
        diesel::delete(sessions::table.filter(sessions::expires_at.le(cutoff)))
            .execute(conn)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session(now: DateTime<Utc>) -> Session {
        Session {
            id: "01J00000000000000000000SES".to_string(),
            user_id: "01J0000000000000000000USER".to_string(),
            refresh_token_hash: "a".repeat(64),
            created_at: now - Duration::hours(1),
            last_used_at: now - Duration::hours(1),
            expires_at: now + Duration::days(7),
            revoked_at: None,
            replaced_by_session_id: None,
            platform: "web".to_string(),
            user_agent: None,
            client_ip: None,
            revoked_reason: None,
        }
    }

    #[test]
    fn test_session_state_predicates() {
        let now = Utc::now();
        let active = sample_session(now);
        assert!(active.is_active(now));

        let expired = Session {
            expires_at: now - Duration::seconds(1),
            ..active.clone()
        };
        assert!(expired.is_expired(now));
        assert!(!expired.is_active(now));

        let revoked = Session {
            revoked_at: Some(now),
            revoked_reason: Some(REASON_LOGOUT.to_string()),
            ..active.clone()
        };
        assert!(revoked.is_revoked());
        assert!(!revoked.is_active(now));

        let rotated = Session {
            revoked_at: Some(now),
            replaced_by_session_id: Some("01J00000000000000000000NEW".to_string()),
            revoked_reason: Some(REASON_ROTATION.to_string()),
            ..active
        };
        assert!(rotated.is_replaced());
        assert!(!rotated.is_active(now));
    }

    #[test]
    fn test_platform_parsing_fails_to_unknown() {
        assert_eq!(Platform::from("web"), Platform::Web);
        assert_eq!(Platform::from("iOS"), Platform::Ios);
        assert_eq!(Platform::from("watch"), Platform::Unknown);
        assert!(Platform::from("android").is_native());
        assert!(!Platform::from("web").is_native());
    }
}
