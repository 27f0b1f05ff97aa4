// Session issuance, validation, and refresh rotation with reuse detection
//
// Wraps the session model and the access-token manager. A refresh token
// whose session was already replaced is a reuse incident: every session the
// user holds is revoked in the same transaction that observed the reuse.

use chrono::{DateTime, Duration, Utc};
use diesel_async::AsyncConnection;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::db::DieselPool;
use crate::models::session::{
    DeviceInfo, Platform, Session, SessionError, REASON_LOGOUT, REASON_REUSE_DETECTED,
};
use crate::services::access_token::{AccessClaims, AccessTokenError, AccessTokenManager};
use crate::services::token_hash::TokenHasher;

/// Refresh-token plaintext sanity bound on rotation
const MAX_REFRESH_PLAINTEXT_LEN: usize = 4096;

/// Errors surfaced by session validation and refresh
#[derive(Error, Debug)]
pub enum SessionServiceError {
    #[error("Invalid access token")]
    InvalidToken,

    #[error("Access token expired")]
    TokenExpired,

    #[error("Session revoked")]
    SessionRevoked,

    #[error("Session expired")]
    SessionExpired,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Refresh token reuse detected")]
    RefreshReuseDetected,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<diesel::result::Error> for SessionServiceError {
    fn from(err: diesel::result::Error) -> Self {
        SessionServiceError::Storage(err.to_string())
    }
}

impl From<SessionError> for SessionServiceError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => SessionServiceError::SessionNotFound,
            SessionError::NotActive => SessionServiceError::SessionNotFound,
            other => SessionServiceError::Storage(other.to_string()),
        }
    }
}

impl From<AccessTokenError> for SessionServiceError {
    fn from(err: AccessTokenError) -> Self {
        match err {
            AccessTokenError::TokenExpired => SessionServiceError::TokenExpired,
            _ => SessionServiceError::InvalidToken,
        }
    }
}

/// Everything a client needs after login, signup, or refresh
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub session_id: String,
    pub user_id: String,
    pub platform: String,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Session lifecycle service
pub struct SessionService {
    pool: DieselPool,
    hasher: TokenHasher,
    tokens: AccessTokenManager,
}

impl SessionService {
    pub fn new(pool: DieselPool, hasher: TokenHasher, tokens: AccessTokenManager) -> Self {
        Self {
            pool,
            hasher,
            tokens,
        }
    }

    /// Refresh TTL by platform: web gets the web TTL, native devices get
    /// the long TTL only with remember_me, unknown platforms collapse to web
    pub fn refresh_ttl_for(&self, platform: Platform, remember_me: bool) -> Duration {
        let config = &crate::app_config::config().session;
        match platform {
            Platform::Web | Platform::Unknown => Duration::days(config.refresh_ttl_web_days),
            p if p.is_native() && remember_me => Duration::days(config.refresh_ttl_native_days),
            _ => Duration::days(config.refresh_ttl_native_short_days),
        }
    }

    async fn conn(
        &self,
    ) -> Result<
        bb8::PooledConnection<
            '_,
            diesel_async::pooled_connection::AsyncDieselConnectionManager<
                diesel_async::AsyncPgConnection,
            >,
        >,
        SessionServiceError,
    > {
        self.pool
            .get()
            .await
            .map_err(|e| SessionServiceError::Storage(e.to_string()))
    }

    /// Create a session and issue its first access token
    pub async fn issue_session(
        &self,
        user_id: &str,
        platform: Platform,
        remember_me: bool,
        device: DeviceInfo,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, SessionServiceError> {
        let ttl = self.refresh_ttl_for(platform, remember_me);
        let mut conn = self.conn().await?;

        let (session, refresh_token) =
            Session::create(&mut conn, &self.hasher, user_id, ttl, platform, device, now).await?;

        self.issued_from(&session, refresh_token, now)
    }

    /// Build the wire bundle for an already-created session row
    pub fn issued_from(
        &self,
        session: &Session,
        refresh_token: String,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, SessionServiceError> {
        let (access_token, access_expires_at) =
            self.tokens.issue(&session.user_id, &session.id, now)?;

        Ok(IssuedSession {
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            platform: session.platform.clone(),
            access_token,
            access_expires_at,
            refresh_token,
            refresh_expires_at: session.expires_at,
        })
    }

    /// Verify the bearer token, then check live session state. A valid
    /// signature is not enough: the session row must still belong to the
    /// claimed user and be neither revoked, replaced, nor expired.
    pub async fn validate_access_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessClaims, SessionServiceError> {
        let claims = self.tokens.verify(token, now)?;

        let mut conn = self.conn().await?;
        let session = match Session::find_by_id(&mut conn, &claims.sid).await {
            Ok(session) => session,
            Err(SessionError::NotFound) => return Err(SessionServiceError::SessionNotFound),
            Err(e) => return Err(SessionServiceError::Storage(e.to_string())),
        };

        if session.user_id != claims.sub {
            return Err(SessionServiceError::InvalidToken);
        }
        if session.is_revoked() || session.is_replaced() {
            return Err(SessionServiceError::SessionRevoked);
        }
        if session.is_expired(now) {
            return Err(SessionServiceError::SessionExpired);
        }

        Ok(claims)
    }

    /// Rotate a refresh token, detecting reuse of already-rotated tokens.
    /// Branches on the locked row:
    ///   revoked + replaced  -> reuse: revoke all the user's sessions
    ///   revoked only        -> SessionRevoked
    ///   expired             -> SessionExpired
    ///   unknown token       -> SessionNotFound
    pub async fn rotate_refresh(
        &self,
        refresh_plain: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, SessionServiceError> {
        if refresh_plain.is_empty() || refresh_plain.len() > MAX_REFRESH_PLAINTEXT_LEN {
            return Err(SessionServiceError::SessionNotFound);
        }

        let token_hash = self.hasher.digest(refresh_plain);
        let hasher = self.hasher.clone();
        let refresh_plain = refresh_plain.to_string();

        let mut conn = self.conn().await?;
        let rotated = conn
            .transaction::<_, SessionServiceError, _>(|tx| {
                Box::pin(async move {
                    let current = Session::lock_by_refresh_hash(tx, &token_hash)
                        .await
                        .map_err(|e| SessionServiceError::Storage(e.to_string()))?;

                    let current = match current {
                        Some(session) => session,
                        None => return Err(SessionServiceError::SessionNotFound),
                    };

                    if current.is_revoked() && current.is_replaced() {
                        warn!(
                            user_id = %current.user_id,
                            session_id = %current.id,
                            "rotated refresh token replayed; revoking all sessions"
                        );
                        Session::revoke_all_for_user(
                            tx,
                            &current.user_id,
                            REASON_REUSE_DETECTED,
                            now,
                        )
                        .await
                        .map_err(|e| SessionServiceError::Storage(e.to_string()))?;
                        return Err(SessionServiceError::RefreshReuseDetected);
                    }
                    if current.is_revoked() {
                        return Err(SessionServiceError::SessionRevoked);
                    }
                    if current.is_expired(now) {
                        return Err(SessionServiceError::SessionExpired);
                    }

                    Session::rotate_locked(tx, &hasher, &current, &refresh_plain, now)
                        .await
                        .map_err(|e| match e {
                            SessionError::NotActive => SessionServiceError::SessionNotFound,
                            other => SessionServiceError::Storage(other.to_string()),
                        })
                })
            })
            .await?;

        let (session, refresh_token) = rotated;
        self.issued_from(&session, refresh_token, now)
    }

    pub async fn revoke_session(
        &self,
        session_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SessionServiceError> {
        let mut conn = self.conn().await?;
        Session::revoke(&mut conn, session_id, reason, now).await?;
        Ok(())
    }

    pub async fn revoke_all(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, SessionServiceError> {
        let mut conn = self.conn().await?;
        Ok(Session::revoke_all_for_user(&mut conn, user_id, REASON_LOGOUT, now).await?)
    }

    /// Update last_used_at; NotActive surfaces as an error the caller may
    /// ignore (the realtime gateway treats this as best-effort)
    pub async fn touch_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SessionServiceError> {
        let mut conn = self.conn().await?;
        Session::touch_last_used(&mut conn, session_id, now)
            .await
            .map_err(|e| match e {
                SessionError::NotActive => SessionServiceError::SessionNotFound,
                other => SessionServiceError::Storage(other.to_string()),
            })
    }

    pub async fn list_sessions(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, SessionServiceError> {
        let mut conn = self.conn().await?;
        Ok(Session::list_active_for_user(&mut conn, user_id, now).await?)
    }
}
