// Invite issuance, validation, and consumption

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::db::DieselPool;
use crate::models::invite::{ConsumedSignup, Invite, InviteError, MAX_NOTE_LEN};
use crate::models::session::{DeviceInfo, Platform};
use crate::models::user::NewUserSpec;
use crate::services::token_hash::TokenHasher;

/// Default invite lifetime
const DEFAULT_TTL_DAYS: i64 = 7;

/// Errors surfaced by the invite service
#[derive(Error, Debug)]
pub enum InviteServiceError {
    #[error("Invite not found")]
    NotFound,

    #[error("Invite is not active")]
    NotActive,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict on {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<InviteError> for InviteServiceError {
    fn from(err: InviteError) -> Self {
        match err {
            InviteError::NotFound => InviteServiceError::NotFound,
            InviteError::NotActive => InviteServiceError::NotActive,
            InviteError::InvalidInput(msg) => InviteServiceError::InvalidInput(msg),
            InviteError::Conflict(field) => InviteServiceError::Conflict(field),
            InviteError::Database(e) => InviteServiceError::Storage(e.to_string()),
        }
    }
}

/// Options for invite creation
#[derive(Debug, Clone, Default)]
pub struct CreateInviteOptions {
    pub expires_in: Option<Duration>,
    pub max_uses: Option<i32>,
    pub note: Option<String>,
}

/// Invite lifecycle service
pub struct InviteService {
    pool: DieselPool,
    hasher: TokenHasher,
}

impl InviteService {
    pub fn new(pool: DieselPool, hasher: TokenHasher) -> Self {
        Self { pool, hasher }
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
        InviteServiceError,
    > {
        self.pool
            .get()
            .await
            .map_err(|e| InviteServiceError::Storage(e.to_string()))
    }

    /// Create an invite; defaults ttl=7d and max_uses=1, note capped at 512
    pub async fn create_invite(
        &self,
        created_by: Option<&str>,
        options: CreateInviteOptions,
        now: DateTime<Utc>,
    ) -> Result<(Invite, String), InviteServiceError> {
        let ttl = options
            .expires_in
            .filter(|d| *d > Duration::zero())
            .unwrap_or_else(|| Duration::days(DEFAULT_TTL_DAYS));
        let max_uses = options.max_uses.filter(|&n| n > 0).unwrap_or(1);

        if let Some(note) = &options.note {
            if note.chars().count() > MAX_NOTE_LEN {
                return Err(InviteServiceError::InvalidInput(format!(
                    "note exceeds {} characters",
                    MAX_NOTE_LEN
                )));
            }
        }

        let mut conn = self.conn().await?;
        Ok(Invite::create(
            &mut conn,
            &self.hasher,
            created_by,
            ttl,
            max_uses,
            options.note,
            now,
        )
        .await?)
    }

    /// Hash lookup plus active predicate; the bool reports usability
    pub async fn validate_invite(
        &self,
        plain: &str,
        now: DateTime<Utc>,
    ) -> Result<(bool, Invite), InviteServiceError> {
        let mut conn = self.conn().await?;
        let invite = Invite::find_by_token(&mut conn, &self.hasher, plain).await?;
        let active = invite.is_active(now);
        Ok((active, invite))
    }

    /// Predicated single-shot consumption
    pub async fn consume_invite(
        &self,
        plain: &str,
        consumed_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Invite, InviteServiceError> {
        let mut conn = self.conn().await?;
        Ok(Invite::consume(&mut conn, &self.hasher, plain, consumed_by, now).await?)
    }

    /// Consume an invite and create the user, credential, and first session
    /// atomically. An identifier conflict burns no invite use.
    #[allow(clippy::too_many_arguments)]
    pub async fn consume_and_signup(
        &self,
        plain: &str,
        spec: NewUserSpec,
        session_ttl: Duration,
        platform: Platform,
        device: DeviceInfo,
        now: DateTime<Utc>,
    ) -> Result<ConsumedSignup, InviteServiceError> {
        let mut conn = self.conn().await?;
        Ok(Invite::consume_and_create_user(
            &mut conn,
            &self.hasher,
            plain,
            spec,
            session_ttl,
            platform,
            device,
            now,
        )
        .await?)
    }

    /// Idempotent revocation
    pub async fn revoke_invite(
        &self,
        invite_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), InviteServiceError> {
        let mut conn = self.conn().await?;
        Invite::revoke(&mut conn, invite_id, now).await?;
        Ok(())
    }
}
