// Append-only audit log
//
// Rows double as the counter store for progressive login throttling:
// the throttle asks for the Nth-latest failure timestamp per IP or per
// normalized identifier. Entries are mirrored to the `audit` tracing target.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::schema::audit_log;

// Action tags
pub const LOGIN_SUCCESS: &str = "auth.login.success";
pub const LOGIN_FAILED: &str = "auth.login.failed";
pub const REFRESH_SUCCESS: &str = "auth.refresh.success";
pub const REFRESH_FAILED: &str = "auth.refresh.failed";
pub const REFRESH_REUSE_DETECTED: &str = "auth.refresh.reuse_detected";
pub const LOGOUT: &str = "auth.logout";
pub const LOGOUT_ALL: &str = "auth.logout_all";
pub const INVITE_CREATED: &str = "invite.created";
pub const INVITE_CONSUMED: &str = "invite.consumed";
pub const INVITE_REVOKED: &str = "invite.revoked";

/// Errors for audit operations
#[derive(thiserror::Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// Audit log row
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = audit_log)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AuditRecord {
    pub id: i64,
    pub action: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Insertable)]
#[diesel(table_name = audit_log)]
pub struct NewAuditRecord {
    pub action: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub meta: Option<serde_json::Value>,
}

#[derive(QueryableByName)]
struct TimestampRow {
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Append a row and mirror it to the `audit` tracing target
    pub async fn insert(
        conn: &mut AsyncPgConnection,
        record: NewAuditRecord,
    ) -> Result<(), AuditError> {
        let json_log = serde_json::to_string(&record)
            .unwrap_or_else(|_| format!("{:?}", record.action));
        info!(target: "audit", "{}", json_log);

        diesel::insert_into(audit_log::table)
            .values(&record)
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Timestamp of the Nth-latest login failure from an IP (n >= 1),
    /// or None when fewer than n failures exist
    pub async fn nth_latest_login_failure_for_ip(
        conn: &mut AsyncPgConnection,
        ip: &str,
        n: i64,
    ) -> Result<Option<DateTime<Utc>>, AuditError> {
        use diesel::sql_types::{BigInt, Text};

        let row: Option<TimestampRow> = diesel::sql_query(
            "SELECT created_at FROM audit_log \
             WHERE action = 'auth.login.failed' AND ip = $1 \
             ORDER BY created_at DESC OFFSET $2 LIMIT 1",
        )
        .bind::<Text, _>(ip)
        .bind::<BigInt, _>(n - 1)
        .get_result(conn)
        .await
        .optional()?;

        Ok(row.map(|r| r.created_at))
    }

    /// Timestamp of the Nth-latest login failure for a normalized
    /// identifier (n >= 1)
    pub async fn nth_latest_login_failure_for_identifier(
        conn: &mut AsyncPgConnection,
        identifier: &str,
        n: i64,
    ) -> Result<Option<DateTime<Utc>>, AuditError> {
        use diesel::sql_types::{BigInt, Text};

        let row: Option<TimestampRow> = diesel::sql_query(
            "SELECT created_at FROM audit_log \
             WHERE action = 'auth.login.failed' AND meta ->> 'identifier' = $1 \
             ORDER BY created_at DESC OFFSET $2 LIMIT 1",
        )
        .bind::<Text, _>(identifier)
        .bind::<BigInt, _>(n - 1)
        .get_result(conn)
        .await
        .optional()?;

        Ok(row.map(|r| r.created_at))
    }

    /// Timestamp of the Nth-latest refresh failure from an IP (n >= 1)
    pub async fn nth_latest_refresh_failure_for_ip(
        conn: &mut AsyncPgConnection,
        ip: &str,
        n: i64,
    ) -> Result<Option<DateTime<Utc>>, AuditError> {
        use diesel::sql_types::{BigInt, Text};

        let row: Option<TimestampRow> = diesel::sql_query(
            "SELECT created_at FROM audit_log \
             WHERE action = 'auth.refresh.failed' AND ip = $1 \
             ORDER BY created_at DESC OFFSET $2 LIMIT 1",
        )
        .bind::<Text, _>(ip)
        .bind::<BigInt, _>(n - 1)
        .get_result(conn)
        .await
        .optional()?;

        Ok(row.map(|r| r.created_at))
    }
}

/// Build a login-failure record; meta carries the normalized identifier and
/// a reason code, never the password
pub fn login_failure(
    identifier: &str,
    reason: &str,
    user_id: Option<&str>,
    ip: &str,
    user_agent: Option<&str>,
    now: DateTime<Utc>,
) -> NewAuditRecord {
    NewAuditRecord {
        action: LOGIN_FAILED.to_string(),
        user_id: user_id.map(str::to_string),
        session_id: None,
        created_at: now,
        ip: Some(ip.to_string()),
        user_agent: user_agent.map(str::to_string),
        meta: Some(serde_json::json!({
            "identifier": identifier,
            "reason": reason,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_failure_meta_shape() {
        let record = login_failure(
            "alice",
            "bad_password",
            Some("01J0000000000000000000USER"),
            "203.0.113.7",
            Some("curl/8"),
            Utc::now(),
        );

        assert_eq!(record.action, LOGIN_FAILED);
        let meta = record.meta.unwrap();
        assert_eq!(meta["identifier"], "alice");
        assert_eq!(meta["reason"], "bad_password");
        assert!(meta.get("password").is_none());
    }
}
