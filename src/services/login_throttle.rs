// Progressive login throttling computed over the audit log
//
// Two counters over auth.login.failed rows: a per-IP window and a
// strongest-tier-first lockout per normalized identifier. A tier applies
// only when its Nth-latest failure still falls inside the tier's window;
// the lock runs until latest_failure + tier duration.

use chrono::{DateTime, Duration, Utc};
use diesel_async::AsyncPgConnection;
use thiserror::Error;

use crate::app_config::ThrottleConfig;
use crate::models::audit::{AuditError, AuditRecord};

#[derive(Error, Debug)]
pub enum ThrottleError {
    #[error("Storage error: {0}")]
    Storage(#[from] AuditError),
}

/// A positive throttle decision with the seconds a client must wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAfter {
    pub seconds: u64,
}

fn ceil_seconds(duration: Duration) -> u64 {
    let millis = duration.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}

/// Login throttle over audit-log failure rows
pub struct LoginThrottle {
    config: ThrottleConfig,
}

impl LoginThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self { config }
    }

    pub fn from_config() -> Self {
        Self::new(crate::app_config::config().throttle.clone())
    }

    /// IP window: at most login_ip_max failures per IP per window.
    /// Retry-after = nth_latest_failure + window - now.
    pub async fn check_login_ip(
        &self,
        conn: &mut AsyncPgConnection,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RetryAfter>, ThrottleError> {
        let window = Duration::seconds(self.config.login_ip_window_secs);
        let nth = AuditRecord::nth_latest_login_failure_for_ip(conn, ip, self.config.login_ip_max)
            .await?;

        Ok(nth.and_then(|ts| {
            let unlock_at = ts + window;
            if unlock_at > now {
                Some(RetryAfter {
                    seconds: ceil_seconds(unlock_at - now),
                })
            } else {
                None
            }
        }))
    }

    /// Identifier lockout, strongest tier first: severe, long, short, then
    /// the plain identifier window
    pub async fn check_login_identifier(
        &self,
        conn: &mut AsyncPgConnection,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RetryAfter>, ThrottleError> {
        let tiers = [
            (
                self.config.severe_threshold,
                Duration::seconds(self.config.severe_window_secs),
            ),
            (
                self.config.long_threshold,
                Duration::seconds(self.config.long_window_secs),
            ),
            (
                self.config.short_threshold,
                Duration::seconds(self.config.short_window_secs),
            ),
        ];

        for (threshold, window) in tiers {
            if threshold <= 0 {
                continue;
            }
            let nth = AuditRecord::nth_latest_login_failure_for_identifier(
                conn, identifier, threshold,
            )
            .await?;
            let Some(nth_ts) = nth else { continue };

            // The Nth-latest failure must itself fall inside the window
            if nth_ts + window <= now {
                continue;
            }

            let latest =
                AuditRecord::nth_latest_login_failure_for_identifier(conn, identifier, 1)
                    .await?
                    .unwrap_or(nth_ts);
            let unlock_at = latest + window;
            if unlock_at > now {
                return Ok(Some(RetryAfter {
                    seconds: ceil_seconds(unlock_at - now),
                }));
            }
        }

        // Plain window fallback for the identifier
        let window = Duration::seconds(self.config.login_user_window_secs);
        let nth = AuditRecord::nth_latest_login_failure_for_identifier(
            conn,
            identifier,
            self.config.login_user_max,
        )
        .await?;

        Ok(nth.and_then(|ts| {
            let unlock_at = ts + window;
            if unlock_at > now {
                Some(RetryAfter {
                    seconds: ceil_seconds(unlock_at - now),
                })
            } else {
                None
            }
        }))
    }

    /// Plain per-IP window over refresh failures
    pub async fn check_refresh_ip(
        &self,
        conn: &mut AsyncPgConnection,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RetryAfter>, ThrottleError> {
        let window = Duration::seconds(self.config.refresh_window_secs);
        let nth =
            AuditRecord::nth_latest_refresh_failure_for_ip(conn, ip, self.config.refresh_max)
                .await?;

        Ok(nth.and_then(|ts| {
            let unlock_at = ts + window;
            if unlock_at > now {
                Some(RetryAfter {
                    seconds: ceil_seconds(unlock_at - now),
                })
            } else {
                None
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_seconds_rounds_up() {
        assert_eq!(ceil_seconds(Duration::milliseconds(1)), 1);
        assert_eq!(ceil_seconds(Duration::milliseconds(1000)), 1);
        assert_eq!(ceil_seconds(Duration::milliseconds(1001)), 2);
        assert_eq!(ceil_seconds(Duration::seconds(-5)), 0);
    }
}
