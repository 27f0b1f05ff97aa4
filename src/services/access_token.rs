// Short-lived signed access tokens
//
// Tokens are self-contained HS256 bearers carrying the user and session
// ids. Revocation is not encoded here: SessionService re-reads session
// state on every validation. Time claims are checked against the caller's
// clock with a configured skew tolerance.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for access-token operations
#[derive(Error, Debug)]
pub enum AccessTokenError {
    #[error("Token encoding error: {0}")]
    Encoding(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,
}

/// Access token claims: subject user, session id, issuer, and time bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessClaims {
    /// Issuer
    pub iss: String,
    /// User id (subject)
    pub sub: String,
    /// Session id
    pub sid: String,
    /// Issued at (Unix epoch seconds)
    pub iat: i64,
    /// Not before (Unix epoch seconds)
    pub nbf: i64,
    /// Expires at (Unix epoch seconds)
    pub exp: i64,
}

/// Issues and verifies signed access tokens
#[derive(Clone)]
pub struct AccessTokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
    ttl: Duration,
    clock_skew: Duration,
}

impl std::fmt::Debug for AccessTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenManager")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .field("clock_skew", &self.clock_skew)
            .field("keys", &"<redacted>")
            .finish()
    }
}

impl AccessTokenManager {
    pub fn new(secret: &str, issuer: String, ttl_secs: u64, clock_skew_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm: Algorithm::HS256,
            issuer,
            ttl: Duration::seconds(ttl_secs as i64),
            clock_skew: Duration::seconds(clock_skew_secs as i64),
        }
    }

    pub fn from_config() -> Self {
        let config = &crate::app_config::config().access_token;
        Self::new(
            &config.secret,
            config.issuer.clone(),
            config.ttl_secs,
            config.clock_skew_secs,
        )
    }

    /// Issue a token for (user, session); returns the bearer string and its
    /// expiry instant
    pub fn issue(
        &self,
        user_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AccessTokenError> {
        let exp = now + self.ttl;
        let claims = AccessClaims {
            iss: self.issuer.clone(),
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: exp.timestamp(),
        };

        let header = Header::new(self.algorithm);
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| AccessTokenError::Encoding(e.to_string()))?;

        Ok((token, exp))
    }

    /// Verify signature, issuer, and time claims against the caller's clock
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, AccessTokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[self.issuer.clone()]);
        validation.validate_aud = false;
        // Time claims are checked below against the passed-in clock
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["iss", "sub", "exp"]);

        let data = decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(|_| AccessTokenError::InvalidToken)?;
        let claims = data.claims;

        let skew = self.clock_skew.num_seconds();
        if claims.exp + skew <= now.timestamp() {
            return Err(AccessTokenError::TokenExpired);
        }
        if claims.nbf - skew > now.timestamp() {
            return Err(AccessTokenError::InvalidToken);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AccessTokenManager {
        AccessTokenManager::new(
            "test-access-secret-minimum-32-characters!",
            "arc-test".to_string(),
            900,
            30,
        )
    }

    #[test]
    fn test_issue_and_verify_round_trip() {
        let manager = manager();
        let now = Utc::now();

        let (token, exp) = manager.issue("user-1", "session-1", now).unwrap();
        assert_eq!(exp, now + Duration::seconds(900));

        let claims = manager.verify(&token, now).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.sid, "session-1");
        assert_eq!(claims.iss, "arc-test");
        assert_eq!(claims.exp, claims.iat + 900);
    }

    #[test]
    fn test_expired_token_rejected() {
        let manager = manager();
        let issued_at = Utc::now() - Duration::hours(2);

        let (token, _) = manager.issue("user-1", "session-1", issued_at).unwrap();
        assert!(matches!(
            manager.verify(&token, Utc::now()),
            Err(AccessTokenError::TokenExpired)
        ));
    }

    #[test]
    fn test_clock_skew_tolerated() {
        let manager = manager();
        let now = Utc::now();

        // Token issued 10 seconds in the future is inside the 30s skew
        let (token, _) = manager.issue("user-1", "session-1", now + Duration::seconds(10)).unwrap();
        assert!(manager.verify(&token, now).is_ok());
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let manager = manager();
        let other = AccessTokenManager::new(
            "test-access-secret-minimum-32-characters!",
            "someone-else".to_string(),
            900,
            30,
        );
        let now = Utc::now();

        let (token, _) = other.issue("user-1", "session-1", now).unwrap();
        assert!(matches!(
            manager.verify(&token, now),
            Err(AccessTokenError::InvalidToken)
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let manager = manager();
        assert!(matches!(
            manager.verify("not-a-jwt", Utc::now()),
            Err(AccessTokenError::InvalidToken)
        ));
    }
}
