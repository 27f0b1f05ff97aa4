// Access-token issuance and verification against a supplied clock

use arc_backend_core::services::access_token::{AccessTokenError, AccessTokenManager};
use chrono::{Duration, Utc};

fn manager() -> AccessTokenManager {
    AccessTokenManager::new(
        "integration-test-secret-at-least-32-chars",
        "arc-test".to_string(),
        900,
        30,
    )
}

#[test]
fn issued_claims_carry_user_and_session() {
    let manager = manager();
    let now = Utc::now();

    let (token, exp) = manager.issue("user-9", "session-9", now).unwrap();
    let claims = manager.verify(&token, now).unwrap();

    assert_eq!(claims.sub, "user-9");
    assert_eq!(claims.sid, "session-9");
    assert_eq!(claims.iat, now.timestamp());
    assert_eq!(claims.nbf, now.timestamp());
    assert_eq!(claims.exp, exp.timestamp());
}

#[test]
fn verification_respects_the_callers_clock() {
    let manager = manager();
    let issued_at = Utc::now();

    let (token, _) = manager.issue("user-9", "session-9", issued_at).unwrap();

    // Within lifetime
    assert!(manager.verify(&token, issued_at + Duration::seconds(800)).is_ok());

    // Past expiry plus skew
    assert!(matches!(
        manager.verify(&token, issued_at + Duration::seconds(1000)),
        Err(AccessTokenError::TokenExpired)
    ));
}

#[test]
fn tampered_tokens_fail() {
    let manager = manager();
    let now = Utc::now();
    let (token, _) = manager.issue("user-9", "session-9", now).unwrap();

    let mut tampered = token.clone();
    tampered.push('x');
    assert!(manager.verify(&tampered, now).is_err());

    let other_key = AccessTokenManager::new(
        "a-completely-different-signing-secret-!!",
        "arc-test".to_string(),
        900,
        30,
    );
    assert!(other_key.verify(&token, now).is_err());
}
