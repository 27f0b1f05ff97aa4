// Token digest laws: fixed width, mode separation, startup policy

use arc_backend_core::services::token_hash::{
    digest_eq, TokenHasher, TokenHashError, DIGEST_HEX_LEN,
};

#[test]
fn digests_are_fixed_width_hex() {
    let hasher = TokenHasher::new(None, false).unwrap();

    for token in ["a", "a-much-longer-opaque-token-value", ""] {
        let digest = hasher.digest(token);
        assert_eq!(digest.len(), DIGEST_HEX_LEN);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

#[test]
fn keyed_mode_requires_a_real_secret() {
    assert!(matches!(
        TokenHasher::new(None, true),
        Err(TokenHashError::SecretRequired)
    ));
    assert!(matches!(
        TokenHasher::new(Some("short"), true),
        Err(TokenHashError::SecretTooShort(5))
    ));
    assert!(TokenHasher::new(Some("0123456789abcdef0123456789abcdef"), true).is_ok());
}

#[test]
fn keyed_and_plain_digests_differ() {
    let plain = TokenHasher::new(None, false).unwrap();
    let keyed = TokenHasher::new(Some("0123456789abcdef0123456789abcdef"), false).unwrap();

    assert_ne!(plain.digest("token"), keyed.digest("token"));
}

#[test]
fn digest_eq_is_length_guarded() {
    let hasher = TokenHasher::new(None, false).unwrap();
    let a = hasher.digest("token-a");
    let b = hasher.digest("token-b");

    assert!(digest_eq(&a, &a.clone()));
    assert!(!digest_eq(&a, &b));
    assert!(!digest_eq(&a, &a[..32]));
}
