// One-way hashing of opaque refresh/invite tokens to fixed-width digests
//
// The server never stores token plaintext; lookups and equality checks run
// on the 64-hex digest. Keyed mode binds digests to a process-wide secret so
// a leaked database cannot be joined against captured tokens.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Fixed digest width: 32 bytes of SHA-256 as lowercase hex
pub const DIGEST_HEX_LEN: usize = 64;

/// Minimum keyed-mode secret length in bytes
const MIN_KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum TokenHashError {
    #[error("token hash secret must be at least {MIN_KEY_LEN} bytes (got {0})")]
    SecretTooShort(usize),

    #[error("keyed token hashing is required but no secret is configured")]
    SecretRequired,
}

/// Digest strategy for opaque tokens
#[derive(Clone)]
pub enum TokenHasher {
    /// Plain SHA-256
    Plain,
    /// HMAC-SHA-256 under a process-wide secret
    Keyed(Vec<u8>),
}

impl std::fmt::Debug for TokenHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenHasher::Plain => f.write_str("TokenHasher::Plain"),
            TokenHasher::Keyed(_) => f.write_str("TokenHasher::Keyed(<redacted>)"),
        }
    }
}

impl TokenHasher {
    /// Build a hasher from configuration. A present secret selects keyed
    /// mode; `require_keyed` turns an absent or short secret into an error.
    pub fn new(secret: Option<&str>, require_keyed: bool) -> Result<Self, TokenHashError> {
        match secret {
            Some(secret) if secret.len() >= MIN_KEY_LEN => {
                Ok(TokenHasher::Keyed(secret.as_bytes().to_vec()))
            },
            Some(secret) => Err(TokenHashError::SecretTooShort(secret.len())),
            None if require_keyed => Err(TokenHashError::SecretRequired),
            None => Ok(TokenHasher::Plain),
        }
    }

    pub fn from_config() -> Result<Self, TokenHashError> {
        let config = &crate::app_config::config().token_hash;
        Self::new(config.secret.as_deref(), config.require_keyed)
    }

    /// Digest an opaque token to 64 lowercase hex characters
    pub fn digest(&self, token: &str) -> String {
        match self {
            TokenHasher::Plain => {
                let mut hasher = Sha256::new();
                hasher.update(token.as_bytes());
                hex::encode(hasher.finalize())
            },
            TokenHasher::Keyed(key) => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                    .expect("HMAC accepts any key length");
                mac.update(token.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            },
        }
    }
}

/// Constant-time equality over stored digests. Mismatched lengths
/// short-circuit to false; equal-length inputs compare without a timing
/// oracle (the fixed digest width removes the length channel).
pub fn digest_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_digest_shape() {
        let hasher = TokenHasher::new(None, false).unwrap();
        let digest = hasher.digest("some-opaque-token");

        assert_eq!(digest.len(), DIGEST_HEX_LEN);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, hasher.digest("some-opaque-token"));
        assert_ne!(digest, hasher.digest("another-token"));
    }

    #[test]
    fn test_keyed_digest_differs_from_plain() {
        let plain = TokenHasher::new(None, false).unwrap();
        let keyed =
            TokenHasher::new(Some("0123456789abcdef0123456789abcdef"), false).unwrap();

        let token = "some-opaque-token";
        assert_ne!(plain.digest(token), keyed.digest(token));
        assert_eq!(keyed.digest(token).len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(matches!(
            TokenHasher::new(Some("too-short"), false),
            Err(TokenHashError::SecretTooShort(9))
        ));
    }

    #[test]
    fn test_required_keyed_without_secret_fails() {
        assert!(matches!(
            TokenHasher::new(None, true),
            Err(TokenHashError::SecretRequired)
        ));
    }

    #[test]
    fn test_digest_eq() {
        let hasher = TokenHasher::new(None, false).unwrap();
        let a = hasher.digest("token");
        let b = hasher.digest("token");
        let c = hasher.digest("other");

        assert!(digest_eq(&a, &b));
        assert!(!digest_eq(&a, &c));
        assert!(!digest_eq(&a, "short"));
    }
}
