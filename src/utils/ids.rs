// Opaque identifier and token minting

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use ulid::Ulid;

/// Bytes of entropy in an opaque refresh/invite token
const OPAQUE_TOKEN_BYTES: usize = 32;

/// Allocate a 26-char time-ordered sortable identifier (users, sessions, invites)
pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Generate an opaque bearer token: URL-safe base64 of 32 random bytes, no padding
pub fn new_opaque_token() -> String {
    let mut buf = [0u8; OPAQUE_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Generate a fresh 256-bit CSRF token for the double-submit cookie
pub fn new_csrf_token() -> String {
    new_opaque_token()
}

/// Generate a 32-char random hex server message id (16 bytes)
pub fn new_server_msg_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_width_and_ordering() {
        let a = new_id();
        let b = new_id();
        assert_eq!(a.len(), 26);
        assert_eq!(b.len(), 26);
        assert_ne!(a, b);
    }

    #[test]
    fn test_opaque_token_shape() {
        let token = new_opaque_token();
        // 32 bytes -> 43 base64 chars without padding
        assert_eq!(token.len(), 43);
        assert!(!token.contains('='));
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
    }

    #[test]
    fn test_server_msg_id_is_hex() {
        let id = new_server_msg_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
