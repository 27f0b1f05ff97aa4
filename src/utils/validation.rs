// Validation and normalization for login identifiers

/// Trim an optional field, collapsing empty strings to None
pub fn trim_optional_field(field: Option<&String>) -> Option<String> {
    field.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Case-folded form of a username used for uniqueness and lookups
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Case-folded form of an email address used for uniqueness and lookups
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic shape check for a username: 1..=64 chars, no whitespace
pub fn is_valid_username(username: &str) -> bool {
    let trimmed = username.trim();
    !trimmed.is_empty() && trimmed.len() <= 64 && !trimmed.chars().any(char::is_whitespace)
}

/// Basic shape check for an email address
pub fn is_valid_email(email: &str) -> bool {
    let trimmed = email.trim();
    !trimmed.is_empty()
        && trimmed.len() <= 320
        && trimmed.contains('@')
        && !trimmed.starts_with('@')
        && !trimmed.ends_with('@')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_is_case_insensitive() {
        assert_eq!(normalize_username("Navid"), normalize_username("nAvId"));
        assert_eq!(
            normalize_email("Alice@Example.COM"),
            normalize_email("alice@example.com")
        );
    }

    #[test]
    fn test_username_shape() {
        assert!(is_valid_username("alice"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username(&"x".repeat(65)));
    }

    #[test]
    fn test_email_shape() {
        assert!(is_valid_email("alice@example.com"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("@example.com"));
    }
}
