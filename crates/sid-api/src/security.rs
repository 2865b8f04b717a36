//! Input validation for identifiers that reach the record store.

/// Maximum length of event/ROI ids and whitelist identities.
pub const MAX_ID_LENGTH: usize = 128;

/// Validate an event or ROI id.
///
/// Valid format: ASCII alphanumerics, hyphens and underscores, 1-128 chars.
pub fn is_valid_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_ID_LENGTH {
        return false;
    }
    id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Normalize a whitelist identity label.
///
/// Identities double as Firestore document ids, so path separators and
/// control characters are rejected.
pub fn sanitize_identity(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_ID_LENGTH {
        return None;
    }
    if trimmed == "." || trimmed == ".." || trimmed.starts_with("__") {
        return None;
    }
    if trimmed.chars().any(|c| c.is_control() || c == '/' || c == '\\') {
        return None;
    }
    // Match results use these labels for "no match"
    if sid_vision::is_reserved_identity(trimmed) {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_id() {
        assert!(is_valid_id("3f2a9c1e7b8d4e0f9a6b5c4d3e2f1a0b"));
        assert!(is_valid_id("roi_front-door"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../etc"));
        assert!(!is_valid_id("a/b"));
        assert!(!is_valid_id(&"a".repeat(129)));
        assert!(is_valid_id(&"a".repeat(128)));
    }

    #[test]
    fn test_sanitize_identity() {
        assert_eq!(sanitize_identity("  Alice Smith "), Some("Alice Smith".to_string()));
        assert_eq!(sanitize_identity(""), None);
        assert_eq!(sanitize_identity("   "), None);
        assert_eq!(sanitize_identity("a/b"), None);
        assert_eq!(sanitize_identity(".."), None);
        assert_eq!(sanitize_identity("__reserved__"), None);
        assert_eq!(sanitize_identity("tab\there"), None);
        assert_eq!(sanitize_identity(" unknown "), None);
        assert_eq!(sanitize_identity("no_face"), None);
        assert_eq!(sanitize_identity("Unknown Visitor"), Some("Unknown Visitor".to_string()));
    }
}
