//! Phone number normalization.
//!
//! Contacts are deduplicated by phone number, so every phone string must go
//! through the same normalization on both the write path and the lookup path.
//! Anything else silently accumulates duplicate contacts.

/// Normalizes a phone number by stripping every non-digit character.
///
/// `"+1 (212) 555-1234"` and `"12125551234"` normalize to the same string.
/// Returns `None` when no digits remain, so callers can treat an all-junk
/// phone field the same as an absent one.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() { None } else { Some(digits) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_formatting() {
        assert_eq!(
            normalize_phone("+1 (212) 555-1234"),
            Some("12125551234".to_string())
        );
    }

    #[test]
    fn already_normalized_passes_through() {
        assert_eq!(
            normalize_phone("12125551234"),
            Some("12125551234".to_string())
        );
    }

    #[test]
    fn idempotent() {
        let once = normalize_phone("+1 (212) 555-1234").unwrap();
        assert_eq!(normalize_phone(&once), Some(once.clone()));
    }

    #[test]
    fn no_digits_is_none() {
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("ext."), None);
        assert_eq!(normalize_phone("+-() "), None);
    }

    #[test]
    fn ignores_unicode_digits() {
        // Only ASCII digits participate in dedup keys.
        assert_eq!(normalize_phone("٢١٢"), None);
    }
}
