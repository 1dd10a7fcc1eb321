/// Normalize a phone number to a canonical comparable form.
///
/// Strips everything except digits and a leading `+`, then applies the
/// US conventions: 10 bare digits get `+1`, 11 digits starting with `1`
/// get `+`. Anything else (non-US, malformed, already normalized) passes
/// through unchanged.
pub fn normalize(phone: &str) -> String {
    let mut out = String::with_capacity(phone.len());
    for (i, c) in phone.chars().enumerate() {
        if c.is_ascii_digit() || (c == '+' && i == 0) {
            out.push(c);
        }
    }

    if !out.starts_with('+') {
        if out.len() == 10 {
            return format!("+1{out}");
        }
        if out.len() == 11 && out.starts_with('1') {
            return format!("+{out}");
        }
    }

    out
}

/// Check a caller against the allowlist.
///
/// An empty allowlist is an open line — every caller is admitted. Otherwise
/// the caller must match an entry exactly after both sides are normalized;
/// no prefix matching.
pub fn is_allowed(phone: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    let caller = normalize(phone);
    allowlist.iter().any(|entry| normalize(entry) == caller)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_formatting() {
        assert_eq!(normalize("(555) 123-4567"), "+15551234567");
        assert_eq!(normalize("+1 555 123 4567"), "+15551234567");
    }

    #[test]
    fn bare_ten_digits_get_us_prefix() {
        assert_eq!(normalize("5551234567"), "+15551234567");
    }

    #[test]
    fn eleven_digits_with_leading_one() {
        assert_eq!(normalize("15551234567"), "+15551234567");
    }

    #[test]
    fn non_us_passes_through() {
        assert_eq!(normalize("+34612345678"), "+34612345678");
        assert_eq!(normalize("612345678"), "612345678");
    }

    #[test]
    fn only_leading_plus_survives() {
        assert_eq!(normalize("555+1234567"), "+15551234567");
    }

    #[test]
    fn normalize_is_idempotent() {
        for input in [
            "(555) 123-4567",
            "5551234567",
            "15551234567",
            "+34612345678",
            "garbage",
            "",
        ] {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn empty_allowlist_admits_everyone() {
        assert!(is_allowed("+15551234567", &[]));
        assert!(is_allowed("", &[]));
    }

    #[test]
    fn matches_across_formats() {
        let allow = vec!["5551234567".to_string()];
        assert!(is_allowed("+15551234567", &allow));
        assert!(is_allowed("(555) 123-4567", &allow));
    }

    #[test]
    fn no_prefix_matching() {
        let allow = vec!["+1555123".to_string()];
        assert!(!is_allowed("+15551234567", &allow));
    }

    #[test]
    fn rejects_unlisted_caller() {
        let allow = vec!["+15551234567".to_string()];
        assert!(!is_allowed("+15559999999", &allow));
    }
}
