//! Shared string parsing helpers used by the record validator.

use once_cell::sync::Lazy;
use std::collections::HashSet;

// =============================================================================
// String Parsing Utilities
// =============================================================================

/// Characters commonly used in numeric formatting that should be stripped.
pub const NUMERIC_FORMAT_CHARS: [char; 6] = [',', '$', '%', '€', '£', ' '];

/// Common error/missing value markers in numeric data.
pub const ERROR_MARKERS: [&str; 8] = [
    "error", "unknown", "n/a", "na", "null", "missing", "none", "#n/a",
];

/// Boolean true representations accepted for flag columns.
pub const BOOLEAN_TRUE_VALUES: [&str; 5] = ["true", "t", "yes", "y", "1"];

/// Boolean false representations accepted for flag columns.
pub const BOOLEAN_FALSE_VALUES: [&str; 5] = ["false", "f", "no", "n", "0"];

static TRUE_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| BOOLEAN_TRUE_VALUES.iter().copied().collect());
static FALSE_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| BOOLEAN_FALSE_VALUES.iter().copied().collect());

/// Whether a raw field carries no value at all.
#[inline]
pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Clean a string for numeric parsing by removing formatting characters.
///
/// # Example
///
/// ```rust,ignore
/// use rba_processing::utils::clean_numeric_string;
///
/// assert_eq!(clean_numeric_string("$1,234.56"), "1234.56");
/// assert_eq!(clean_numeric_string("  42%  "), "42");
/// ```
pub fn clean_numeric_string(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| !NUMERIC_FORMAT_CHARS.contains(c))
        .collect()
}

/// Check if a string is an error/missing value marker.
pub fn is_error_marker(s: &str) -> bool {
    let lower = s.trim().to_ascii_lowercase();
    ERROR_MARKERS.iter().any(|&marker| lower == marker)
}

/// Whether a numeric field should be treated as absent.
pub fn is_missing_numeric(s: &str) -> bool {
    is_blank(s) || is_error_marker(s)
}

/// Try to parse a string as a finite numeric value (f64).
///
/// Handles common formatting like currency symbols, percentages, and thousands separators.
pub fn parse_numeric_string(s: &str) -> Option<f64> {
    let cleaned = clean_numeric_string(s);
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a flag value. `None` when the string is not a recognized boolean.
pub fn parse_boolean_string(s: &str) -> Option<bool> {
    let lower = s.trim().to_ascii_lowercase();
    if TRUE_SET.contains(lower.as_str()) {
        Some(true)
    } else if FALSE_SET.contains(lower.as_str()) {
        Some(false)
    } else {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_numeric_string() {
        assert_eq!(clean_numeric_string("$1,234.56"), "1234.56");
        assert_eq!(clean_numeric_string("  42%  "), "42");
        assert_eq!(clean_numeric_string("€100"), "100");
        assert_eq!(clean_numeric_string("1 000"), "1000");
    }

    #[test]
    fn test_is_error_marker() {
        assert!(is_error_marker("ERROR"));
        assert!(is_error_marker("N/A"));
        assert!(is_error_marker("  MISSING  "));
        assert!(!is_error_marker("42"));
    }

    #[test]
    fn test_parse_numeric_string() {
        assert_eq!(parse_numeric_string("42"), Some(42.0));
        assert_eq!(parse_numeric_string("1,234.5"), Some(1234.5));
        assert_eq!(parse_numeric_string("-100"), Some(-100.0));
        assert_eq!(parse_numeric_string(""), None);
        assert_eq!(parse_numeric_string("fast"), None);
        assert_eq!(parse_numeric_string("inf"), None);
        assert_eq!(parse_numeric_string("NaN"), None);
    }

    #[test]
    fn test_is_missing_numeric() {
        assert!(is_missing_numeric("   "));
        assert!(is_missing_numeric("null"));
        assert!(!is_missing_numeric("0"));
    }

    #[test]
    fn test_parse_boolean_string() {
        assert_eq!(parse_boolean_string("True"), Some(true));
        assert_eq!(parse_boolean_string("FALSE"), Some(false));
        assert_eq!(parse_boolean_string(" 1 "), Some(true));
        assert_eq!(parse_boolean_string("n"), Some(false));
        assert_eq!(parse_boolean_string("maybe"), None);
        assert_eq!(parse_boolean_string(""), None);
    }
}
