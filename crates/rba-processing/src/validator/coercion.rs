//! Field-level coercion for the record validator.

use crate::utils::{is_blank, is_missing_numeric, parse_boolean_string, parse_numeric_string};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Result of coercing one raw field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Coerced<T> {
    Value(T),
    Missing,
    Malformed,
}

/// Coerce a numeric field. Error markers such as `N/A` count as missing.
pub(crate) fn coerce_number(raw: &str) -> Coerced<f64> {
    if is_missing_numeric(raw) {
        return Coerced::Missing;
    }
    match parse_numeric_string(raw) {
        Some(value) => Coerced::Value(value),
        None => Coerced::Malformed,
    }
}

/// Coerce a timestamp field with a `chrono` format string.
///
/// Formats without an offset are read as UTC.
pub(crate) fn coerce_timestamp(raw: &str, format: &str) -> Coerced<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Coerced::Missing;
    }

    // Naive parsing accepts `%z` and discards the offset.
    if let Ok(with_offset) = DateTime::parse_from_str(trimmed, format) {
        return Coerced::Value(with_offset.with_timezone(&Utc));
    }

    match NaiveDateTime::parse_from_str(trimmed, format) {
        Ok(naive) => Coerced::Value(naive.and_utc()),
        Err(_) => Coerced::Malformed,
    }
}

/// Coerce a two-valued flag.
pub(crate) fn coerce_flag(raw: &str) -> Coerced<bool> {
    if is_blank(raw) {
        return Coerced::Missing;
    }
    match parse_boolean_string(raw) {
        Some(flag) => Coerced::Value(flag),
        None => Coerced::Malformed,
    }
}

/// Coerce a category. Only surrounding whitespace is removed.
pub(crate) fn coerce_category(raw: &str) -> Coerced<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Coerced::Missing
    } else {
        Coerced::Value(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TIMESTAMP_FORMAT;
    use chrono::{Datelike, Timelike};

    // ========================================================================
    // coerce_number() tests
    // ========================================================================

    #[test]
    fn test_coerce_number_basic() {
        assert_eq!(coerce_number("561"), Coerced::Value(561.0));
        assert_eq!(coerce_number(" 1,024.5 "), Coerced::Value(1024.5));
    }

    #[test]
    fn test_coerce_number_missing_markers() {
        assert_eq!(coerce_number(""), Coerced::Missing);
        assert_eq!(coerce_number("NaN"), Coerced::Malformed);
        assert_eq!(coerce_number("null"), Coerced::Missing);
        assert_eq!(coerce_number("N/A"), Coerced::Missing);
    }

    #[test]
    fn test_coerce_number_malformed() {
        assert_eq!(coerce_number("12ms"), Coerced::Malformed);
        assert_eq!(coerce_number("fast"), Coerced::Malformed);
        assert_eq!(coerce_number("inf"), Coerced::Malformed);
    }

    // ========================================================================
    // coerce_timestamp() tests
    // ========================================================================

    #[test]
    fn test_coerce_timestamp_with_fraction() {
        match coerce_timestamp("2020-02-03 12:43:30.772", DEFAULT_TIMESTAMP_FORMAT) {
            Coerced::Value(ts) => {
                assert_eq!(ts.year(), 2020);
                assert_eq!(ts.hour(), 12);
                assert_eq!(ts.timestamp_subsec_millis(), 772);
            }
            other => panic!("Expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_coerce_timestamp_without_fraction() {
        match coerce_timestamp("2020-02-03 12:43:30", DEFAULT_TIMESTAMP_FORMAT) {
            Coerced::Value(ts) => assert_eq!(ts.timestamp(), 1_580_733_810),
            other => panic!("Expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_coerce_timestamp_with_offset_format() {
        match coerce_timestamp("2020-02-03T12:43:30+0100", "%Y-%m-%dT%H:%M:%S%z") {
            Coerced::Value(ts) => assert_eq!(ts.hour(), 11),
            other => panic!("Expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_coerce_timestamp_offset_is_absolute_instant() {
        let format = "%Y-%m-%d %H:%M:%S%.f %z";
        let east = coerce_timestamp("2020-02-03 13:43:30.772 +0100", format);
        let west = coerce_timestamp("2020-02-03 07:43:30.772 -0500", format);
        let utc = coerce_timestamp("2020-02-03 12:43:30.772", DEFAULT_TIMESTAMP_FORMAT);
        assert_eq!(east, utc);
        assert_eq!(west, utc);
    }

    #[test]
    fn test_coerce_timestamp_failures() {
        assert_eq!(
            coerce_timestamp("  ", DEFAULT_TIMESTAMP_FORMAT),
            Coerced::Missing
        );
        assert_eq!(
            coerce_timestamp("03/02/2020 12:43", DEFAULT_TIMESTAMP_FORMAT),
            Coerced::Malformed
        );
        assert_eq!(
            coerce_timestamp("2020-02-30 12:43:30", DEFAULT_TIMESTAMP_FORMAT),
            Coerced::Malformed
        );
    }

    // ========================================================================
    // coerce_flag() / coerce_category() tests
    // ========================================================================

    #[test]
    fn test_coerce_flag() {
        assert_eq!(coerce_flag("True"), Coerced::Value(true));
        assert_eq!(coerce_flag("False"), Coerced::Value(false));
        assert_eq!(coerce_flag(""), Coerced::Missing);
        assert_eq!(coerce_flag("sometimes"), Coerced::Malformed);
    }

    #[test]
    fn test_coerce_category_keeps_country_codes() {
        // "NA" is Namibia, not a missing marker.
        assert_eq!(coerce_category("NA"), Coerced::Value("NA".to_string()));
        assert_eq!(coerce_category(" US "), Coerced::Value("US".to_string()));
        assert_eq!(coerce_category(""), Coerced::Missing);
    }
}
