//! Sync cursor bookkeeping.
//!
//! The cursor is the newest "last modified" timestamp mirrored so far. It only
//! ever moves forward.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::remote::Record;

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Render a cursor: UTC, millisecond precision, `Z` suffix.
#[must_use]
pub fn format_cursor(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Newest parseable value of `field` across `records`.
#[must_use]
pub fn max_timestamp(records: &[Record], field: &str) -> Option<DateTime<Utc>> {
    records
        .iter()
        .filter_map(|record| record.field(field)?.as_str())
        .filter_map(parse_timestamp)
        .max()
}

/// Next cursor: the later of `previous` and `observed`, else `previous`,
/// else now.
#[must_use]
pub fn advance_cursor(previous: Option<&str>, observed: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let previous = previous.and_then(parse_timestamp);
    match (previous, observed) {
        (Some(prev), Some(seen)) => prev.max(seen),
        (Some(prev), None) => prev,
        (None, Some(seen)) => seen,
        (None, None) => Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_rfc3339_and_dates() {
        let ts = parse_timestamp("2024-03-01T10:20:30.123+02:00").unwrap();
        assert_eq!(format_cursor(ts), "2024-03-01T08:20:30.123Z");

        let day = parse_timestamp("2024-03-01").unwrap();
        assert_eq!(format_cursor(day), "2024-03-01T00:00:00.000Z");

        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("last tuesday").is_none());
    }

    #[test]
    fn test_max_timestamp_skips_unparseable_values() {
        let records = vec![
            Record::new("a", json!({"Updated": "2024-01-02T00:00:00.000Z"})),
            Record::new("b", json!({"Updated": "garbage"})),
            Record::new("c", json!({"Updated": "2024-05-06T07:08:09.000Z"})),
            Record::new("d", json!({"Updated": 42})),
            Record::new("e", json!({})),
        ];

        let max = max_timestamp(&records, "Updated").unwrap();
        assert_eq!(format_cursor(max), "2024-05-06T07:08:09.000Z");
        assert!(max_timestamp(&records, "Missing").is_none());
    }

    #[test]
    fn test_cursor_never_moves_backwards() {
        let older = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let next = advance_cursor(Some("2024-06-01T00:00:00.000Z"), Some(older));
        assert_eq!(format_cursor(next), "2024-06-01T00:00:00.000Z");

        let next = advance_cursor(Some("2024-06-01T00:00:00.000Z"), Some(newer));
        assert_eq!(next, newer);

        let next = advance_cursor(Some("2024-06-01T00:00:00.000Z"), None);
        assert_eq!(format_cursor(next), "2024-06-01T00:00:00.000Z");
    }

    #[test]
    fn test_cursor_falls_back_to_now() {
        let before = Utc::now();
        let next = advance_cursor(None, None);
        assert!(next >= before);

        let next = advance_cursor(Some("not a time"), None);
        assert!(next >= before);
    }
}
