//! ISO-8601 date handling for the wire format.
//!
//! Dates travel as `yyyy-MM-ddTHH:mm:ss.SSSZ`, always UTC with millisecond
//! precision.

use crate::error::{CodecError, CodecResult};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Timelike, Utc};

/// Formats a date in the wire representation.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a wire date string.
///
/// Offsets other than `Z` are accepted and normalized to UTC. A string
/// without any offset is read as UTC.
///
/// # Errors
///
/// Returns [`CodecError::InvalidDate`] if the string is not ISO-8601.
pub fn parse_date(value: &str) -> CodecResult<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| CodecError::InvalidDate {
            value: value.to_string(),
        })
}

/// Drops sub-millisecond precision, which the wire cannot carry.
pub fn truncate_to_millis(date: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = date.nanosecond();
    date.with_nanosecond(nanos - nanos % 1_000_000).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_uses_millis_and_zulu() {
        let date = Utc.with_ymd_and_hms(2015, 7, 14, 15, 55, 52).unwrap()
            + chrono::Duration::milliseconds(133);
        assert_eq!(format_date(&date), "2015-07-14T15:55:52.133Z");
    }

    #[test]
    fn parse_roundtrip() {
        let date = parse_date("2015-07-14T15:55:52.133Z").unwrap();
        assert_eq!(format_date(&date), "2015-07-14T15:55:52.133Z");
    }

    #[test]
    fn parse_normalizes_offset() {
        let date = parse_date("2015-07-14T17:55:52.133+02:00").unwrap();
        assert_eq!(format_date(&date), "2015-07-14T15:55:52.133Z");
    }

    #[test]
    fn parse_without_offset() {
        let date = parse_date("2015-07-14T15:55:52.133").unwrap();
        assert_eq!(format_date(&date), "2015-07-14T15:55:52.133Z");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            parse_date("yesterday"),
            Err(CodecError::InvalidDate { .. })
        ));
    }

    #[test]
    fn truncation_drops_micros() {
        let date = parse_date("2015-07-14T15:55:52.133456Z").unwrap();
        assert_eq!(
            truncate_to_millis(date),
            parse_date("2015-07-14T15:55:52.133Z").unwrap()
        );
    }
}
