// Timestamp parsing for picker values, uploads and flat files
use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("no valid date format found for '{0}'")]
pub struct TimestampError(pub String);

const LOCAL_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// File-name friendly rendering used by exports.
pub const EXPORT_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Parses a timestamp into a naive local time in `target`.
///
/// Values ending in `Z` are UTC and get converted; anything else is taken as
/// already being local.
pub fn parse_timestamp(text: &str, target: Tz) -> Result<NaiveDateTime, TimestampError> {
    let text = text.trim();
    if let Ok(utc) = NaiveDateTime::parse_from_str(text, UTC_FORMAT) {
        return Ok(Utc.from_utc_datetime(&utc).with_timezone(&target).naive_local());
    }
    LOCAL_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .ok_or_else(|| TimestampError(text.to_string()))
}

pub fn format_export(timestamp: NaiveDateTime) -> String {
    timestamp.format(EXPORT_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn jerusalem() -> Tz {
        chrono_tz::Asia::Jerusalem
    }

    #[test]
    fn test_local_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2023-01-01T00:00:00", jerusalem()), Ok(expected));
        assert_eq!(parse_timestamp("2023-01-01T00:00:00.000", jerusalem()), Ok(expected));
        assert_eq!(parse_timestamp("2023-01-01 00:00:00.000000", jerusalem()), Ok(expected));
        assert_eq!(parse_timestamp("2023-01-01 00:00:00", jerusalem()), Ok(expected));
    }

    #[test]
    fn test_utc_values_are_converted() {
        // Jerusalem is UTC+2 in January
        let parsed = parse_timestamp("2023-01-01T00:00:00.000Z", jerusalem()).unwrap();
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap().and_hms_opt(2, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_timestamp() {
        assert!(parse_timestamp("yesterday", jerusalem()).is_err());
    }

    #[test]
    fn test_export_format() {
        let ts = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap().and_hms_opt(1, 2, 3).unwrap();
        assert_eq!(format_export(ts), "2023-01-01_01-02-03");
    }
}
