//! Generalized-time strings (`YYYYMMDDHHMMSS.0Z`).

use crate::error::{DirError, DirResult};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day][hour][minute][second].0Z");

/// Formats a Unix time as a generalized-time string.
///
/// # Errors
///
/// Returns `Syntax` if the time is outside the representable range.
pub fn timestring(unix: i64) -> DirResult<String> {
    let at = OffsetDateTime::from_unix_timestamp(unix)
        .map_err(|e| DirError::syntax(format!("time {unix} out of range: {e}")))?;
    at.format(FORMAT)
        .map_err(|e| DirError::syntax(format!("cannot format time {unix}: {e}")))
}

/// Returns the current time as a generalized-time string.
#[must_use]
pub fn now_timestring() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(FORMAT)
        .unwrap_or_else(|_| format!("{}.0Z", now.unix_timestamp()))
}

/// Returns the current Unix time.
#[must_use]
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Parses a generalized-time string into a Unix time.
///
/// # Errors
///
/// Returns `Syntax` for malformed input.
pub fn parse_timestring(text: &str) -> DirResult<i64> {
    PrimitiveDateTime::parse(text.trim(), FORMAT)
        .map(|at| at.assume_utc().unix_timestamp())
        .map_err(|e| DirError::syntax(format!("invalid time string '{text}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_known_instant() {
        assert_eq!(timestring(0).unwrap(), "19700101000000.0Z");
        assert_eq!(timestring(1_190_000_000).unwrap(), "20070917033320.0Z");
    }

    #[test]
    fn parse_inverts_format() {
        let unix = 1_700_000_123;
        assert_eq!(parse_timestring(&timestring(unix).unwrap()).unwrap(), unix);
    }

    #[test]
    fn now_has_expected_shape() {
        let now = now_timestring();
        assert_eq!(now.len(), 17);
        assert!(now.ends_with(".0Z"));
    }

    #[test]
    fn malformed_time_fails() {
        assert!(parse_timestring("2007-09-17").is_err());
        assert!(parse_timestring("20071317000000.0Z").is_err());
    }
}
