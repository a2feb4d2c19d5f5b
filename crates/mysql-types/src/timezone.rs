//! Source database timezone offsets.

use chrono::FixedOffset;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TimezoneError {
    #[error("Invalid timezone offset '{0}': expected [+-]HH:MM")]
    InvalidOffset(String),
}

/// Parse an offset like `+00:00`, `-07:00` or `+0530`.
///
/// `Z` and `UTC` are accepted as aliases for `+00:00`.
pub fn parse_timezone_offset(s: &str) -> Result<FixedOffset, TimezoneError> {
    let invalid = || TimezoneError::InvalidOffset(s.to_string());
    let trimmed = s.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };
    if !rest.is_ascii() {
        return Err(invalid());
    }
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => return Err(invalid()),
    };
    if hours.len() != 2 || minutes.len() != 2 {
        return Err(invalid());
    }
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
