use chrono::{FixedOffset, Offset, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::ConvertError;

/// Resolve a timezone spec into a fixed offset.
///
/// Accepts `UTC`, a numeric offset `[+-]HH[:MM]` (or `[+-]HHMM`), or a
/// named zone `Region/City`. Named zones resolve to the offset in effect
/// right now; historical transitions are not applied to older timestamps.
pub fn resolve_timezone(spec: &str) -> Result<FixedOffset, ConvertError> {
    let spec = spec.trim();
    let invalid = || ConvertError::InvalidTimezone(spec.to_string());

    if spec.eq_ignore_ascii_case("UTC") {
        return Ok(Utc.fix());
    }

    if let Some(rest) = spec.strip_prefix('+') {
        let secs = parse_offset_secs(rest).ok_or_else(invalid)?;
        return FixedOffset::east_opt(secs).ok_or_else(invalid);
    }

    if let Some(rest) = spec.strip_prefix('-') {
        let secs = parse_offset_secs(rest).ok_or_else(invalid)?;
        return FixedOffset::west_opt(secs).ok_or_else(invalid);
    }

    if spec.contains('/') {
        let tz: Tz = spec.parse().map_err(|_| invalid())?;
        let now = Utc::now().naive_utc();
        return Ok(tz.offset_from_utc_datetime(&now).fix());
    }

    Err(invalid())
}

fn parse_offset_secs(s: &str) -> Option<i32> {
    if !s.bytes().all(|b| b.is_ascii_digit() || b == b':') {
        return None;
    }

    let (hh, mm) = match s.len() {
        2 => (s, "00"),
        4 => s.split_at(2),
        5 if s.as_bytes()[2] == b':' => (&s[..2], &s[3..]),
        _ => return None,
    };

    if !hh.bytes().chain(mm.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = hh.parse().ok()?;
    let minutes: i32 = mm.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }

    Some(hours * 3600 + minutes * 60)
}

#[cfg(test)]
#[path = "timezone_tests.rs"]
mod tests;
