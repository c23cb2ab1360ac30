//! Time code parsing and formatting
//!
//! Clip boundaries are written as `MM:SS` or `HH:MM:SS`. The last segment may
//! carry a fractional part (`01:02.5`); leading segments are whole numbers.

use std::time::Duration;

use crate::error::{ClipError, ClipResult};

/// Parse a `MM:SS` or `HH:MM:SS` time code into a duration
pub fn parse_timecode(input: &str) -> ClipResult<Duration> {
    let trimmed = input.trim();
    let parts: Vec<&str> = trimmed.split(':').collect();

    let malformed = |reason: &str| ClipError::MalformedTimecode {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if parts.len() != 2 && parts.len() != 3 {
        return Err(malformed("expected 2 or 3 segments"));
    }

    let (last, leading) = parts
        .split_last()
        .ok_or_else(|| malformed("empty time code"))?;

    let mut whole = Vec::with_capacity(leading.len());
    for segment in leading {
        whole.push(parse_whole_segment(segment).ok_or_else(|| malformed("non-numeric segment"))?);
    }
    let seconds = parse_seconds_segment(last).ok_or_else(|| malformed("non-numeric segment"))?;

    if seconds >= 60.0 {
        return Err(malformed("seconds must be below 60"));
    }

    let total_minutes = match whole.as_slice() {
        [minutes] => *minutes,
        [hours, minutes] => {
            if *minutes >= 60 {
                return Err(malformed("minutes must be below 60"));
            }
            hours
                .checked_mul(60)
                .and_then(|m| m.checked_add(*minutes))
                .ok_or_else(|| malformed("value out of range"))?
        }
        _ => return Err(malformed("expected 2 or 3 segments")),
    };

    let whole_secs = total_minutes
        .checked_mul(60)
        .ok_or_else(|| malformed("value out of range"))?;
    Ok(Duration::from_secs(whole_secs) + Duration::from_secs_f64(seconds))
}

fn parse_whole_segment(segment: &str) -> Option<u64> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

fn parse_seconds_segment(segment: &str) -> Option<f64> {
    let (int_part, frac_part) = match segment.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (segment, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Some(frac) = frac_part {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    segment.parse().ok()
}

/// Format a duration as `MM:SS`, or `HH:MM:SS` from one hour up.
///
/// Sub-second precision is floored away.
pub fn format_timecode(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minutes_seconds() {
        assert_eq!(parse_timecode("00:15").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_timecode("03:10").unwrap(), Duration::from_secs(190));
        assert_eq!(parse_timecode(" 90:00 ").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn test_parse_hours() {
        assert_eq!(parse_timecode("01:02:03").unwrap(), Duration::from_secs(3723));
        assert_eq!(parse_timecode("1:00:00").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_fractional_seconds() {
        assert_eq!(parse_timecode("00:01.5").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_rejects_bad_segment_counts() {
        for input in ["15", "", "1:2:3:4"] {
            let err = parse_timecode(input).unwrap_err();
            assert!(matches!(err, ClipError::MalformedTimecode { .. }), "{input}");
        }
    }

    #[test]
    fn test_rejects_non_numeric_and_negative() {
        for input in ["aa:10", "00:-5", "-1:00", "00:1e1", "00:.5", "01.5:00", "00:5."] {
            assert!(parse_timecode(input).is_err(), "{input} should be rejected");
        }
    }

    #[test]
    fn test_rejects_overflowing_fields() {
        assert!(parse_timecode("00:60").is_err());
        assert!(parse_timecode("01:60:00").is_err());
    }

    #[test]
    fn test_format_omits_hours_below_one_hour() {
        assert_eq!(format_timecode(Duration::from_secs(0)), "00:00");
        assert_eq!(format_timecode(Duration::from_secs(3599)), "59:59");
        assert_eq!(format_timecode(Duration::from_secs(3600)), "01:00:00");
        assert_eq!(format_timecode(Duration::from_millis(15_999)), "00:15");
    }

    #[test]
    fn test_canonical_strings_round_trip() {
        for s in ["00:00", "00:15", "12:34", "59:59", "01:00:00", "10:20:30"] {
            assert_eq!(format_timecode(parse_timecode(s).unwrap()), s);
        }
    }

    #[test]
    fn test_durations_round_trip_to_floor() {
        for millis in [0u64, 999, 1_000, 61_250, 3_599_999, 3_600_000, 7_384_500] {
            let d = Duration::from_millis(millis);
            let floored = Duration::from_secs(d.as_secs());
            assert_eq!(parse_timecode(&format_timecode(d)).unwrap(), floored);
        }
    }
}
