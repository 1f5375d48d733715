//! Retention time parsing
//!
//! Retention times use the SLURM wall-time format or a plain number of
//! seconds:
//!
//! | Input        | Meaning               |
//! |--------------|-----------------------|
//! | `1-0:00`     | one day               |
//! | `12:00`      | twelve hours          |
//! | `0:01:23`    | one minute 23 seconds |
//! | `123`        | 123 seconds           |
//! | `-1`         | already expired       |

use crate::error::{StagecacheError, StagecacheResult};
use chrono::Duration;

/// Parse a retention string into a (possibly negative) duration
pub fn parse_retention(input: &str) -> StagecacheResult<Duration> {
    let input = input.trim();
    let invalid = || StagecacheError::InvalidRetention(input.to_string());

    if !input.contains(':') {
        return input
            .parse::<i64>()
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(invalid);
    }

    let (days, clock) = match input.split_once('-') {
        Some((days, clock)) => (parse_field(days, usize::MAX).ok_or_else(invalid)?, clock),
        None => (0, input),
    };

    let fields: Vec<&str> = clock.split(':').collect();
    let (hours, minutes, seconds) = match fields.as_slice() {
        [h, m] => (parse_field(h, 2), parse_field(m, 2), Some(0)),
        [h, m, s] => (parse_field(h, 2), parse_field(m, 2), parse_field(s, 2)),
        _ => return Err(invalid()),
    };
    let (hours, minutes, seconds) = match (hours, minutes, seconds) {
        (Some(h), Some(m), Some(s)) => (h, m, s),
        _ => return Err(invalid()),
    };

    days.checked_mul(24)
        .and_then(|h| h.checked_add(hours))
        .and_then(|h| h.checked_mul(60))
        .and_then(|m| m.checked_add(minutes))
        .and_then(|m| m.checked_mul(60))
        .and_then(|s| s.checked_add(seconds))
        .and_then(Duration::try_seconds)
        .ok_or_else(invalid)
}

/// Parse an unsigned decimal field of at most `max_digits` digits
fn parse_field(field: &str, max_digits: usize) -> Option<i64> {
    if field.is_empty() || field.len() > max_digits || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}
