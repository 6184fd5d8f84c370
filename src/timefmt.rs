//! Timestamp normalization for backend time fields.
//!
//! The backend emits at least three incompatible shapes in its time
//! columns: a day+time (`23.05 - 20:47`, year never included), a bare
//! time-of-day (`21:04`), and a time-of-day with a repetition count
//! (`20:04 (3 ganger)`). Some rows carry text that is not a time at all.
//! Rules are applied in a fixed order and the first match wins; anything
//! unmatched is handed back verbatim so callers can tolerate a non-time
//! value in a time column.

use chrono::{DateTime, Datelike, Local, LocalResult, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static DAY_MONTH_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2})\.(\d{2}) - (\d{2}):(\d{2})").expect("static pattern")
});
static TIME_OF_DAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2}):(\d{2})( \(\d+ ganger\))?").expect("static pattern"));

/// Result of normalizing one raw time field.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedTimestamp {
    /// Field was empty or a literal zero; no timestamp was reported
    Absent,
    /// Resolved to an absolute instant
    At(DateTime<Utc>),
    /// No rule matched; the raw value, unchanged
    Verbatim(String),
}

impl ParsedTimestamp {
    /// The resolved instant, when there is one.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            ParsedTimestamp::At(dt) => Some(*dt),
            _ => None,
        }
    }
}

/// Normalize a raw time field against a reference instant.
///
/// The reference supplies the calendar pieces the backend never sends: the
/// current year for day+time values, the current date for bare times. The
/// assembled local date-time is converted to UTC. A match whose calendar
/// combination is impossible (for instance day 31 in month 02) falls
/// through to the next rule.
pub fn normalize(raw: &str, reference: DateTime<Local>) -> ParsedTimestamp {
    let text = raw.trim();

    if text.is_empty() || is_literal_zero(text) {
        return ParsedTimestamp::Absent;
    }

    if let Some(caps) = DAY_MONTH_TIME.captures(text) {
        let (day, month) = (num(&caps, 1), num(&caps, 2));
        let (hour, minute) = (num(&caps, 3), num(&caps, 4));
        if let Some(dt) = local_instant(reference.year(), month, day, hour, minute) {
            return ParsedTimestamp::At(dt);
        }
    }

    if let Some(caps) = TIME_OF_DAY.captures(text) {
        let (hour, minute) = (num(&caps, 1), num(&caps, 2));
        if let Some(dt) = local_instant(
            reference.year(),
            reference.month(),
            reference.day(),
            hour,
            minute,
        ) {
            return ParsedTimestamp::At(dt);
        }
    }

    ParsedTimestamp::Verbatim(raw.to_string())
}

fn is_literal_zero(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii_digit()) && text.parse::<i64>() == Ok(0)
}

fn num(caps: &regex::Captures<'_>, index: usize) -> u32 {
    // Capture groups are \d{2}, parse cannot fail.
    caps[index].parse().unwrap_or(0)
}

fn local_instant(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    match Local.with_ymd_and_hms(year, month, day, hour, minute, 0) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        // DST fold: take the earlier wall-clock reading
        LocalResult::Ambiguous(dt, _) => Some(dt.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn reference() -> DateTime<Local> {
        match Local.with_ymd_and_hms(2023, 5, 28, 12, 0, 0) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
            LocalResult::None => unreachable!("reference date exists"),
        }
    }

    #[test]
    fn test_empty_and_zero_are_absent() {
        assert_eq!(normalize("", reference()), ParsedTimestamp::Absent);
        assert_eq!(normalize("0", reference()), ParsedTimestamp::Absent);
        assert_eq!(normalize("000", reference()), ParsedTimestamp::Absent);
        assert_eq!(normalize("  ", reference()), ParsedTimestamp::Absent);
    }

    #[test]
    fn test_day_month_time_uses_reference_year() {
        let parsed = normalize("23.05 - 20:47", reference());
        let local = parsed.instant().expect("instant").with_timezone(&Local);
        assert_eq!(local.year(), 2023);
        assert_eq!(local.month(), 5);
        assert_eq!(local.day(), 23);
        assert_eq!((local.hour(), local.minute()), (20, 47));
    }

    #[test]
    fn test_bare_time_uses_reference_date() {
        let parsed = normalize("21:04", reference());
        let local = parsed.instant().expect("instant").with_timezone(&Local);
        assert_eq!((local.year(), local.month(), local.day()), (2023, 5, 28));
        assert_eq!((local.hour(), local.minute()), (21, 4));
    }

    #[test]
    fn test_repetition_count_is_stripped() {
        let plain = normalize("20:04", reference());
        let counted = normalize("20:04 (3 ganger)", reference());
        assert_eq!(plain, counted);
        assert!(counted.instant().is_some());
    }

    #[test]
    fn test_unmatched_text_is_returned_verbatim() {
        assert_eq!(
            normalize("garbage", reference()),
            ParsedTimestamp::Verbatim("garbage".into())
        );
        assert_eq!(
            normalize("53 year", reference()),
            ParsedTimestamp::Verbatim("53 year".into())
        );
    }

    #[test]
    fn test_numeric_non_zero_is_verbatim() {
        // Raw unix timestamps in skipped columns must not be mistaken for
        // any of the time patterns.
        assert_eq!(
            normalize("1685383471", reference()),
            ParsedTimestamp::Verbatim("1685383471".into())
        );
    }

    #[test]
    fn test_impossible_calendar_date_falls_through() {
        // Day/month swapped relative to what the pattern assumes would
        // produce month 31; the rule must not panic, and the text ends up
        // verbatim once the time-of-day rule also fails to apply.
        assert_eq!(
            normalize("31.31 - 10:00", reference()),
            ParsedTimestamp::Verbatim("31.31 - 10:00".into())
        );
    }

    #[test]
    fn test_out_of_range_time_of_day_is_verbatim() {
        assert_eq!(
            normalize("25:99", reference()),
            ParsedTimestamp::Verbatim("25:99".into())
        );
    }

    #[test]
    fn test_leap_day_resolves_in_leap_years() {
        let leap_ref = match Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
            LocalResult::None => unreachable!(),
        };
        let parsed = normalize("29.02 - 08:15", leap_ref);
        let local = parsed.instant().expect("leap day exists in 2024");
        assert_eq!(local.with_timezone(&Local).day(), 29);
    }
}
