//! Re-crawl scheduling.
//!
//! A subject is due when its last-crawl date is missing, unparseable, or
//! older than the staleness window.

use chrono::{Duration, NaiveDate};

/// Date format of the roster timestamp columns
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Whether a crawl is due. `last` is a `YYYY-MM-DD` string as stored in the roster.
pub fn is_due(last: Option<&str>, today: NaiveDate, window_days: i64) -> bool {
    match last.map(str::trim).filter(|s| !s.is_empty()).and_then(parse_date) {
        Some(last) => today.signed_duration_since(last) > Duration::days(window_days),
        None => true,
    }
}

/// Lenient date parsing: accepts `YYYY-MM-DD` with an optional time suffix.
fn parse_date(value: &str) -> Option<NaiveDate> {
    let date_part = value.split(|c: char| c == 'T' || c == ' ').next()?;
    NaiveDate::parse_from_str(date_part, DATE_FORMAT).ok()
}

/// Roster representation of a date.
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).expect("valid date")
    }

    fn days_ago(n: i64) -> String {
        format_date(today() - Duration::days(n))
    }

    #[test]
    fn test_recent_is_not_due() {
        assert!(!is_due(Some(&days_ago(29)), today(), 30));
        assert!(!is_due(Some(&days_ago(0)), today(), 30));
    }

    #[test]
    fn test_window_boundary() {
        assert!(!is_due(Some(&days_ago(30)), today(), 30));
        assert!(is_due(Some(&days_ago(31)), today(), 30));
    }

    #[test]
    fn test_missing_or_garbled_is_due() {
        assert!(is_due(None, today(), 30));
        assert!(is_due(Some(""), today(), 30));
        assert!(is_due(Some("   "), today(), 30));
        assert!(is_due(Some("last tuesday"), today(), 30));
        assert!(is_due(Some("2024-13-01"), today(), 30));
    }

    #[test]
    fn test_time_suffix_accepted() {
        assert!(!is_due(Some("2024-06-20 00:00:00"), today(), 30));
        assert!(!is_due(Some("2024-06-20T08:15:00Z"), today(), 30));
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date(today()), "2024-06-30");
    }
}
