//! Calendar-week labels for photos.
//!
//! A photo's week is the ISO-8601 week of its capture instant as seen on a
//! wall clock in the regional zone (Europe/Berlin). Offsets come from the IANA
//! time zone database, so historical rules apply to old capture dates: no
//! summer time from 1950 to 1979, and summer time ending in September before
//! 1996.

use chrono::{DateTime, Datelike, FixedOffset, Offset, TimeZone, Utc};
use chrono_tz::Tz;

/// A regional wall-clock zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionalZone {
    /// An IANA zone with its full offset history.
    Named(Tz),
    /// A fixed offset in seconds east of UTC.
    Fixed(i32),
}

/// The zone calendar weeks are bucketed in.
pub const EUROPE_BERLIN: RegionalZone = RegionalZone::Named(chrono_tz::Europe::Berlin);

impl RegionalZone {
    /// A zone with a fixed offset and no daylight saving.
    pub const fn fixed(offset_secs: i32) -> Self {
        RegionalZone::Fixed(offset_secs)
    }

    /// The UTC offset in effect at `instant`.
    pub fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset {
        match self {
            RegionalZone::Named(tz) => tz.offset_from_utc_datetime(&instant.naive_utc()).fix(),
            RegionalZone::Fixed(secs) => FixedOffset::east_opt(*secs).unwrap_or_else(|| Utc.fix()),
        }
    }

    /// Convert `instant` to wall-clock time in this zone.
    pub fn to_local(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.offset_at(instant))
    }
}

/// Label of the ISO week containing `taken_at` in the regional zone, e.g. `2024-W01`.
pub fn calendar_week_label(taken_at: DateTime<Utc>) -> String {
    calendar_week_label_in(taken_at, EUROPE_BERLIN)
}

/// Same as [`calendar_week_label`] for an explicit zone.
pub fn calendar_week_label_in(taken_at: DateTime<Utc>, zone: RegionalZone) -> String {
    let iso = zone.to_local(taken_at).iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}

/// Whether a label looks like `YYYY-Www` with a week between 1 and 53.
pub fn is_valid_week_label(label: &str) -> bool {
    let Some((year, week)) = label.split_once("-W") else {
        return false;
    };
    year.len() == 4
        && year.chars().all(|c| c.is_ascii_digit())
        && week.len() == 2
        && week
            .parse::<u32>()
            .map(|w| (1..=53).contains(&w))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_new_year_2024_is_week_one() {
        assert_eq!(calendar_week_label(utc("2024-01-01T00:00:00Z")), "2024-W01");
    }

    #[test]
    fn test_regional_zone_applied_before_week_computation() {
        // 23:30 UTC on Sunday 2023-12-31 is already Monday 2024-01-01 in Berlin
        assert_eq!(calendar_week_label(utc("2023-12-31T23:30:00Z")), "2024-W01");
        assert_eq!(
            calendar_week_label_in(utc("2023-12-31T23:30:00Z"), RegionalZone::fixed(0)),
            "2023-W52"
        );
    }

    #[test]
    fn test_iso_year_differs_from_calendar_year() {
        assert_eq!(calendar_week_label(utc("2021-01-03T12:00:00Z")), "2020-W53");
        assert_eq!(calendar_week_label(utc("2024-12-30T12:00:00Z")), "2025-W01");
    }

    #[test]
    fn test_week_zero_padded() {
        assert_eq!(calendar_week_label(utc("2024-02-14T10:00:00Z")), "2024-W07");
    }

    #[test]
    fn test_summer_time_offset() {
        let winter = EUROPE_BERLIN.offset_at(utc("2024-01-15T12:00:00Z"));
        let summer = EUROPE_BERLIN.offset_at(utc("2024-07-15T12:00:00Z"));
        assert_eq!(winter.local_minus_utc(), 3600);
        assert_eq!(summer.local_minus_utc(), 7200);
    }

    #[test]
    fn test_summer_time_boundaries_2024() {
        // 2024: starts 2024-03-31 01:00 UTC, ends 2024-10-27 01:00 UTC
        assert_eq!(
            EUROPE_BERLIN
                .offset_at(utc("2024-03-31T00:59:59Z"))
                .local_minus_utc(),
            3600
        );
        assert_eq!(
            EUROPE_BERLIN
                .offset_at(utc("2024-03-31T01:00:00Z"))
                .local_minus_utc(),
            7200
        );
        assert_eq!(
            EUROPE_BERLIN
                .offset_at(utc("2024-10-27T00:59:59Z"))
                .local_minus_utc(),
            7200
        );
        assert_eq!(
            EUROPE_BERLIN
                .offset_at(utc("2024-10-27T01:00:00Z"))
                .local_minus_utc(),
            3600
        );
    }

    #[test]
    fn test_sunday_night_in_summer_rolls_into_next_week() {
        // Sunday 2024-06-09 22:30 UTC is Monday 00:30 CEST
        assert_eq!(calendar_week_label(utc("2024-06-09T22:30:00Z")), "2024-W24");
        assert_eq!(calendar_week_label(utc("2024-06-09T21:30:00Z")), "2024-W23");
    }

    #[test]
    fn test_summer_time_ended_in_september_before_1996() {
        // 1995-10-01 22:30 UTC is Sunday 23:30 CET
        assert_eq!(
            EUROPE_BERLIN
                .offset_at(utc("1995-10-01T22:30:00Z"))
                .local_minus_utc(),
            3600
        );
        assert_eq!(calendar_week_label(utc("1995-10-01T22:30:00Z")), "1995-W39");
    }

    #[test]
    fn test_no_summer_time_in_the_seventies() {
        // 1975-06-01 22:30 UTC is Sunday 23:30 CET
        assert_eq!(calendar_week_label(utc("1975-06-01T22:30:00Z")), "1975-W22");
        assert_eq!(
            EUROPE_BERLIN
                .offset_at(utc("1975-06-01T12:00:00Z"))
                .local_minus_utc(),
            3600
        );
    }

    #[test]
    fn test_week_label_validation() {
        assert!(is_valid_week_label("2024-W01"));
        assert!(is_valid_week_label("2020-W53"));
        assert!(!is_valid_week_label("2024-W1"));
        assert!(!is_valid_week_label("2024-W54"));
        assert!(!is_valid_week_label("2024-01"));
        assert!(!is_valid_week_label("24-W01"));
    }
}
