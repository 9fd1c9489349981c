//! Timestamp and calendar utilities
//!
//! Readings are bucketed by ISO 8601 week. Dates are evaluated in UTC.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};

/// Day on which the week-end reading is expected
pub const CLOSING_DAY: Weekday = Weekday::Fri;

/// Source of the current instant
///
/// The service holds an `Arc<dyn Clock>` so tests can pin the calendar
/// (closing-day checks depend on the weekday).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock (UTC)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Noon UTC on the given date
    pub fn on(date: NaiveDate) -> Self {
        let noon = date
            .and_hms_opt(12, 0, 0)
            .unwrap_or_default()
            .and_utc();
        Self(noon)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// ISO week number and ISO year of a date
pub fn iso_week_year(date: NaiveDate) -> (u32, i32) {
    let iso = date.iso_week();
    (iso.week(), iso.year())
}

/// Whether `date` is the designated closing day
pub fn is_closing_day(date: NaiveDate) -> bool {
    date.weekday() == CLOSING_DAY
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_iso_week_mid_year() {
        // 2026-10-16 is a Friday in ISO week 42
        assert_eq!(iso_week_year(date(2026, 10, 16)), (42, 2026));
    }

    #[test]
    fn test_iso_week_year_boundary() {
        // 2027-01-01 belongs to ISO week 53 of 2026
        assert_eq!(iso_week_year(date(2027, 1, 1)), (53, 2026));
        // 2024-12-30 belongs to ISO week 1 of 2025
        assert_eq!(iso_week_year(date(2024, 12, 30)), (1, 2025));
    }

    #[test]
    fn test_closing_day_is_friday_only() {
        assert!(is_closing_day(date(2026, 10, 16)));
        assert!(!is_closing_day(date(2026, 10, 12)));
        assert!(!is_closing_day(date(2026, 10, 17)));
    }

    #[test]
    fn test_fixed_clock_reports_its_date() {
        let clock = FixedClock::on(date(2026, 10, 12));
        assert_eq!(clock.today(), date(2026, 10, 12));
        assert_eq!(clock.today().weekday(), Weekday::Mon);
    }

    #[test]
    fn test_system_clock_returns_recent_timestamp() {
        let before = Utc::now();
        let timestamp = SystemClock.now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
        assert!(timestamp >= before);
    }
}
