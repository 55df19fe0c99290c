//! Calendar-month helpers
//!
//! Month boundaries key every billing table, and rollover expiry is pure
//! month arithmetic, so the calculations live in one place.

use time::{Date, Month, OffsetDateTime, Time};

/// Number of months an unused-word rollover remains spendable
pub const ROLLOVER_LIFETIME_MONTHS: i32 = 12;

/// First day of the month containing `date`
pub fn month_start(date: Date) -> Date {
    // Day 1 exists in every month; the fallback is unreachable
    date.replace_day(1).unwrap_or(date)
}

/// First day of the current UTC month
pub fn current_month_start(now: OffsetDateTime) -> Date {
    month_start(now.date())
}

/// Shift a date by whole months, clamping to the first of the month
pub fn add_months(date: Date, months: i32) -> Date {
    let zero_based = date.year() * 12 + i32::from(u8::from(date.month())) - 1 + months;
    let year = zero_based.div_euclid(12);
    let month = (zero_based.rem_euclid(12) + 1) as u8;

    Month::try_from(month)
        .ok()
        .and_then(|m| Date::from_calendar_date(year, m, 1).ok())
        .unwrap_or(date)
}

/// First day of the month before the one containing `date`
pub fn previous_month(date: Date) -> Date {
    add_months(month_start(date), -1)
}

/// Instant at which a rollover granted for `grant_month` expires
pub fn rollover_expiry(grant_month: Date) -> OffsetDateTime {
    add_months(grant_month, ROLLOVER_LIFETIME_MONTHS)
        .with_time(Time::MIDNIGHT)
        .assume_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn test_month_start() {
        assert_eq!(month_start(date!(2025 - 03 - 17)), date!(2025 - 03 - 01));
        assert_eq!(month_start(date!(2025 - 03 - 01)), date!(2025 - 03 - 01));
    }

    #[test]
    fn test_add_months_crosses_year_boundaries() {
        assert_eq!(add_months(date!(2025 - 11 - 01), 2), date!(2026 - 01 - 01));
        assert_eq!(add_months(date!(2025 - 01 - 01), -1), date!(2024 - 12 - 01));
        assert_eq!(add_months(date!(2025 - 06 - 01), 12), date!(2026 - 06 - 01));
    }

    #[test]
    fn test_previous_month() {
        assert_eq!(previous_month(date!(2025 - 01 - 15)), date!(2024 - 12 - 01));
        assert_eq!(previous_month(date!(2025 - 07 - 01)), date!(2025 - 06 - 01));
    }

    #[test]
    fn test_rollover_expiry_is_grant_month_plus_twelve() {
        assert_eq!(
            rollover_expiry(date!(2025 - 02 - 01)),
            datetime!(2026 - 02 - 01 00:00:00 UTC)
        );
    }
}
