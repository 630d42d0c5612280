//! Timeframe phrases to concrete date ranges

use crate::analyzer::Timeframe;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

/// Inclusive range, rendered as `>=` start and `<=` end conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    /// Format shared by all three engines for date/time comparisons
    pub fn format(ts: NaiveDateTime) -> String {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn month_start(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn quarter_start(date: NaiveDate) -> Option<NaiveDate> {
    month_start(date.year(), (date.month() - 1) / 3 * 3 + 1)
}

/// Whole days `[first, last]`
fn days(first: NaiveDate, last: NaiveDate) -> Option<DateRange> {
    Some(DateRange {
        start: first.and_hms_opt(0, 0, 0)?,
        end: last.and_hms_opt(23, 59, 59)?,
    })
}

/// From the start of `first` through `now`
fn to_date(first: NaiveDate, now: NaiveDateTime) -> Option<DateRange> {
    Some(DateRange {
        start: first.and_hms_opt(0, 0, 0)?,
        end: now,
    })
}

/// Resolve a timeframe relative to `now`. Periods in progress end at `now`;
/// completed periods end on their last second.
pub fn date_range(timeframe: Timeframe, now: NaiveDateTime) -> Option<DateRange> {
    let today = now.date();
    match timeframe {
        Timeframe::Today => to_date(today, now),
        Timeframe::Yesterday => {
            let yesterday = today - Duration::days(1);
            days(yesterday, yesterday)
        }
        Timeframe::ThisWeek => {
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            to_date(monday, now)
        }
        Timeframe::LastWeek => {
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64 + 7);
            days(monday, monday + Duration::days(6))
        }
        Timeframe::ThisMonth => to_date(month_start(today.year(), today.month())?, now),
        Timeframe::LastMonth => {
            let this_month = month_start(today.year(), today.month())?;
            let last_day = this_month - Duration::days(1);
            days(month_start(last_day.year(), last_day.month())?, last_day)
        }
        Timeframe::ThisQuarter => to_date(quarter_start(today)?, now),
        Timeframe::LastQuarter => {
            let this_quarter = quarter_start(today)?;
            let last_day = this_quarter - Duration::days(1);
            days(quarter_start(last_day)?, last_day)
        }
        Timeframe::ThisYear => to_date(month_start(today.year(), 1)?, now),
        Timeframe::LastYear => days(
            month_start(today.year() - 1, 1)?,
            month_start(today.year(), 1)? - Duration::days(1),
        ),
        Timeframe::LastNDays(n) => Some(DateRange {
            start: now - Duration::days(n as i64),
            end: now,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 30, 0).unwrap()
    }

    #[test]
    fn test_this_month_runs_to_now() {
        let now = at(2024, 5, 17, 14);
        let range = date_range(Timeframe::ThisMonth, now).unwrap();
        assert_eq!(DateRange::format(range.start), "2024-05-01 00:00:00");
        assert_eq!(range.end, now);
    }

    #[test]
    fn test_last_month_across_year_boundary() {
        let range = date_range(Timeframe::LastMonth, at(2024, 1, 10, 9)).unwrap();
        assert_eq!(DateRange::format(range.start), "2023-12-01 00:00:00");
        assert_eq!(DateRange::format(range.end), "2023-12-31 23:59:59");
    }

    #[test]
    fn test_quarters() {
        let now = at(2024, 8, 3, 9);
        let this = date_range(Timeframe::ThisQuarter, now).unwrap();
        assert_eq!(DateRange::format(this.start), "2024-07-01 00:00:00");
        let last = date_range(Timeframe::LastQuarter, now).unwrap();
        assert_eq!(DateRange::format(last.start), "2024-04-01 00:00:00");
        assert_eq!(DateRange::format(last.end), "2024-06-30 23:59:59");
    }

    #[test]
    fn test_weeks_start_on_monday() {
        // 2024-05-17 is a Friday
        let now = at(2024, 5, 17, 9);
        let this = date_range(Timeframe::ThisWeek, now).unwrap();
        assert_eq!(DateRange::format(this.start), "2024-05-13 00:00:00");
        let last = date_range(Timeframe::LastWeek, now).unwrap();
        assert_eq!(DateRange::format(last.start), "2024-05-06 00:00:00");
        assert_eq!(DateRange::format(last.end), "2024-05-12 23:59:59");
    }

    #[test]
    fn test_last_year_and_n_days() {
        let now = at(2024, 3, 1, 0);
        let year = date_range(Timeframe::LastYear, now).unwrap();
        assert_eq!(DateRange::format(year.end), "2023-12-31 23:59:59");
        let recent = date_range(Timeframe::LastNDays(30), now).unwrap();
        assert_eq!(DateRange::format(recent.start), "2024-01-31 00:30:00");
    }
}
