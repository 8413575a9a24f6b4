//! Period keys and bounds for each granularity.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::models::{Granularity, DATE_FORMAT};

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Quarter (1..=4) of a calendar month (1..=12).
pub fn quarter_of(month: u32) -> u32 {
    (month - 1) / 3 + 1
}

pub fn hour_key(at: NaiveDateTime) -> String {
    format!("{} {:02}:00", at.date().format(DATE_FORMAT), at.hour())
}

pub fn day_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn month_key(year: i32, month: u32) -> String {
    format!("{year:04}-{month:02}")
}

/// Key of the period of `granularity` that contains `date`. Hourly periods
/// are keyed per hour; for them this is the key of the day's first hour.
pub fn period_key(granularity: Granularity, date: NaiveDate) -> String {
    match granularity {
        Granularity::Hourly => format!("{} 00:00", day_key(date)),
        Granularity::Daily => day_key(date),
        Granularity::Weekly => day_key(week_start(date)),
        Granularity::Monthly => month_key(date.year(), date.month()),
        Granularity::Quarterly => format!("{:04}-Q{}", date.year(), quarter_of(date.month())),
        Granularity::Yearly => format!("{:04}", date.year()),
    }
}

/// Inclusive key range, in the finer table, of the rows a coarser period is
/// built from: daily keys for weekly and monthly, monthly keys for quarterly
/// and yearly.
pub fn source_key_range(granularity: Granularity, date: NaiveDate) -> Option<(String, String)> {
    match granularity {
        Granularity::Hourly | Granularity::Daily => None,
        Granularity::Weekly => {
            let monday = week_start(date);
            Some((day_key(monday), day_key(monday + Duration::days(6))))
        }
        Granularity::Monthly => {
            let first = format!("{}-01", month_key(date.year(), date.month()));
            let last = format!("{}-31", month_key(date.year(), date.month()));
            Some((first, last))
        }
        Granularity::Quarterly => {
            let q = quarter_of(date.month());
            let first_month = (q - 1) * 3 + 1;
            Some((
                month_key(date.year(), first_month),
                month_key(date.year(), first_month + 2),
            ))
        }
        Granularity::Yearly => Some((month_key(date.year(), 1), month_key(date.year(), 12))),
    }
}

/// The granularity whose rows a derived granularity is built from.
pub fn source_granularity(granularity: Granularity) -> Option<Granularity> {
    match granularity {
        Granularity::Hourly | Granularity::Daily => None,
        Granularity::Weekly | Granularity::Monthly => Some(Granularity::Daily),
        Granularity::Quarterly | Granularity::Yearly => Some(Granularity::Monthly),
    }
}
