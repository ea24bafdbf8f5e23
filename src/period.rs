//! UTC calendar buckets used for accrual dedup and balance rollups.
//!
//! All boundaries are computed in UTC so that a single computation never mixes
//! time references. Intervals are closed: `end()` is the last representable
//! instant before the next bucket starts.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{LedgerError, Result};

/// the temporal bucket deciding whether a charge is already present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccrualPeriod {
    Month { year: i32, month: u32 },
    Day(NaiveDate),
}

impl AccrualPeriod {
    /// calendar month containing `at`
    pub fn month_of(at: DateTime<Utc>) -> Self {
        AccrualPeriod::Month {
            year: at.year(),
            month: at.month(),
        }
    }

    /// calendar day containing `at`
    pub fn day_of(at: DateTime<Utc>) -> Self {
        AccrualPeriod::Day(at.date_naive())
    }

    pub fn start(&self) -> Result<DateTime<Utc>> {
        match *self {
            AccrualPeriod::Month { year, month } => month_start(year, month),
            AccrualPeriod::Day(date) => Ok(midnight(date)),
        }
    }

    pub fn end(&self) -> Result<DateTime<Utc>> {
        let next = match *self {
            AccrualPeriod::Month { year, month } => {
                let (y, m) = if month == 12 {
                    let next_year = year.checked_add(1).ok_or_else(|| LedgerError::InvalidDate {
                        message: format!("no year after {year}"),
                    })?;
                    (next_year, 1)
                } else {
                    (year, month + 1)
                };
                month_start(y, m)?
            }
            AccrualPeriod::Day(date) => {
                let next = date.succ_opt().ok_or_else(|| LedgerError::InvalidDate {
                    message: format!("no day after {date}"),
                })?;
                midnight(next)
            }
        };
        Ok(next - Duration::nanoseconds(1))
    }

    /// closed-interval membership test
    pub fn contains(&self, at: DateTime<Utc>) -> Result<bool> {
        Ok(self.start()? <= at && at <= self.end()?)
    }

    /// stable text key, e.g. `2024-02` or `2024-02-15`
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AccrualPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccrualPeriod::Month { year, month } => write!(f, "{year:04}-{month:02}"),
            AccrualPeriod::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn month_start(year: i32, month: u32) -> Result<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(midnight)
        .ok_or_else(|| LedgerError::InvalidDate {
            message: format!("month {month} of year {year} is out of range"),
        })
}

/// closed span of one civil month
pub fn month_span(year: i32, month: u32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    if !(1..=12).contains(&month) {
        return Err(LedgerError::InvalidDate {
            message: format!("month must be 1-12, got {month}"),
        });
    }
    let period = AccrualPeriod::Month { year, month };
    Ok((period.start()?, period.end()?))
}

/// closed span of one civil year
pub fn year_span(year: i32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let (start, _) = month_span(year, 1)?;
    let (_, end) = month_span(year, 12)?;
    Ok((start, end))
}
