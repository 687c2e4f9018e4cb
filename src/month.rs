//! Calendar-month arithmetic for the backfill period sequence.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonthError {
    #[error("month must be formatted as YYYY-MM, got {0:?}")]
    Format(String),
    #[error("month component must be between 1 and 12, got {0}")]
    OutOfRange(u32),
    #[error("start month {start} is after end month {end}")]
    InvertedRange { start: Month, end: Month },
}

/// One calendar month, the atomic unit of the backfill sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self, MonthError> {
        if (1..=12).contains(&month) {
            Ok(Self { year, month })
        } else {
            Err(MonthError::OutOfRange(month))
        }
    }

    /// The current month in UTC.
    pub fn current() -> Self {
        let now = Utc::now();
        Self {
            year: now.year(),
            month: now.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn succ(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn pred(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = MonthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let format_err = || MonthError::Format(value.to_string());
        let (year, month) = value.split_once('-').ok_or_else(format_err)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(format_err());
        }
        let year: i32 = year.parse().map_err(|_| format_err())?;
        let month: u32 = month.parse().map_err(|_| format_err())?;
        Month::new(year, month)
    }
}

/// The inclusive month sequence from `start` to `end`.
pub fn month_range(start: Month, end: Month) -> Result<Vec<Month>, MonthError> {
    if start > end {
        return Err(MonthError::InvertedRange { start, end });
    }
    let mut months = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        months.push(cursor);
        cursor = cursor.succ();
    }
    Ok(months)
}
