//! Calendar-month period normalization.
//!
//! Every balance, recharge, invoice and obligation is bucketed by calendar
//! month. The canonical form is the string `YYYY-MM-01`: any date inside a
//! month resolves to the same bucket, so "2026-02-10" and "2026-02-01"
//! always compare equal once normalized.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error for inputs that cannot be normalized into a month bucket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid period: {input}")]
pub struct InvalidPeriod {
    /// The offending input, verbatim.
    pub input: String,
}

impl InvalidPeriod {
    fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// A calendar-month bucket, anchored to day 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// Create a period from year and 1-based month.
    pub fn new(year: i32, month: u32) -> Result<Self, InvalidPeriod> {
        if !(1..=12).contains(&month) {
            return Err(InvalidPeriod::new(format!("{year}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    /// Bucket an arbitrary date into its month.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Bucket a UTC timestamp into its month.
    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        Self::from_date(ts.date_naive())
    }

    /// Normalize a date-like string.
    ///
    /// Accepts `YYYY-MM-DD` (any day of the month), bare `YYYY-MM`, and
    /// RFC 3339 timestamps.
    pub fn parse(input: &str) -> Result<Self, InvalidPeriod> {
        let trimmed = input.trim();

        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Ok(Self::from_date(date));
        }

        if let Some((year, month)) = trimmed.split_once('-') {
            if let (Ok(year), Ok(month)) = (year.parse::<i32>(), month.parse::<u32>()) {
                return Self::new(year, month).map_err(|_| InvalidPeriod::new(trimmed));
            }
        }

        if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::from_datetime(ts.with_timezone(&Utc)));
        }

        Err(InvalidPeriod::new(trimmed))
    }

    /// The period's year.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// The period's month (1-12).
    pub fn month(&self) -> u32 {
        self.month
    }

    /// First day of the month.
    pub fn first_day(&self) -> NaiveDate {
        // Day 1 of a validated (year, month) always exists.
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(self.year, 1, 1).unwrap_or_default())
    }

    /// The following calendar month.
    pub fn next(&self) -> Self {
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

    /// The canonical `YYYY-MM-01` string.
    pub fn canonical(&self) -> String {
        format!("{:04}-{:02}-01", self.year, self.month)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl FromStr for Period {
    type Err = InvalidPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Period {
    type Error = InvalidPeriod;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mid_month_dates_bucket_identically() {
        let a = Period::parse("2026-02-10").unwrap();
        let b = Period::parse("2026-02-01").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.canonical(), "2026-02-01");
    }

    #[test]
    fn test_parse_year_month() {
        let p = Period::parse("2026-07").unwrap();
        assert_eq!(p.canonical(), "2026-07-01");
    }

    #[test]
    fn test_parse_rfc3339() {
        let p = Period::parse("2026-03-15T10:30:00Z").unwrap();
        assert_eq!(p.canonical(), "2026-03-01");
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(Period::parse("not-a-date").is_err());
        assert!(Period::parse("").is_err());
        assert!(Period::parse("2026-13-01").is_err());
    }

    #[test]
    fn test_next_wraps_year() {
        let dec = Period::new(2026, 12).unwrap();
        let jan = dec.next();
        assert_eq!(jan.canonical(), "2027-01-01");
    }

    #[test]
    fn test_ordering_follows_time() {
        let early = Period::new(2026, 3).unwrap();
        let late = Period::new(2026, 4).unwrap();
        assert!(early < late);
    }

    proptest! {
        #[test]
        fn prop_any_day_normalizes_to_first(year in 1990i32..2100, month in 1u32..=12, day in 1u32..=28) {
            let input = format!("{year:04}-{month:02}-{day:02}");
            let period = Period::parse(&input).unwrap();
            prop_assert_eq!(period.canonical(), format!("{:04}-{:02}-01", year, month));
        }

        #[test]
        fn prop_canonical_roundtrip(year in 1990i32..2100, month in 1u32..=12) {
            let period = Period::new(year, month).unwrap();
            let reparsed = Period::parse(&period.canonical()).unwrap();
            prop_assert_eq!(period, reparsed);
        }
    }
}
