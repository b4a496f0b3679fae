//! Year-range enumeration over the dataset coverage window
//!
//! The coverage is split into one range per calendar year. The first and last
//! years are usually partial, and each range carries a [`YearKind`] tag so the
//! climatology aligner never has to rediscover that from timestamps.

use crate::cf::{format_timestamp, parse_timestamp, Timestamp};
use crate::errors::{AnomalyError, Result};
use chrono::{Datelike, NaiveDate, NaiveTime};
use std::fmt;

/// First timestamp of MUR L4 coverage used by the analysis
pub const COVERAGE_START: &str = "2002-06-01T09:00:00";

/// Last timestamp of MUR L4 coverage used by the analysis
pub const COVERAGE_END: &str = "2020-01-20T09:00:00";

/// How a year range relates to its calendar year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearKind {
    /// Starts after Jan 1 because coverage begins mid-year
    PartialStart,
    /// Jan 1 through Dec 31
    FullYear,
    /// Ends before Dec 31 because coverage stops mid-year
    PartialEnd,
}

impl YearKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PartialStart => "partial-start",
            Self::FullYear => "full-year",
            Self::PartialEnd => "partial-end",
        }
    }
}

impl fmt::Display for YearKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive time window covering (part of) one calendar year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub year: i32,
    pub start: Timestamp,
    pub end: Timestamp,
    pub kind: YearKind,
}

impl YearRange {
    pub fn start_string(&self) -> String {
        format_timestamp(&self.start)
    }

    pub fn end_string(&self) -> String {
        format_timestamp(&self.end)
    }

    /// Number of daily steps the range spans, both ends included.
    pub fn expected_days(&self) -> usize {
        let days = (self.end.date() - self.start.date()).num_days() + 1;
        usize::try_from(days).unwrap_or(0)
    }
}

/// Inclusive coverage window of the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coverage {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Coverage {
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self> {
        if end < start {
            return Err(AnomalyError::ConfigError(format!(
                "coverage end {} precedes start {}",
                format_timestamp(&end),
                format_timestamp(&start)
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_timestamp(start)?, parse_timestamp(end)?)
    }

    /// Boundary time of day shared by every range (09:00:00 for MUR).
    pub fn boundary_time(&self) -> NaiveTime {
        self.start.time()
    }
}

/// Year ranges for the default MUR coverage (2002-06-01 to 2020-01-20).
pub fn year_ranges() -> Result<Vec<YearRange>> {
    year_ranges_between(&Coverage::parse(COVERAGE_START, COVERAGE_END)?)
}

/// Split `coverage` into one range per calendar year.
///
/// Interior boundaries fall on Jan 1 and Dec 31 at the coverage's boundary
/// time of day; the first range starts at the coverage start and the last
/// one ends at the coverage end.
pub fn year_ranges_between(coverage: &Coverage) -> Result<Vec<YearRange>> {
    let time = coverage.boundary_time();
    let first_year = coverage.start.year();
    let last_year = coverage.end.year();

    (first_year..=last_year)
        .map(|year| {
            let jan1 = boundary(year, 1, 1, time)?;
            let dec31 = boundary(year, 12, 31, time)?;

            let start = if year == first_year { coverage.start } else { jan1 };
            let end = if year == last_year { coverage.end } else { dec31 };

            let kind = if start.date() != jan1.date() {
                YearKind::PartialStart
            } else if end.date() != dec31.date() {
                YearKind::PartialEnd
            } else {
                YearKind::FullYear
            };

            Ok(YearRange {
                year,
                start,
                end,
                kind,
            })
        })
        .collect()
}

fn boundary(year: i32, month: u32, day: u32, time: NaiveTime) -> Result<Timestamp> {
    NaiveDate::from_ymd_opt(year, month, day)
        .map(|d| d.and_time(time))
        .ok_or_else(|| AnomalyError::InvalidTimestamp(format!("{year}-{month:02}-{day:02}")))
}
