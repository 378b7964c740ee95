use chrono::NaiveDate;
use thiserror::Error;

/// Caller misuse of the planner. Fatal for the whole retrieval.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Compare mode requires a single year, got {year_start}..={year_end}")]
    InvalidCompareRange { year_start: i32, year_end: i32 },

    #[error("Requested range is inverted: {start} is after {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },

    #[error("Year {0} is out of range")]
    InvalidYear(i32),
}
