use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// A single day could not be resolved. Recorded as a gap, never fatal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatchError {
    #[error("No sample within {tolerance_minutes} min of {target} (nearest offset: {nearest_minutes:?} min)")]
    NoSampleWithinTolerance {
        target: DateTime<Utc>,
        nearest_minutes: Option<i64>,
        tolerance_minutes: i64,
    },

    #[error("No samples for local day {0}")]
    NoSamples(NaiveDate),

    #[error("Local noon of {0} does not exist in the location's time zone")]
    NoLocalNoon(NaiveDate),
}
