use crate::planner::error::PlanError;
use crate::types::measure::Measure;
use crate::types::mode::ChunkMode;
use crate::utils::date_range;
use chrono::{Days, NaiveDate};
use std::fmt;

/// An inclusive date range of one measure, fetched with one CDS job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestWindow {
    start_date: NaiveDate,
    end_date: NaiveDate,
    pub measure: Measure,
    pub fetch_mode: ChunkMode,
}

impl RequestWindow {
    /// # Errors
    ///
    /// Returns [`PlanError::InvertedRange`] when `end_date` precedes `start_date`.
    pub fn new(
        start_date: NaiveDate,
        end_date: NaiveDate,
        measure: Measure,
        fetch_mode: ChunkMode,
    ) -> Result<Self, PlanError> {
        if end_date < start_date {
            return Err(PlanError::InvertedRange {
                start: start_date,
                end: end_date,
            });
        }
        Ok(Self {
            start_date,
            end_date,
            measure,
            fetch_mode,
        })
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn day_count(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        date_range(self.start_date, self.end_date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// The window widened by `days` on each side, used so local days at the edges have
    /// every UTC hour they overlap.
    pub fn padded(&self, days: u64) -> (NaiveDate, NaiveDate) {
        let start = self
            .start_date
            .checked_sub_days(Days::new(days))
            .unwrap_or(self.start_date);
        let end = self
            .end_date
            .checked_add_days(Days::new(days))
            .unwrap_or(self.end_date);
        (start, end)
    }
}

impl fmt::Display for RequestWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}..{} ({})",
            self.measure, self.start_date, self.end_date, self.fetch_mode
        )
    }
}
