//! Splits a requested date range into request windows, skipping what is already cached.

pub mod error;

use crate::cache::document::CacheDocument;
use crate::planner::error::PlanError;
use crate::types::measure::Measure;
use crate::types::mode::{ChunkMode, FetchMode};
use crate::types::request_window::RequestWindow;
use crate::utils::{date_range, month_bounds, months_between, year_bounds};
use chrono::{Datelike, NaiveDate};
use log::debug;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    /// Requests spanning at most this many days are fetched monthly in auto mode.
    pub month_fetch_day_span_threshold: i64,
}

impl ChunkPlanner {
    pub fn new(month_fetch_day_span_threshold: i64) -> Self {
        Self {
            month_fetch_day_span_threshold,
        }
    }

    /// Plans whole calendar years `year_start..=year_end`.
    ///
    /// # Errors
    ///
    /// [`PlanError::InvalidCompareRange`] if `fetch_mode` is compare and more than one year
    /// is requested; [`PlanError::InvertedRange`] if `year_end < year_start`.
    pub fn plan(
        &self,
        cache: &CacheDocument,
        measure: Measure,
        year_start: i32,
        year_end: i32,
        fetch_mode: FetchMode,
        overwrite: bool,
    ) -> Result<Vec<RequestWindow>, PlanError> {
        let (start, end) = self.check_range(year_start, year_end, fetch_mode)?;
        self.plan_range(cache, measure, start, end, fetch_mode, overwrite)
    }

    /// Validates a year range for `fetch_mode` and returns its first and last date.
    pub fn check_range(
        &self,
        year_start: i32,
        year_end: i32,
        fetch_mode: FetchMode,
    ) -> Result<(NaiveDate, NaiveDate), PlanError> {
        if fetch_mode == FetchMode::Compare && year_start != year_end {
            return Err(PlanError::InvalidCompareRange {
                year_start,
                year_end,
            });
        }
        let (start, _) = year_bounds(year_start).ok_or(PlanError::InvalidYear(year_start))?;
        let (_, end) = year_bounds(year_end).ok_or(PlanError::InvalidYear(year_end))?;
        if end < start {
            return Err(PlanError::InvertedRange { start, end });
        }
        Ok((start, end))
    }

    /// Plans an arbitrary inclusive date range.
    ///
    /// Periods whose dates are all cached emit nothing; other windows are narrowed to the
    /// first and last missing date of their period. `overwrite` plans every date regardless
    /// of the cache. Compare mode always ignores the cache so both plans cover the same days.
    pub fn plan_range(
        &self,
        cache: &CacheDocument,
        measure: Measure,
        start: NaiveDate,
        end: NaiveDate,
        fetch_mode: FetchMode,
        overwrite: bool,
    ) -> Result<Vec<RequestWindow>, PlanError> {
        if end < start {
            return Err(PlanError::InvertedRange { start, end });
        }

        if fetch_mode == FetchMode::Compare {
            if start.year() != end.year() {
                return Err(PlanError::InvalidCompareRange {
                    year_start: start.year(),
                    year_end: end.year(),
                });
            }
            let none = BTreeSet::new();
            let mut windows = windows_for(ChunkMode::Monthly, measure, start, end, &none)?;
            windows.extend(windows_for(ChunkMode::Yearly, measure, start, end, &none)?);
            return Ok(windows);
        }

        let chunk = self.resolve_chunk_mode(fetch_mode, start, end);
        let cached = if overwrite {
            BTreeSet::new()
        } else {
            cache.cached_dates(measure)
        };
        let windows = windows_for(chunk, measure, start, end, &cached)?;
        debug!(
            "Planned {} {} window(s) for {} {}..{}",
            windows.len(),
            chunk,
            measure,
            start,
            end
        );
        Ok(windows)
    }

    /// Concrete chunk size for a non-compare fetch mode.
    pub fn resolve_chunk_mode(&self, fetch_mode: FetchMode, start: NaiveDate, end: NaiveDate) -> ChunkMode {
        match fetch_mode {
            FetchMode::Monthly | FetchMode::Compare => ChunkMode::Monthly,
            FetchMode::Yearly => ChunkMode::Yearly,
            FetchMode::Auto => {
                let span = (end - start).num_days() + 1;
                if span <= self.month_fetch_day_span_threshold {
                    ChunkMode::Monthly
                } else {
                    ChunkMode::Yearly
                }
            }
        }
    }
}

/// One window per period that has a missing date, spanning its first to its last missing date.
///
/// Cached dates between those two are requested again. A hole in the middle of a period costs
/// the whole span; the merge leaves the re-fetched cached days as they were unless the run
/// overwrites.
fn windows_for(
    chunk: ChunkMode,
    measure: Measure,
    start: NaiveDate,
    end: NaiveDate,
    cached: &BTreeSet<NaiveDate>,
) -> Result<Vec<RequestWindow>, PlanError> {
    let periods: Vec<(NaiveDate, NaiveDate)> = match chunk {
        ChunkMode::Monthly => months_between(start, end)
            .into_iter()
            .filter_map(|(y, m)| month_bounds(y, m))
            .collect(),
        ChunkMode::Yearly => (start.year()..=end.year())
            .filter_map(year_bounds)
            .collect(),
    };

    let mut windows = Vec::new();
    for (period_start, period_end) in periods {
        let from = period_start.max(start);
        let to = period_end.min(end);
        let mut missing = date_range(from, to).filter(|d| !cached.contains(d));
        let Some(first) = missing.next() else {
            continue;
        };
        let last = missing.last().unwrap_or(first);
        windows.push(RequestWindow::new(first, last, measure, chunk)?);
    }
    Ok(windows)
}
