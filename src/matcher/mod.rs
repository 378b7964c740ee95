//! Turns hourly samples of one grid cell into one value per local calendar day.

pub mod aggregate;
pub mod error;
pub mod local_day;
pub mod nearest;

use crate::matcher::aggregate::{daily_aggregate, daily_energy};
use crate::matcher::error::MatchError;
use crate::matcher::local_day::{expected_hours, group_by_local_day};
use crate::matcher::nearest::{local_noon_utc, nearest_to_local_noon};
use crate::types::daily_value::DailyValue;
use crate::types::measure::Measure;
use crate::types::mode::DailySource;
use crate::types::raw::{GridSeries, RawSample};
use crate::types::request_window::RequestWindow;
use chrono::{NaiveDate, TimeDelta};
use chrono_tz::Tz;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSettings {
    /// Largest accepted distance between a sample and local noon.
    pub tolerance: TimeDelta,
    pub wet_hour_threshold_mm: f64,
}

/// Daily values of one window, plus the days that could not be resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowMatch {
    pub values: Vec<DailyValue>,
    pub gaps: Vec<(NaiveDate, MatchError)>,
}

impl WindowMatch {
    pub fn partial_days(&self) -> usize {
        self.values.iter().filter(|v| v.partial).count()
    }
}

/// Resolves every date of `window` from `series`.
///
/// Days that cannot be matched are returned as gaps rather than failing the window.
pub fn match_window(
    series: &GridSeries,
    window: &RequestWindow,
    tz: Tz,
    settings: &MatchSettings,
    source: DailySource,
) -> WindowMatch {
    match (window.measure, source) {
        (Measure::NoonTemperature, _) => match_noon(series, window, tz, settings),
        (Measure::DailyPrecipitation, DailySource::DailyStatistics) => {
            match_daily_statistics(series, window)
        }
        (measure, _) => match_daily_totals(series, window, tz, settings, measure),
    }
}

fn match_noon(
    series: &GridSeries,
    window: &RequestWindow,
    tz: Tz,
    settings: &MatchSettings,
) -> WindowMatch {
    let mut out = WindowMatch::default();
    for date in window.dates() {
        let Some(noon) = local_noon_utc(date, tz) else {
            out.gaps.push((date, MatchError::NoLocalNoon(date)));
            continue;
        };
        match nearest_to_local_noon(&series.samples, noon, settings.tolerance) {
            Ok(sample) => out
                .values
                .push(DailyValue::new(date, Measure::NoonTemperature, sample.value)),
            Err(e) => out.gaps.push((date, e)),
        }
    }
    out
}

fn match_daily_totals(
    series: &GridSeries,
    window: &RequestWindow,
    tz: Tz,
    settings: &MatchSettings,
    measure: Measure,
) -> WindowMatch {
    let by_day = group_by_local_day(&series.samples, tz);
    let mut out = WindowMatch::default();
    for date in window.dates() {
        let samples = by_day.get(&date).map(Vec::as_slice).unwrap_or_default();
        let partial = (samples.len() as u32) < expected_hours(date, tz);
        let values = samples.iter().map(|s| s.value);

        let value = match measure {
            Measure::DailyPrecipitation => {
                daily_aggregate(values, settings.wet_hour_threshold_mm).map(|s| {
                    DailyValue::new(date, measure, s.total_mm)
                        .with_precip_stats(s.wet_hours_per_day, s.max_hourly_precip_mm)
                })
            }
            _ => daily_energy(values).map(|e| DailyValue::new(date, measure, e)),
        };
        match value {
            Some(v) => out.values.push(v.with_partial(partial)),
            None => out.gaps.push((date, MatchError::NoSamples(date))),
        }
    }
    out
}

/// Daily statistics already carry one total per (UTC) day.
fn match_daily_statistics(series: &GridSeries, window: &RequestWindow) -> WindowMatch {
    let by_date: BTreeMap<NaiveDate, &RawSample> = series
        .samples
        .iter()
        .filter(|s| s.value.is_finite())
        .map(|s| (s.time.date_naive(), s))
        .collect();
    let mut out = WindowMatch::default();
    for date in window.dates() {
        match by_date.get(&date) {
            Some(s) => out.values.push(DailyValue::new(
                date,
                Measure::DailyPrecipitation,
                s.value.max(0.0),
            )),
            None => out.gaps.push((date, MatchError::NoSamples(date))),
        }
    }
    out
}
