//! Builds CDS job requests for a request window.

use crate::matcher::nearest::local_noon_utc;
use crate::types::location::Location;
use crate::types::measure::Measure;
use crate::types::mode::DailySource;
use crate::types::request_window::RequestWindow;
use crate::utils::{date_range, days_in_month, round_to};
use chrono::{Datelike, NaiveDate, TimeDelta};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;

pub const TIMESERIES_DATASET: &str = "reanalysis-era5-single-levels-timeseries";
pub const HOURLY_DATASET: &str = "reanalysis-era5-single-levels";
pub const DAILY_STATISTICS_DATASET: &str = "derived-era5-single-levels-daily-statistics";

/// Days added on each side of a window so local days at the edges are complete.
const WINDOW_PADDING_DAYS: u64 = 1;

const SECONDS_PER_HOUR: i64 = 3600;

/// Request shaping shared by every window of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOptions {
    /// Half the side of the lat/lon box requested around a location, in degrees.
    pub half_box_deg: f64,
    /// Hourly noon-temperature requests only ask for the UTC hours this close to local noon.
    pub noon_tolerance: TimeDelta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Csv,
    NetCdf,
}

impl PayloadFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            PayloadFormat::Csv => "csv",
            PayloadFormat::NetCdf => "nc",
        }
    }
}

/// One CDS process execution: the dataset id and its `inputs` object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRequest {
    pub dataset: String,
    pub inputs: Value,
    #[serde(skip)]
    pub format: PayloadFormat,
    /// First and last UTC date covered by the request, padding included.
    #[serde(skip)]
    pub covers: (NaiveDate, NaiveDate),
}

/// `[north, west, south, east]` around the location.
pub fn area_around(location: &Location, half_box_deg: f64) -> [f64; 4] {
    let north = (location.lat + half_box_deg).min(90.0);
    let south = (location.lat - half_box_deg).max(-90.0);
    let west = location.lon - half_box_deg;
    let east = location.lon + half_box_deg;
    [north, west, south, east].map(|v| round_to(v, 4))
}

/// Builds the job for `window`.
///
/// Point time series and hourly fields ask for the window padded by one day, as one exact
/// `start/end` date range. Daily statistics are UTC totals and need no padding; they are
/// requested by year, month and day, which the service expands to every combination, so the
/// request covers the whole months of the window but never leaves its year.
pub fn build_request(
    location: &Location,
    window: &RequestWindow,
    options: &RequestOptions,
    source: DailySource,
) -> JobRequest {
    let (start, end) = window.padded(WINDOW_PADDING_DAYS);
    let variable = window.measure.source_variable();
    let half_box_deg = options.half_box_deg;

    match source {
        DailySource::Timeseries => JobRequest {
            dataset: TIMESERIES_DATASET.to_string(),
            inputs: json!({
                "variable": [variable],
                "location": {
                    "latitude": round_to(location.lat, 4),
                    "longitude": round_to(location.lon, 4),
                },
                "date": [format!("{start}/{end}")],
                "data_format": "csv",
            }),
            format: PayloadFormat::Csv,
            covers: (start, end),
        },
        DailySource::Hourly => {
            let hours = match window.measure {
                Measure::NoonTemperature => noon_hours(start, end, location.tz(), options.noon_tolerance),
                Measure::DailyPrecipitation | Measure::DailySolarRadiationEnergy => (0..24).collect(),
            };
            let hours: Vec<String> = hours.into_iter().map(|h| format!("{h:02}:00")).collect();
            JobRequest {
                dataset: HOURLY_DATASET.to_string(),
                inputs: json!({
                    "product_type": ["reanalysis"],
                    "variable": [variable],
                    "date": [format!("{start}/{end}")],
                    "time": hours,
                    "area": area_around(location, half_box_deg),
                    "data_format": "netcdf",
                    "download_format": "unarchived",
                }),
                format: PayloadFormat::NetCdf,
                covers: (start, end),
            }
        }
        DailySource::DailyStatistics => {
            let (start, end) = (window.start_date(), window.end_date());
            let (years, months, days) = calendar_fields(start, end);
            let covers = (
                NaiveDate::from_ymd_opt(start.year(), start.month(), 1).unwrap_or(start),
                NaiveDate::from_ymd_opt(end.year(), end.month(), days_in_month(end.year(), end.month()))
                    .unwrap_or(end),
            );
            JobRequest {
                dataset: DAILY_STATISTICS_DATASET.to_string(),
                inputs: json!({
                    "product_type": "reanalysis",
                    "variable": [variable],
                    "year": years,
                    "month": months,
                    "day": days,
                    "daily_statistic": "daily_sum",
                    "time_zone": "utc+00:00",
                    "frequency": "1_hourly",
                    "area": area_around(location, half_box_deg),
                }),
                format: PayloadFormat::NetCdf,
                covers,
            }
        }
    }
}

/// UTC hours within `tolerance` of local noon on any date of the range. DST shifts add a
/// second hour. A date with no hour in reach contributes its nearest hour.
fn noon_hours(start: NaiveDate, end: NaiveDate, tz: Tz, tolerance: TimeDelta) -> BTreeSet<u32> {
    let mut hours = BTreeSet::new();
    for date in date_range(start, end) {
        let Some(noon) = local_noon_utc(date, tz) else {
            continue;
        };
        let earliest = (noon - tolerance).timestamp();
        let latest = (noon + tolerance).timestamp();
        let first = earliest.div_euclid(SECONDS_PER_HOUR) + i64::from(earliest.rem_euclid(SECONDS_PER_HOUR) > 0);
        let last = latest.div_euclid(SECONDS_PER_HOUR);
        if first > last {
            let nearest = (noon.timestamp() + SECONDS_PER_HOUR / 2).div_euclid(SECONDS_PER_HOUR);
            hours.insert(nearest.rem_euclid(24) as u32);
        }
        for hour in first..=last {
            hours.insert(hour.rem_euclid(24) as u32);
        }
    }
    hours
}

/// Distinct years, months and days of the range. The service takes their cross product.
fn calendar_fields(start: NaiveDate, end: NaiveDate) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut years = BTreeSet::new();
    let mut months = BTreeSet::new();
    let mut days = BTreeSet::new();
    for date in date_range(start, end) {
        years.insert(date.year());
        months.insert(date.month());
        days.insert(date.day());
    }
    (
        years.into_iter().map(|y| format!("{y:04}")).collect(),
        months.into_iter().map(|m| format!("{m:02}")).collect(),
        days.into_iter().map(|d| format!("{d:02}")).collect(),
    )
}
