//! Chunking and data-source selectors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a request range is split into request windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// One window per calendar month.
    Monthly,
    /// One window per calendar year.
    Yearly,
    /// Monthly for short requests, yearly once the requested span exceeds the configured threshold.
    Auto,
    /// Plans a full monthly and a full yearly pass over a single year, to benchmark both.
    Compare,
}

/// The chunk size of a single, concrete request window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMode {
    Monthly,
    Yearly,
}

/// Which CDS product a measure's daily values are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailySource {
    /// Point time series (`reanalysis-era5-single-levels-timeseries`), delivered as CSV.
    Timeseries,
    /// Hourly gridded fields over a small box around the location.
    Hourly,
    /// Pre-aggregated daily statistics (`derived-era5-single-levels-daily-statistics`).
    DailyStatistics,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Monthly => "monthly",
            FetchMode::Yearly => "yearly",
            FetchMode::Auto => "auto",
            FetchMode::Compare => "compare",
        }
    }
}

impl ChunkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkMode::Monthly => "monthly",
            ChunkMode::Yearly => "yearly",
        }
    }
}

impl DailySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DailySource::Timeseries => "timeseries",
            DailySource::Hourly => "hourly",
            DailySource::DailyStatistics => "daily_statistics",
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for ChunkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for DailySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown mode or source name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} '{value}'")]
pub struct UnknownMode {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for FetchMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" | "month" => Ok(FetchMode::Monthly),
            "yearly" | "year" => Ok(FetchMode::Yearly),
            "auto" => Ok(FetchMode::Auto),
            "compare" => Ok(FetchMode::Compare),
            _ => Err(UnknownMode {
                kind: "fetch mode",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for DailySource {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timeseries" => Ok(DailySource::Timeseries),
            "hourly" => Ok(DailySource::Hourly),
            "daily_statistics" => Ok(DailySource::DailyStatistics),
            _ => Err(UnknownMode {
                kind: "daily source",
                value: s.to_string(),
            }),
        }
    }
}
