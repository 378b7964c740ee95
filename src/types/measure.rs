//! The measures this crate can retrieve and the static metadata attached to each of them:
//! which ERA5 variable they come from, which cache variables they populate and how raw
//! values are converted into the units stored in the cache.

use crate::types::mode::DailySource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Dataset id recorded in the `variables` block of every cache document.
pub const SOURCE_DATASET: &str = "reanalysis-era5-single-levels";

const KELVIN_OFFSET: f64 = 273.15;

/// A daily climate measure derived from hourly ERA5 data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    /// 2m air temperature at the sample closest to local noon, in °C.
    NoonTemperature,
    /// Total precipitation over the local calendar day, in mm.
    DailyPrecipitation,
    /// Surface solar radiation downwards summed over the local calendar day, in MJ/m².
    DailySolarRadiationEnergy,
}

/// Metadata of one variable stored in a cache document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheVariable {
    pub name: &'static str,
    pub units: &'static str,
    pub source_variable: &'static str,
    pub temporal_definition: &'static str,
    /// Number of decimals kept when the value is written.
    pub precision: u32,
}

const NOON_TEMP: CacheVariable = CacheVariable {
    name: "noon_temp_C",
    units: "C",
    source_variable: "2m_temperature",
    temporal_definition: "daily_local_noon",
    precision: 2,
};

const DAILY_PRECIP: CacheVariable = CacheVariable {
    name: "daily_precip_mm",
    units: "mm",
    source_variable: "total_precipitation",
    temporal_definition: "daily_total_local",
    precision: 2,
};

const WET_HOURS: CacheVariable = CacheVariable {
    name: "wet_hours_per_day",
    units: "h",
    source_variable: "total_precipitation",
    temporal_definition: "daily_count_local",
    precision: 0,
};

const MAX_HOURLY_PRECIP: CacheVariable = CacheVariable {
    name: "max_hourly_precip_mm",
    units: "mm",
    source_variable: "total_precipitation",
    temporal_definition: "daily_max_local",
    precision: 2,
};

const DAILY_SOLAR: CacheVariable = CacheVariable {
    name: "daily_solar_radiation_energy_MJ_m2",
    units: "MJ/m2",
    source_variable: "surface_solar_radiation_downwards",
    temporal_definition: "daily_total_local",
    precision: 3,
};

impl Measure {
    pub const ALL: [Measure; 3] = [
        Measure::NoonTemperature,
        Measure::DailyPrecipitation,
        Measure::DailySolarRadiationEnergy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Measure::NoonTemperature => "noon_temperature",
            Measure::DailyPrecipitation => "daily_precipitation",
            Measure::DailySolarRadiationEnergy => "daily_solar_radiation_energy",
        }
    }

    /// ERA5 variable name used in CDS requests.
    pub fn source_variable(&self) -> &'static str {
        self.primary_variable().source_variable
    }

    /// Short name of the variable as it appears in downloaded payloads.
    pub fn short_name(&self) -> &'static str {
        match self {
            Measure::NoonTemperature => "t2m",
            Measure::DailyPrecipitation => "tp",
            Measure::DailySolarRadiationEnergy => "ssrd",
        }
    }

    /// The cache variable holding the measure's main daily value.
    pub fn primary_variable(&self) -> CacheVariable {
        match self {
            Measure::NoonTemperature => NOON_TEMP,
            Measure::DailyPrecipitation => DAILY_PRECIP,
            Measure::DailySolarRadiationEnergy => DAILY_SOLAR,
        }
    }

    pub fn auxiliary_variables(&self) -> &'static [CacheVariable] {
        match self {
            Measure::DailyPrecipitation => &[WET_HOURS, MAX_HOURLY_PRECIP],
            Measure::NoonTemperature | Measure::DailySolarRadiationEnergy => &[],
        }
    }

    pub fn cache_variables(&self) -> Vec<CacheVariable> {
        let mut vars = vec![self.primary_variable()];
        vars.extend_from_slice(self.auxiliary_variables());
        vars
    }

    /// Looks up the metadata of any cache variable by name.
    pub fn cache_variable(name: &str) -> Option<CacheVariable> {
        Measure::ALL
            .iter()
            .flat_map(|m| m.cache_variables())
            .find(|v| v.name == name)
    }

    /// Converts a raw payload value (K, m or J/m²) into the stored unit (°C, mm or MJ/m²).
    pub fn convert(&self, raw: f64) -> f64 {
        match self {
            Measure::NoonTemperature => raw - KELVIN_OFFSET,
            Measure::DailyPrecipitation => raw * 1000.0,
            Measure::DailySolarRadiationEnergy => raw / 1e6,
        }
    }

    /// Daily sources accepted for this measure.
    pub fn allowed_sources(&self) -> &'static [DailySource] {
        match self {
            Measure::NoonTemperature | Measure::DailySolarRadiationEnergy => {
                &[DailySource::Timeseries, DailySource::Hourly]
            }
            Measure::DailyPrecipitation => &[
                DailySource::Timeseries,
                DailySource::Hourly,
                DailySource::DailyStatistics,
            ],
        }
    }

    /// Prefix of raw payload files kept in the download cache.
    pub(crate) fn raw_file_prefix(&self) -> &'static str {
        match self {
            Measure::NoonTemperature => "era5_t2m",
            Measure::DailyPrecipitation => "era5_tp",
            Measure::DailySolarRadiationEnergy => "era5_ssrd",
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown measure name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown measure '{0}'")]
pub struct UnknownMeasure(pub String);

impl FromStr for Measure {
    type Err = UnknownMeasure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Measure::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMeasure(s.to_string()))
    }
}
