//! # Configuration
//!
//! Retrieval, client and path settings. Every field has a default, so a TOML file only needs
//! the values it changes:
//!
//! ```toml
//! [retrieval]
//! half_box_deg = 0.5
//! flush_policy = "each_location"
//!
//! [retrieval.fetch_mode]
//! noon_temperature = "yearly"
//!
//! [client]
//! max_wait_secs = 7200
//! ```

use crate::matcher::MatchSettings;
use crate::planner::ChunkPlanner;
use crate::retrieval::request::RequestOptions;
use crate::types::measure::Measure;
use crate::types::mode::{DailySource, FetchMode};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

/// All settings consumed by the retrieval core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub retrieval: RetrievalSettings,
    pub client: ClientSettings,
    pub paths: RuntimePaths,
}

/// When the in-memory cache document is written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// After every merged window; bounds data loss if the run is interrupted.
    #[default]
    EachWindow,
    /// Once per location, after all of its windows.
    EachLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Half the side of the lat/lon box requested around a location, in degrees.
    pub half_box_deg: f64,
    pub max_nearest_time_delta_minutes: i64,
    pub month_fetch_day_span_threshold: i64,
    pub wet_hour_threshold_mm: f64,
    pub fetch_mode: FetchModes,
    pub daily_source: DailySources,
    pub flush_policy: FlushPolicy,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            half_box_deg: 0.25,
            max_nearest_time_delta_minutes: 30,
            month_fetch_day_span_threshold: 62,
            wet_hour_threshold_mm: 1.0,
            fetch_mode: FetchModes::default(),
            daily_source: DailySources::default(),
            flush_policy: FlushPolicy::default(),
        }
    }
}

impl RetrievalSettings {
    pub fn max_nearest_time_delta(&self) -> TimeDelta {
        TimeDelta::minutes(self.max_nearest_time_delta_minutes)
    }

    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            tolerance: self.max_nearest_time_delta(),
            wet_hour_threshold_mm: self.wet_hour_threshold_mm,
        }
    }

    pub fn request_options(&self) -> RequestOptions {
        RequestOptions {
            half_box_deg: self.half_box_deg,
            noon_tolerance: self.max_nearest_time_delta(),
        }
    }

    pub fn planner(&self) -> ChunkPlanner {
        ChunkPlanner::new(self.month_fetch_day_span_threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchModes {
    pub noon_temperature: FetchMode,
    pub daily_precipitation: FetchMode,
    pub daily_solar_radiation_energy: FetchMode,
}

impl Default for FetchModes {
    fn default() -> Self {
        Self {
            noon_temperature: FetchMode::Auto,
            daily_precipitation: FetchMode::Monthly,
            daily_solar_radiation_energy: FetchMode::Monthly,
        }
    }
}

impl FetchModes {
    pub fn get(&self, measure: Measure) -> FetchMode {
        match measure {
            Measure::NoonTemperature => self.noon_temperature,
            Measure::DailyPrecipitation => self.daily_precipitation,
            Measure::DailySolarRadiationEnergy => self.daily_solar_radiation_energy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailySources {
    pub noon_temperature: DailySource,
    pub daily_precipitation: DailySource,
    pub daily_solar_radiation_energy: DailySource,
}

impl Default for DailySources {
    fn default() -> Self {
        Self {
            noon_temperature: DailySource::Timeseries,
            daily_precipitation: DailySource::Timeseries,
            daily_solar_radiation_energy: DailySource::Timeseries,
        }
    }
}

impl DailySources {
    pub fn get(&self, measure: Measure) -> DailySource {
        match measure {
            Measure::NoonTemperature => self.noon_temperature,
            Measure::DailyPrecipitation => self.daily_precipitation,
            Measure::DailySolarRadiationEnergy => self.daily_solar_radiation_energy,
        }
    }
}

/// CDS endpoint, credentials, and the bounds of the submit/poll/download loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// API root, e.g. `https://cds.climate.copernicus.eu/api`. Falls back to `CDSAPI_URL` or `~/.cdsapirc`.
    pub url: Option<String>,
    /// Personal access token. Falls back to `CDSAPI_KEY` or `~/.cdsapirc`.
    pub key: Option<String>,
    pub poll_interval_secs: u64,
    pub max_poll_interval_secs: u64,
    /// Longest time a job may stay queued or running.
    pub max_wait_secs: u64,
    /// Consecutive failed status calls tolerated before the job is given up.
    pub max_poll_errors: u32,
    pub download_retries: u32,
    pub retry_delay_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: None,
            key: None,
            poll_interval_secs: 2,
            max_poll_interval_secs: 60,
            max_wait_secs: 3 * 60 * 60,
            max_poll_errors: 5,
            download_retries: 3,
            retry_delay_secs: 10,
            request_timeout_secs: 120,
        }
    }
}

impl ClientSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_secs(self.max_poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Directories for raw downloads and per-location cache documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimePaths {
    pub cache_dir: PathBuf,
    pub data_cache_dir: PathBuf,
}

impl Default for RuntimePaths {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("era5_cache"),
            data_cache_dir: PathBuf::from("data_cache"),
        }
    }
}

impl RuntimePaths {
    /// Resolves relative paths against `root`. Absolute paths are kept.
    pub fn resolve_under(&self, root: &Path) -> RuntimePaths {
        RuntimePaths {
            cache_dir: root.join(&self.cache_dir),
            data_cache_dir: root.join(&self.data_cache_dir),
        }
    }
}

impl Settings {
    /// Parses and validates settings from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_toml_str(&raw)
    }

    /// Like [`Settings::load_from_path`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Read(path.as_ref().to_path_buf(), e)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.retrieval;
        if !r.half_box_deg.is_finite() || r.half_box_deg <= 0.0 || r.half_box_deg > 10.0 {
            return Err(invalid("retrieval.half_box_deg", "must be in (0, 10]"));
        }
        if r.max_nearest_time_delta_minutes < 0 {
            return Err(invalid(
                "retrieval.max_nearest_time_delta_minutes",
                "must not be negative",
            ));
        }
        if r.month_fetch_day_span_threshold < 1 {
            return Err(invalid(
                "retrieval.month_fetch_day_span_threshold",
                "must be a positive number of days",
            ));
        }
        if !r.wet_hour_threshold_mm.is_finite() || r.wet_hour_threshold_mm < 0.0 {
            return Err(invalid(
                "retrieval.wet_hour_threshold_mm",
                "must not be negative",
            ));
        }
        for measure in Measure::ALL {
            let mode = r.fetch_mode.get(measure);
            if mode == FetchMode::Compare {
                return Err(invalid(
                    format!("retrieval.fetch_mode.{measure}"),
                    "must be one of monthly, yearly, auto",
                ));
            }
            let source = r.daily_source.get(measure);
            if !measure.allowed_sources().contains(&source) {
                let allowed: Vec<_> = measure
                    .allowed_sources()
                    .iter()
                    .map(|s| s.as_str())
                    .collect();
                return Err(invalid(
                    format!("retrieval.daily_source.{measure}"),
                    format!("'{source}' is not one of {}", allowed.join(", ")),
                ));
            }
        }

        let c = &self.client;
        if c.poll_interval_secs == 0 {
            return Err(invalid("client.poll_interval_secs", "must be positive"));
        }
        if c.max_poll_interval_secs < c.poll_interval_secs {
            return Err(invalid(
                "client.max_poll_interval_secs",
                "must be at least client.poll_interval_secs",
            ));
        }
        if c.max_wait_secs == 0 {
            return Err(invalid("client.max_wait_secs", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.retrieval.fetch_mode.get(Measure::NoonTemperature), FetchMode::Auto);
        assert_eq!(
            settings.retrieval.daily_source.get(Measure::DailyPrecipitation),
            DailySource::Timeseries
        );
        assert_eq!(settings.retrieval.max_nearest_time_delta(), TimeDelta::minutes(30));
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [retrieval]
            half_box_deg = 0.5
            flush_policy = "each_location"

            [retrieval.fetch_mode]
            noon_temperature = "yearly"

            [retrieval.daily_source]
            daily_precipitation = "daily_statistics"

            [paths]
            data_cache_dir = "/tmp/era5-data"
            "#,
        )
        .unwrap();
        assert_eq!(settings.retrieval.half_box_deg, 0.5);
        assert_eq!(settings.retrieval.month_fetch_day_span_threshold, 62);
        assert_eq!(settings.retrieval.flush_policy, FlushPolicy::EachLocation);
        assert_eq!(settings.retrieval.fetch_mode.get(Measure::NoonTemperature), FetchMode::Yearly);
        assert_eq!(
            settings.retrieval.fetch_mode.get(Measure::DailyPrecipitation),
            FetchMode::Monthly
        );
        let paths = settings.paths.resolve_under(Path::new("/root"));
        assert_eq!(paths.data_cache_dir, PathBuf::from("/tmp/era5-data"));
        assert_eq!(paths.cache_dir, PathBuf::from("/root/era5_cache"));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = Settings::from_toml_str(
            r#"
            [retrieval.daily_source]
            noon_temperature = "daily_statistics"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "retrieval.daily_source.noon_temperature"));

        assert!(Settings::from_toml_str("[retrieval]\nhalf_box_deg = -1.0").is_err());
        assert!(Settings::from_toml_str("[retrieval.fetch_mode]\ndaily_precipitation = \"compare\"").is_err());
        assert!(Settings::from_toml_str("[retrieval.fetch_mode]\ndaily_precipitation = \"weekly\"").is_err());
        assert!(Settings::from_toml_str("[client]\npoll_interval_secs = 0").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_or_default(dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
