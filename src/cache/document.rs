//! The typed, in-memory form of one location's cache file.

use crate::types::location::{GridCell, Location};
use crate::types::measure::{Measure, SOURCE_DATASET};
use crate::utils::date_range;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Day → value.
pub type DayValues = BTreeMap<u32, f64>;
/// Year → month → day → value for one cache variable.
pub type VariableData = BTreeMap<i32, BTreeMap<u32, DayValues>>;

/// Snapshot of the location a cache file belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub timezone: String,
    #[serde(default)]
    pub grid_lat: Option<f64>,
    #[serde(default)]
    pub grid_lon: Option<f64>,
}

impl PlaceRecord {
    pub fn from_location(location: &Location) -> Self {
        let grid = location.grid_cell();
        Self {
            name: location.name.clone(),
            lat: location.lat,
            lon: location.lon,
            timezone: location.timezone_name().to_string(),
            grid_lat: grid.map(|g| g.lat),
            grid_lon: grid.map(|g| g.lon),
        }
    }

    pub fn grid_cell(&self) -> Option<GridCell> {
        Some(GridCell::new(self.grid_lat?, self.grid_lon?))
    }
}

/// Metadata stored for each cache variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableMeta {
    pub units: String,
    pub source_variable: String,
    pub source_dataset: String,
    pub temporal_definition: String,
    pub precision: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheDocument {
    pub schema_version: u32,
    pub place: PlaceRecord,
    #[serde(default)]
    pub variables: BTreeMap<String, VariableMeta>,
    #[serde(default)]
    pub data: BTreeMap<String, VariableData>,
}

impl CacheDocument {
    /// An empty document for `location` at `schema_version`.
    pub fn new(location: &Location, schema_version: u32) -> Self {
        Self {
            schema_version,
            place: PlaceRecord::from_location(location),
            variables: BTreeMap::new(),
            data: BTreeMap::new(),
        }
    }

    /// Replaces the place snapshot with `location`, returning whether anything changed.
    pub fn refresh_place(&mut self, location: &Location) -> bool {
        let place = PlaceRecord::from_location(location);
        if place == self.place {
            return false;
        }
        self.place = place;
        true
    }

    pub fn get(&self, variable: &str, date: NaiveDate) -> Option<f64> {
        self.data
            .get(variable)?
            .get(&date.year())?
            .get(&date.month())?
            .get(&date.day())
            .copied()
    }

    pub fn contains(&self, variable: &str, date: NaiveDate) -> bool {
        self.get(variable, date).is_some()
    }

    /// Stores `value`, returning the value it replaced. Non-finite values are ignored.
    pub fn insert(&mut self, variable: &str, date: NaiveDate, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        self.data
            .entry(variable.to_string())
            .or_default()
            .entry(date.year())
            .or_default()
            .entry(date.month())
            .or_default()
            .insert(date.day(), value)
    }

    /// Adds the `variables` block entries for `measure` if they are not there yet.
    pub fn ensure_variable_metadata(&mut self, measure: Measure) {
        for var in measure.cache_variables() {
            self.variables
                .entry(var.name.to_string())
                .or_insert_with(|| VariableMeta {
                    units: var.units.to_string(),
                    source_variable: var.source_variable.to_string(),
                    source_dataset: SOURCE_DATASET.to_string(),
                    temporal_definition: var.temporal_definition.to_string(),
                    precision: var.precision,
                });
        }
    }

    /// Decimal places used when writing `variable`.
    pub fn precision_of(&self, variable: &str) -> Option<u32> {
        self.variables
            .get(variable)
            .map(|m| m.precision)
            .or_else(|| Measure::cache_variable(variable).map(|v| v.precision))
    }

    /// Dates holding a value of the measure's primary variable.
    pub fn cached_dates(&self, measure: Measure) -> BTreeSet<NaiveDate> {
        let Some(years) = self.data.get(measure.primary_variable().name) else {
            return BTreeSet::new();
        };
        years
            .iter()
            .flat_map(|(year, months)| {
                months.iter().flat_map(move |(month, days)| {
                    days.keys()
                        .filter_map(move |day| NaiveDate::from_ymd_opt(*year, *month, *day))
                })
            })
            .collect()
    }

    pub fn cached_years(&self, measure: Measure) -> BTreeSet<i32> {
        self.cached_dates(measure).iter().map(|d| d.year()).collect()
    }

    /// Primary values of `measure` for every cached date in `start..=end`.
    pub fn values_between(
        &self,
        measure: Measure,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<(NaiveDate, f64)> {
        let var = measure.primary_variable().name;
        date_range(start, end)
            .filter_map(|d| self.get(var, d).map(|v| (d, v)))
            .collect()
    }

    /// Number of stored values across every variable.
    pub fn value_count(&self) -> usize {
        self.data
            .values()
            .flat_map(|years| years.values())
            .flat_map(|months| months.values())
            .map(|days| days.len())
            .sum()
    }
}
