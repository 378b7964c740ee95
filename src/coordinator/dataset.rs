use crate::cache::document::CacheDocument;
use crate::types::measure::Measure;
use crate::utils::{date_range, round_to};
use chrono::NaiveDate;
use polars::prelude::*;

/// One location-day of the merged output.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub date: NaiveDate,
    pub place_name: String,
    pub value: f64,
    pub grid_lat: Option<f64>,
    pub grid_lon: Option<f64>,
    pub wet_hours_per_day: Option<f64>,
    pub max_hourly_precip_mm: Option<f64>,
}

/// Cached and newly retrieved values of one measure across all requested locations.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDataset {
    pub measure: Measure,
    pub rows: Vec<DatasetRow>,
}

impl MergedDataset {
    pub fn new(measure: Measure) -> Self {
        Self {
            measure,
            rows: Vec::new(),
        }
    }

    /// Appends every value of the measure that `document` holds in `start..=end`.
    pub fn extend_from_document(&mut self, document: &CacheDocument, start: NaiveDate, end: NaiveDate) {
        let primary = self.measure.primary_variable();
        let precision = document
            .precision_of(primary.name)
            .unwrap_or(primary.precision);
        let aux = |name: &str, date| {
            if self.measure.auxiliary_variables().iter().any(|v| v.name == name) {
                document.get(name, date)
            } else {
                None
            }
        };

        let rows: Vec<DatasetRow> = date_range(start, end)
            .filter_map(|date| {
                let value = document.get(primary.name, date)?;
                Some(DatasetRow {
                    date,
                    place_name: document.place.name.clone(),
                    value: round_to(value, precision),
                    grid_lat: document.place.grid_lat,
                    grid_lon: document.place.grid_lon,
                    wet_hours_per_day: aux("wet_hours_per_day", date),
                    max_hourly_precip_mm: aux("max_hourly_precip_mm", date),
                })
            })
            .collect();
        self.rows.extend(rows);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows_for<'a>(&'a self, place_name: &'a str) -> impl Iterator<Item = &'a DatasetRow> + 'a {
        self.rows.iter().filter(move |r| r.place_name == place_name)
    }

    /// The dataset as a polars frame.
    ///
    /// Columns: `date`, `place_name`, `value`, `grid_lat`, `grid_lon`, then `temp_F` for noon
    /// temperature or `wet_hours_per_day` and `max_hourly_precip_mm` for precipitation.
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let dates: Vec<NaiveDate> = self.rows.iter().map(|r| r.date).collect();
        let names: Vec<&str> = self.rows.iter().map(|r| r.place_name.as_str()).collect();
        let values: Vec<f64> = self.rows.iter().map(|r| r.value).collect();
        let grid_lat: Vec<Option<f64>> = self.rows.iter().map(|r| r.grid_lat).collect();
        let grid_lon: Vec<Option<f64>> = self.rows.iter().map(|r| r.grid_lon).collect();

        let mut df = df!(
            "date" => dates,
            "place_name" => names,
            "value" => values,
            "grid_lat" => grid_lat,
            "grid_lon" => grid_lon,
        )?;

        match self.measure {
            Measure::NoonTemperature => {
                let temp_f: Vec<f64> = self
                    .rows
                    .iter()
                    .map(|r| round_to(r.value * 9.0 / 5.0 + 32.0, 2))
                    .collect();
                df.with_column(Column::new("temp_F".into(), temp_f))?;
            }
            Measure::DailyPrecipitation => {
                let wet: Vec<Option<f64>> = self.rows.iter().map(|r| r.wet_hours_per_day).collect();
                let max: Vec<Option<f64>> = self.rows.iter().map(|r| r.max_hourly_precip_mm).collect();
                df.with_column(Column::new("wet_hours_per_day".into(), wet))?;
                df.with_column(Column::new("max_hourly_precip_mm".into(), max))?;
            }
            Measure::DailySolarRadiationEnergy => {}
        }
        Ok(df)
    }
}
