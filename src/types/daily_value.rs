use crate::types::measure::Measure;
use chrono::NaiveDate;

/// One measure's resolved value for one local calendar date.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyValue {
    pub date: NaiveDate,
    pub measure: Measure,
    /// Primary value in the measure's stored unit.
    pub value: f64,
    /// Hours with precipitation at or above the wet-hour threshold.
    pub wet_hours_per_day: Option<u32>,
    pub max_hourly_precip_mm: Option<f64>,
    /// Fewer samples than the local day has hours. Reported, never persisted.
    pub partial: bool,
}

impl DailyValue {
    pub fn new(date: NaiveDate, measure: Measure, value: f64) -> Self {
        Self {
            date,
            measure,
            value,
            wet_hours_per_day: None,
            max_hourly_precip_mm: None,
            partial: false,
        }
    }

    pub fn with_precip_stats(mut self, wet_hours_per_day: u32, max_hourly_precip_mm: f64) -> Self {
        self.wet_hours_per_day = Some(wet_hours_per_day);
        self.max_hourly_precip_mm = Some(max_hourly_precip_mm);
        self
    }

    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    /// The `(cache variable, value)` pairs this value writes into a cache document.
    pub fn variable_values(&self) -> Vec<(&'static str, f64)> {
        let mut out = vec![(self.measure.primary_variable().name, self.value)];
        for var in self.measure.auxiliary_variables() {
            let v = match var.name {
                "wet_hours_per_day" => self.wet_hours_per_day.map(f64::from),
                "max_hourly_precip_mm" => self.max_hourly_precip_mm,
                _ => None,
            };
            if let Some(v) = v {
                out.push((var.name, v));
            }
        }
        out
    }
}
