/// Daily precipitation statistics of one local day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecipitationSummary {
    pub total_mm: f64,
    /// Hours with at least the wet-hour threshold of precipitation.
    pub wet_hours_per_day: u32,
    pub max_hourly_precip_mm: f64,
}

/// Sums hourly precipitation and counts wet hours. `None` for an empty day.
pub fn daily_aggregate<I>(hourly_mm: I, wet_hour_threshold_mm: f64) -> Option<PrecipitationSummary>
where
    I: IntoIterator<Item = f64>,
{
    let mut summary: Option<PrecipitationSummary> = None;
    for value in hourly_mm.into_iter().filter(|v| v.is_finite()) {
        // ERA5 accumulations can dip marginally below zero.
        let value = value.max(0.0);
        let s = summary.get_or_insert(PrecipitationSummary {
            total_mm: 0.0,
            wet_hours_per_day: 0,
            max_hourly_precip_mm: 0.0,
        });
        s.total_mm += value;
        if value >= wet_hour_threshold_mm {
            s.wet_hours_per_day += 1;
        }
        s.max_hourly_precip_mm = s.max_hourly_precip_mm.max(value);
    }
    summary
}

/// Total daily energy from hourly radiation values already in MJ/m². `None` for an empty day.
pub fn daily_energy<I>(hourly_mj_m2: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    hourly_mj_m2
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v.max(0.0)))
}
