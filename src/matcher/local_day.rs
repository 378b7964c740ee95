use crate::matcher::nearest::local_instant_utc;
use crate::types::raw::RawSample;
use chrono::{Days, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use std::collections::BTreeMap;

/// Buckets samples into the local calendar day they fall on.
pub fn group_by_local_day(samples: &[RawSample], tz: Tz) -> BTreeMap<NaiveDate, Vec<RawSample>> {
    let mut days: BTreeMap<NaiveDate, Vec<RawSample>> = BTreeMap::new();
    for sample in samples {
        let local_date = sample.time.with_timezone(&tz).date_naive();
        days.entry(local_date).or_default().push(*sample);
    }
    days
}

/// Length of the local day in hours: 24, or 23/25 on DST transitions.
pub fn expected_hours(date: NaiveDate, tz: Tz) -> u32 {
    let midnight = NaiveTime::MIN;
    let start = local_instant_utc(date, midnight, tz);
    let end = date
        .checked_add_days(Days::new(1))
        .and_then(|next| local_instant_utc(next, midnight, tz));
    match (start, end) {
        (Some(start), Some(end)) => (end - start).num_hours().clamp(0, 48) as u32,
        _ => 24,
    }
}
