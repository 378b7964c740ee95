use crate::matcher::error::MatchError;
use crate::types::raw::RawSample;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

/// The UTC instant of 12:00 local time on `date`.
///
/// Ambiguous local times resolve to the earliest instant. Should noon fall into a DST gap,
/// the first valid local time after it is used.
pub fn local_noon_utc(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    local_instant_utc(date, NaiveTime::from_hms_opt(12, 0, 0)?, tz)
}

pub(crate) fn local_instant_utc(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    let local = date.and_time(time);
    (0..=2)
        .find_map(|shift| {
            tz.from_local_datetime(&(local + TimeDelta::hours(shift)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
}

/// Picks the sample closest to `local_noon`.
///
/// Ties go to the earlier sample. A sample exactly `tolerance` away is accepted.
///
/// # Errors
///
/// [`MatchError::NoSampleWithinTolerance`] if `series` is empty or its closest sample is
/// further than `tolerance` from `local_noon`.
pub fn nearest_to_local_noon(
    series: &[RawSample],
    local_noon: DateTime<Utc>,
    tolerance: TimeDelta,
) -> Result<&RawSample, MatchError> {
    let nearest = series
        .iter()
        .min_by_key(|s| ((s.time - local_noon).abs(), s.time));

    match nearest {
        Some(sample) if (sample.time - local_noon).abs() <= tolerance => Ok(sample),
        other => Err(MatchError::NoSampleWithinTolerance {
            target: local_noon,
            nearest_minutes: other.map(|s| (s.time - local_noon).num_minutes()),
            tolerance_minutes: tolerance.num_minutes(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn samples_around(noon: DateTime<Utc>, offsets: &[i64]) -> Vec<RawSample> {
        offsets
            .iter()
            .map(|m| RawSample::new(noon + TimeDelta::minutes(*m), *m as f64))
            .collect()
    }

    #[test]
    fn local_noon_follows_dst() {
        let tz = chrono_tz::Europe::London;
        let winter = local_noon_utc(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(), tz).unwrap();
        let summer = local_noon_utc(NaiveDate::from_ymd_opt(2024, 7, 15).unwrap(), tz).unwrap();
        assert_eq!(winter.hour(), 12);
        assert_eq!(summer.hour(), 11);

        let kolkata = local_noon_utc(
            NaiveDate::from_ymd_opt(2024, 7, 15).unwrap(),
            chrono_tz::Asia::Kolkata,
        )
        .unwrap();
        assert_eq!((kolkata.hour(), kolkata.minute()), (6, 30));
    }

    #[test]
    fn selects_closest_sample_within_tolerance() {
        let noon = local_noon_utc(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), Tz::UTC).unwrap();
        let series = samples_around(noon, &[-45, -10, 5, 40]);

        let hit = nearest_to_local_noon(&series, noon, TimeDelta::minutes(30)).unwrap();
        assert_eq!(hit.value, 5.0);

        let edge = nearest_to_local_noon(&series, noon, TimeDelta::minutes(5)).unwrap();
        assert_eq!(edge.value, 5.0);
    }

    #[test]
    fn fails_when_nearest_exceeds_tolerance() {
        let noon = local_noon_utc(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), Tz::UTC).unwrap();
        let series = samples_around(noon, &[-45, -10, 5, 40]);
        let err = nearest_to_local_noon(&series, noon, TimeDelta::minutes(4)).unwrap_err();
        assert_eq!(
            err,
            MatchError::NoSampleWithinTolerance {
                target: noon,
                nearest_minutes: Some(5),
                tolerance_minutes: 4
            }
        );

        let far = samples_around(noon, &[-45, 40]);
        assert!(nearest_to_local_noon(&far, noon, TimeDelta::minutes(30)).is_err());
        assert!(nearest_to_local_noon(&[], noon, TimeDelta::minutes(30)).is_err());
    }

    #[test]
    fn ties_prefer_earlier_sample() {
        let noon = local_noon_utc(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), Tz::UTC).unwrap();
        let series = samples_around(noon, &[30, -30]);
        let hit = nearest_to_local_noon(&series, noon, TimeDelta::minutes(30)).unwrap();
        assert_eq!(hit.value, -30.0);
    }
}
