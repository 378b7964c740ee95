use crate::cache::document::CacheDocument;
use crate::types::daily_value::DailyValue;
use crate::utils::round_to;
use log::debug;

/// Per-day outcome counts of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Dates that had no cached value.
    pub inserted: usize,
    /// Cached dates replaced with a different value.
    pub overwritten: usize,
    /// Cached dates left alone because `update_cache` was off.
    pub skipped: usize,
    /// Cached dates re-retrieved with an identical value.
    pub unchanged: usize,
}

impl MergeStats {
    pub fn changed(&self) -> bool {
        self.inserted + self.overwritten > 0
    }

    pub fn add(&mut self, other: MergeStats) {
        self.inserted += other.inserted;
        self.overwritten += other.overwritten;
        self.skipped += other.skipped;
        self.unchanged += other.unchanged;
    }
}

/// Merges `values` into `document`.
///
/// A date that already holds the measure's primary value is only rewritten when
/// `update_cache` is set; otherwise the new value is discarded. Auxiliary variables follow
/// the decision made for the primary value of the same day. Values are rounded to the
/// variable's stored precision before they are compared.
pub fn merge_values(document: &mut CacheDocument, values: &[DailyValue], update_cache: bool) -> MergeStats {
    let mut stats = MergeStats::default();
    for value in values {
        let primary = value.measure.primary_variable().name;
        let existing = document.get(primary, value.date);

        if existing.is_some() && !update_cache {
            debug!(
                "Skipping {} {} for {}: already cached",
                value.measure, value.date, document.place.name
            );
            stats.skipped += 1;
            continue;
        }

        let pairs: Vec<(&str, f64)> = value
            .variable_values()
            .into_iter()
            .map(|(var, v)| (var, document.precision_of(var).map_or(v, |p| round_to(v, p))))
            .collect();
        let same = existing.is_some()
            && pairs
                .iter()
                .all(|(var, v)| document.get(var, value.date) == Some(*v));
        if same {
            stats.unchanged += 1;
            continue;
        }

        document.ensure_variable_metadata(value.measure);
        for (var, v) in pairs {
            document.insert(var, value.date, v);
        }
        if existing.is_some() {
            stats.overwritten += 1;
        } else {
            stats.inserted += 1;
        }
    }
    stats
}
