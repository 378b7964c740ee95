//! What a retrieval run did, per location.

use crate::coordinator::merge::MergeStats;
use crate::types::measure::Measure;
use crate::types::mode::ChunkMode;
use crate::types::request_window::RequestWindow;
use std::fmt::Write;
use std::time::Duration;

const RULE_WIDTH: usize = 60;

/// A window that produced no data, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFailure {
    pub window: RequestWindow,
    pub reason: String,
}

/// Wall-clock time spent on the windows of one chunk mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTiming {
    pub mode: ChunkMode,
    pub windows: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationSummary {
    pub location: String,
    pub windows_planned: usize,
    /// Windows whose payload was downloaded during this run.
    pub windows_fetched: usize,
    /// Windows served from a payload downloaded by an earlier run.
    pub windows_reused: usize,
    pub windows_failed: usize,
    /// Requested days that were already cached before the run.
    pub cached_days: usize,
    /// Days newly written to the cache.
    pub fetched_days: usize,
    pub skipped_days: usize,
    pub overwritten_days: usize,
    /// Days of fetched windows that could not be resolved.
    pub gap_days: usize,
    /// Days resolved from fewer hourly samples than the local day has hours.
    pub partial_days: usize,
    pub failures: Vec<WindowFailure>,
    /// Set when the cache file could not be loaded or saved; nothing else ran for the location.
    pub cache_error: Option<String>,
    pub cancelled: bool,
    pub timings: Vec<ModeTiming>,
}

impl LocationSummary {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }

    pub fn failed(location: impl Into<String>, cache_error: impl Into<String>) -> Self {
        Self {
            cache_error: Some(cache_error.into()),
            ..Self::new(location)
        }
    }

    pub(crate) fn record_merge(&mut self, stats: MergeStats) {
        self.fetched_days += stats.inserted;
        self.overwritten_days += stats.overwritten;
        self.skipped_days += stats.skipped;
    }

    pub(crate) fn record_timing(&mut self, mode: ChunkMode, elapsed: Duration) {
        match self.timings.iter_mut().find(|t| t.mode == mode) {
            Some(timing) => {
                timing.windows += 1;
                timing.elapsed += elapsed;
            }
            None => self.timings.push(ModeTiming {
                mode,
                windows: 1,
                elapsed,
            }),
        }
    }

    /// Every planned window succeeded and nothing was interrupted.
    pub fn is_complete(&self) -> bool {
        self.windows_failed == 0 && self.cache_error.is_none() && !self.cancelled
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSummary {
    pub measure: Measure,
    pub year_start: i32,
    pub year_end: i32,
    pub locations: Vec<LocationSummary>,
}

impl RetrievalSummary {
    pub fn new(measure: Measure, year_start: i32, year_end: i32) -> Self {
        Self {
            measure,
            year_start,
            year_end,
            locations: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.locations.iter().all(LocationSummary::is_complete)
    }

    /// Some locations or windows failed but at least one day was retrieved or cached.
    pub fn is_partial_success(&self) -> bool {
        !self.is_complete()
            && self
                .locations
                .iter()
                .any(|l| l.fetched_days + l.cached_days + l.overwritten_days > 0)
    }

    pub fn windows_failed(&self) -> usize {
        self.locations.iter().map(|l| l.windows_failed).sum()
    }

    pub fn fetched_days(&self) -> usize {
        self.locations.iter().map(|l| l.fetched_days).sum()
    }

    /// Locations a later run still has to fetch for.
    pub fn incomplete_locations(&self) -> Vec<&str> {
        self.locations
            .iter()
            .filter(|l| !l.is_complete())
            .map(|l| l.location.as_str())
            .collect()
    }

    /// Multi-line report meant for a terminal or a log file.
    pub fn format_summary(&self) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(
            out,
            "Retrieval summary: {} {}-{}",
            self.measure, self.year_start, self.year_end
        );
        let _ = writeln!(out, "{rule}");
        for l in &self.locations {
            let status = if let Some(err) = &l.cache_error {
                format!("cache error: {err}")
            } else if l.cancelled {
                "cancelled".to_string()
            } else if l.windows_failed > 0 {
                "partial".to_string()
            } else {
                "ok".to_string()
            };
            let _ = writeln!(out, "  {} [{}]", l.location, status);
            let _ = writeln!(
                out,
                "    windows: {} planned, {} fetched, {} reused, {} failed",
                l.windows_planned, l.windows_fetched, l.windows_reused, l.windows_failed
            );
            let _ = writeln!(
                out,
                "    days: {} cached, {} new, {} overwritten, {} skipped, {} gaps, {} partial",
                l.cached_days,
                l.fetched_days,
                l.overwritten_days,
                l.skipped_days,
                l.gap_days,
                l.partial_days
            );
            for failure in &l.failures {
                let _ = writeln!(out, "    failed {}: {}", failure.window, failure.reason);
            }
            for timing in &l.timings {
                let _ = writeln!(
                    out,
                    "    {}: {} window(s) in {:.1}s",
                    timing.mode,
                    timing.windows,
                    timing.elapsed.as_secs_f64()
                );
            }
        }
        let _ = writeln!(out, "{rule}");
        out
    }
}

/// Pre-flight report listing the locations that need the service.
pub fn format_retrieval_plan(locations_needing_retrieval: &[String]) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut lines = vec![String::new(), rule.clone()];
    if locations_needing_retrieval.is_empty() {
        lines.push("All data already cached - no CDS retrieval needed".to_string());
    } else {
        lines.push(format!(
            "CDS Retrieval Required: {} place(s)",
            locations_needing_retrieval.len()
        ));
        lines.push(rule.clone());
        lines.extend(locations_needing_retrieval.iter().map(|name| format!("  • {name}")));
    }
    lines.push(rule);
    lines.join("\n")
}
