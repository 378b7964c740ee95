//! Runs a retrieval across locations: plan, fetch, match, merge, save.

pub mod dataset;
pub mod error;
pub mod merge;
pub mod observer;
pub mod summary;

use crate::cache::document::CacheDocument;
use crate::cache::store::CacheStore;
use crate::config::{FlushPolicy, RetrievalSettings};
use crate::coordinator::dataset::MergedDataset;
use crate::coordinator::error::CoordinatorError;
use crate::coordinator::merge::merge_values;
use crate::coordinator::observer::{NoopObserver, RetrievalObserver, WindowOutcome};
use crate::coordinator::summary::{LocationSummary, RetrievalSummary, WindowFailure};
use crate::matcher::{match_window, MatchSettings};
use crate::planner::ChunkPlanner;
use crate::retrieval::client::RetrievalClient;
use crate::types::location::{GridCellUpdate, Location};
use crate::types::measure::Measure;
use crate::types::mode::FetchMode;
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Merged data and the per-location report of one [`RetrievalCoordinator::retrieve`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOutcome {
    pub dataset: MergedDataset,
    pub summary: RetrievalSummary,
}

/// Result of one location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRun {
    pub document: CacheDocument,
    pub summary: LocationSummary,
}

pub struct RetrievalCoordinator {
    store: CacheStore,
    client: RetrievalClient,
    settings: RetrievalSettings,
    planner: ChunkPlanner,
    match_settings: MatchSettings,
    observer: Arc<dyn RetrievalObserver>,
    cancel: CancellationToken,
}

impl RetrievalCoordinator {
    pub fn new(store: CacheStore, client: RetrievalClient, settings: RetrievalSettings) -> Self {
        Self {
            store,
            client,
            planner: settings.planner(),
            match_settings: settings.match_settings(),
            settings,
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetrievalObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Stops the run at the next window boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Retrieves `measure` for whole years `year_start..=year_end` using the configured fetch mode.
    pub async fn retrieve(
        &self,
        locations: &[Location],
        year_start: i32,
        year_end: i32,
        measure: Measure,
        update_cache: bool,
    ) -> Result<RetrievalOutcome, CoordinatorError> {
        let fetch_mode = self.settings.fetch_mode.get(measure);
        self.retrieve_with_mode(locations, year_start, year_end, measure, fetch_mode, update_cache)
            .await
    }

    /// Like [`RetrievalCoordinator::retrieve`] with an explicit fetch mode, e.g.
    /// [`FetchMode::Compare`] to time monthly against yearly chunking.
    ///
    /// Window failures and cache failures of single locations are recorded in the summary.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::Plan`] when the year range is invalid for `fetch_mode`. Nothing is
    /// fetched in that case.
    pub async fn retrieve_with_mode(
        &self,
        locations: &[Location],
        year_start: i32,
        year_end: i32,
        measure: Measure,
        fetch_mode: FetchMode,
        update_cache: bool,
    ) -> Result<RetrievalOutcome, CoordinatorError> {
        let (start, end) = self.planner.check_range(year_start, year_end, fetch_mode)?;

        let needing = self
            .locations_needing_retrieval(locations, year_start, year_end, measure)
            .await;
        self.observer.retrieval_planned(&needing);
        info!(
            "Retrieving {} {}-{} for {} location(s), {} need the service",
            measure,
            year_start,
            year_end,
            locations.len(),
            needing.len()
        );

        let mut dataset = MergedDataset::new(measure);
        let mut summary = RetrievalSummary::new(measure, year_start, year_end);
        for (index, location) in locations.iter().enumerate() {
            if self.cancel.is_cancelled() {
                let mut skipped = LocationSummary::new(&location.name);
                skipped.cancelled = true;
                summary.locations.push(skipped);
                continue;
            }
            match self
                .retrieve_location(location, start, end, measure, fetch_mode, update_cache, index, locations.len())
                .await
            {
                Ok(run) => {
                    dataset.extend_from_document(&run.document, start, end);
                    self.observer.location_completed(&run.summary);
                    summary.locations.push(run.summary);
                }
                Err(CoordinatorError::Cache(e)) => {
                    warn!("Skipping {}: {}", location.name, e);
                    let failed = LocationSummary::failed(&location.name, error_chain(&e));
                    self.observer.location_completed(&failed);
                    summary.locations.push(failed);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(RetrievalOutcome { dataset, summary })
    }

    /// Processes one location over `start..=end`.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::Cache`] when the cache file cannot be loaded or saved.
    #[allow(clippy::too_many_arguments)]
    pub async fn retrieve_location(
        &self,
        location: &Location,
        start: NaiveDate,
        end: NaiveDate,
        measure: Measure,
        fetch_mode: FetchMode,
        update_cache: bool,
        index: usize,
        total: usize,
    ) -> Result<LocationRun, CoordinatorError> {
        let mut document = self.store.load(location).await?;
        let mut working = location.clone();
        if let Some(cell) = document.place.grid_cell() {
            working.record_grid_cell(cell);
        }
        let mut dirty = document.refresh_place(&working);

        let mut summary = LocationSummary::new(&location.name);
        summary.cached_days = document
            .cached_dates(measure)
            .range(start..=end)
            .count();

        let windows = self
            .planner
            .plan_range(&document, measure, start, end, fetch_mode, update_cache)?;
        summary.windows_planned = windows.len();
        self.observer
            .location_started(&location.name, index + 1, total, windows.len());
        if windows.is_empty() {
            debug!("{}: {} {}..{} fully cached", location.name, measure, start, end);
        }

        let source = self.settings.daily_source.get(measure);
        for (i, window) in windows.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("Retrieval cancelled before {} for {}", window, location.name);
                summary.cancelled = true;
                break;
            }
            self.observer
                .window_started(&location.name, window, i + 1, windows.len());
            let started = Instant::now();

            let (series, payload) = match self.client.fetch_series(&working, window, source).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!("{} for {} failed: {}", window, location.name, e);
                    summary.windows_failed += 1;
                    summary.failures.push(WindowFailure {
                        window: *window,
                        reason: error_chain(&e),
                    });
                    summary.record_timing(window.fetch_mode, started.elapsed());
                    self.observer
                        .window_completed(&location.name, window, WindowOutcome::Failed);
                    continue;
                }
            };
            let outcome = if payload.reused() {
                summary.windows_reused += 1;
                WindowOutcome::Reused
            } else {
                summary.windows_fetched += 1;
                WindowOutcome::Fetched
            };

            if working.record_grid_cell(series.cell) == GridCellUpdate::Recorded {
                dirty |= document.refresh_place(&working);
            }

            let matched = match_window(&series, window, working.tz(), &self.match_settings, source);
            for (date, reason) in &matched.gaps {
                debug!("{}: no value for {}: {}", location.name, date, reason);
            }
            summary.gap_days += matched.gaps.len();
            summary.partial_days += matched.partial_days();

            let stats = merge_values(&mut document, &matched.values, update_cache);
            summary.record_merge(stats);
            dirty |= stats.changed();

            if dirty && self.settings.flush_policy == FlushPolicy::EachWindow {
                self.store.save(&document).await?;
                dirty = false;
            }
            summary.record_timing(window.fetch_mode, started.elapsed());
            self.observer.window_completed(&location.name, window, outcome);
        }

        if dirty {
            self.store.save(&document).await?;
        }
        info!(
            "{}: {} new day(s), {} window(s) failed",
            location.name, summary.fetched_days, summary.windows_failed
        );
        Ok(LocationRun { document, summary })
    }

    /// Names of the locations whose cache misses at least one requested date.
    ///
    /// A location whose cache cannot be read is listed as well.
    pub async fn locations_needing_retrieval(
        &self,
        locations: &[Location],
        year_start: i32,
        year_end: i32,
        measure: Measure,
    ) -> Vec<String> {
        let Ok((start, end)) = self
            .planner
            .check_range(year_start, year_end, FetchMode::Yearly)
        else {
            return Vec::new();
        };
        let expected = (end - start).num_days() as usize + 1;
        let mut needing = Vec::new();
        for location in locations {
            let cached = match self.store.load(location).await {
                Ok(doc) => doc.cached_dates(measure).range(start..=end).count(),
                Err(_) => 0,
            };
            if cached < expected {
                needing.push(location.name.clone());
            }
        }
        needing
    }
}

/// `error: cause: cause` on one line.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientSettings;
    use crate::retrieval::client::tests::FakeTransport;
    use crate::retrieval::job::RemoteStatus;
    use crate::retrieval::raw_cache::RawPayloadCache;
    use crate::schema::registry::SchemaRegistry;
    use crate::types::location::GridCell;
    use crate::types::request_window::RequestWindow;
    use crate::utils::date_range;
    use std::fmt::Write as _;
    use std::path::Path;
    use std::sync::Mutex;

    /// Hourly t2m for January 2024 (plus padding) at one grid cell; the value at hour h of
    /// day d is `273.15 + d`, so every local noon in UTC resolves to the day of month.
    fn january_csv() -> String {
        let mut csv = String::from("valid_time,t2m,latitude,longitude\n");
        let start = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        for date in date_range(start, end) {
            for hour in 0..24 {
                let _ = writeln!(
                    csv,
                    "{} {:02}:00:00,{},51.5,0.0",
                    date,
                    hour,
                    273.15 + f64::from(chrono::Datelike::day(&date))
                );
            }
        }
        csv
    }

    fn settings() -> RetrievalSettings {
        let mut settings = RetrievalSettings::default();
        settings.fetch_mode.noon_temperature = FetchMode::Monthly;
        settings
    }

    fn client_settings() -> ClientSettings {
        ClientSettings {
            poll_interval_secs: 1,
            max_poll_interval_secs: 2,
            max_wait_secs: 30,
            download_retries: 0,
            ..ClientSettings::default()
        }
    }

    fn coordinator(dir: &Path, transport: Arc<FakeTransport>, settings: RetrievalSettings) -> RetrievalCoordinator {
        let registry = Arc::new(SchemaRegistry::load_registry().unwrap());
        let store = CacheStore::new(dir.join("data"), registry);
        let client = RetrievalClient::new(
            transport,
            client_settings(),
            RawPayloadCache::new(dir.join("raw")),
            settings.request_options(),
        );
        RetrievalCoordinator::new(store, client, settings)
    }

    fn london() -> Location {
        Location::with_timezone("London", 51.5, -0.12, "Europe/London").unwrap()
    }

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_merges_and_saves_a_month() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::with_payload(january_csv()));
        let coordinator = coordinator(dir.path(), transport.clone(), settings());

        let run = coordinator
            .retrieve_location(&london(), jan(1), jan(31), Measure::NoonTemperature, FetchMode::Monthly, false, 0, 1)
            .await
            .unwrap();
        assert_eq!(run.summary.windows_planned, 1);
        assert_eq!(run.summary.windows_fetched, 1);
        assert_eq!(run.summary.fetched_days, 31);
        assert_eq!(run.summary.gap_days, 0);
        assert_eq!(run.document.get("noon_temp_C", jan(15)), Some(15.0));
        assert_eq!(run.document.place.grid_cell(), Some(GridCell::new(51.5, 0.0)));

        let reloaded = coordinator.store().load(&london()).await.unwrap();
        assert_eq!(reloaded.get("noon_temp_C", jan(31)), Some(31.0));
        assert_eq!(reloaded.place.grid_lat, Some(51.5));

        // Second run: everything cached, nothing planned or submitted.
        let again = coordinator
            .retrieve_location(&london(), jan(1), jan(31), Measure::NoonTemperature, FetchMode::Monthly, false, 0, 1)
            .await
            .unwrap();
        assert_eq!(again.summary.windows_planned, 0);
        assert_eq!(again.summary.cached_days, 31);
        assert_eq!(transport.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn update_cache_controls_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::with_payload(january_csv()));
        let coordinator = coordinator(dir.path(), transport.clone(), settings());

        let mut seeded = coordinator.store().load(&london()).await.unwrap();
        seeded.ensure_variable_metadata(Measure::NoonTemperature);
        seeded.insert("noon_temp_C", jan(10), -5.0);
        coordinator.store().save(&seeded).await.unwrap();

        let kept = coordinator
            .retrieve_location(&london(), jan(10), jan(12), Measure::NoonTemperature, FetchMode::Monthly, false, 0, 1)
            .await
            .unwrap();
        assert_eq!(kept.document.get("noon_temp_C", jan(10)), Some(-5.0));
        assert_eq!(kept.summary.fetched_days, 2);

        let replaced = coordinator
            .retrieve_location(&london(), jan(10), jan(12), Measure::NoonTemperature, FetchMode::Monthly, true, 0, 1)
            .await
            .unwrap();
        assert_eq!(replaced.document.get("noon_temp_C", jan(10)), Some(10.0));
        assert_eq!(replaced.summary.overwritten_days, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_windows_are_recorded_and_others_continue() {
        let dir = tempfile::tempdir().unwrap();
        // The first job fails remotely; later jobs succeed.
        let transport = Arc::new(
            FakeTransport::with_payload(january_csv()).script(vec![Ok(RemoteStatus::Failed)]),
        );
        let coordinator = coordinator(dir.path(), transport, settings());
        let paris = Location::with_timezone("Paris", 48.85, 2.35, "Europe/Paris").unwrap();

        let outcome = coordinator
            .retrieve(&[paris, london()], 2024, 2024, Measure::NoonTemperature, false)
            .await
            .unwrap();
        let summary = &outcome.summary;
        assert_eq!(summary.locations.len(), 2);
        let paris = &summary.locations[0];
        assert_eq!(paris.windows_planned, 12);
        assert_eq!(paris.windows_failed, 1);
        assert_eq!(paris.failures[0].window.start_date(), jan(1));
        // The payload only covers January, so the other months are unresolved.
        assert!(paris.gap_days > 300);
        assert!(summary.is_partial_success());
        assert!(outcome.dataset.rows_for("London").count() >= 31);
        assert!(summary.format_summary().contains("Paris [partial]"));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_errors_are_isolated_per_location() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::with_payload(january_csv()));
        let coordinator = coordinator(dir.path(), transport, settings());

        let broken = Location::with_timezone("Broken", 10.0, 10.0, "UTC").unwrap();
        let path = coordinator.store().document_path("Broken");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"place": {"name": "Broken"}}"#).unwrap();

        let outcome = coordinator
            .retrieve(&[broken, london()], 2024, 2024, Measure::NoonTemperature, false)
            .await
            .unwrap();
        assert!(outcome.summary.locations[0].cache_error.is_some());
        assert!(outcome.summary.locations[1].cache_error.is_none());
        assert_eq!(outcome.summary.incomplete_locations(), vec!["Broken"]);
    }

    #[tokio::test(start_paused = true)]
    async fn planner_misuse_aborts_before_any_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::with_payload(january_csv()));
        let coordinator = coordinator(dir.path(), transport.clone(), settings());
        let err = coordinator
            .retrieve_with_mode(&[london()], 2023, 2024, Measure::NoonTemperature, FetchMode::Compare, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Plan(_)));
        assert!(transport.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn compare_mode_times_both_chunk_modes() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::with_payload(january_csv()));
        let coordinator = coordinator(dir.path(), transport.clone(), settings());
        let outcome = coordinator
            .retrieve_with_mode(&[london()], 2024, 2024, Measure::NoonTemperature, FetchMode::Compare, false)
            .await
            .unwrap();
        let timings = &outcome.summary.locations[0].timings;
        assert_eq!(timings.len(), 2);
        assert_eq!(timings[0].windows, 12);
        assert_eq!(timings[1].windows, 1);
        // The payload covers January and February 1st; the yearly pass keeps what the monthly
        // pass already wrote for those days.
        assert_eq!(outcome.summary.locations[0].fetched_days, 32);
        assert_eq!(outcome.summary.locations[0].skipped_days, 32);
        assert_eq!(transport.submitted.lock().unwrap().len(), 13);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_between_windows_and_flushes() {
        #[derive(Default)]
        struct CancelAfterFirst {
            token: Mutex<Option<CancellationToken>>,
        }
        impl RetrievalObserver for CancelAfterFirst {
            fn window_completed(&self, _: &str, _: &RequestWindow, _: WindowOutcome) {
                if let Some(token) = self.token.lock().unwrap().as_ref() {
                    token.cancel();
                }
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::with_payload(january_csv()));
        let mut settings = settings();
        settings.flush_policy = FlushPolicy::EachLocation;
        let observer = Arc::new(CancelAfterFirst::default());
        let coordinator = coordinator(dir.path(), transport.clone(), settings).with_observer(observer.clone());
        *observer.token.lock().unwrap() = Some(coordinator.cancellation_token());

        let outcome = coordinator
            .retrieve(&[london()], 2024, 2024, Measure::NoonTemperature, false)
            .await
            .unwrap();
        let london_summary = &outcome.summary.locations[0];
        assert!(london_summary.cancelled);
        assert_eq!(london_summary.windows_fetched, 1);
        assert_eq!(transport.submitted.lock().unwrap().len(), 1);

        let saved = coordinator.store().load(&london()).await.unwrap();
        assert_eq!(saved.cached_dates(Measure::NoonTemperature).len(), 31);
    }

    #[tokio::test]
    async fn reports_locations_needing_retrieval() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::with_payload(january_csv()));
        let coordinator = coordinator(dir.path(), transport, settings());

        let mut doc = coordinator.store().load(&london()).await.unwrap();
        doc.ensure_variable_metadata(Measure::NoonTemperature);
        for date in date_range(jan(1), NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()) {
            doc.insert("noon_temp_C", date, 1.0);
        }
        coordinator.store().save(&doc).await.unwrap();

        let rome = Location::with_timezone("Rome", 41.9, 12.5, "Europe/Rome").unwrap();
        let needing = coordinator
            .locations_needing_retrieval(&[london(), rome], 2024, 2024, Measure::NoonTemperature)
            .await;
        assert_eq!(needing, vec!["Rome".to_string()]);
    }
}
