//! Main entry point: retrieves ERA5 daily values for a set of locations, serving what it can
//! from the per-location cache and fetching the rest from the Copernicus Climate Data Store.

use crate::cache::document::CacheDocument;
use crate::cache::store::CacheStore;
use crate::config::{RuntimePaths, Settings};
use crate::coordinator::observer::RetrievalObserver;
use crate::coordinator::{RetrievalCoordinator, RetrievalOutcome};
use crate::error::Era5ClimateError;
use crate::retrieval::client::RetrievalClient;
use crate::retrieval::credentials::Credentials;
use crate::retrieval::raw_cache::RawPayloadCache;
use crate::retrieval::transport::{CdsTransport, Transport};
use crate::schema::registry::SchemaRegistry;
use crate::types::location::Location;
use crate::types::measure::Measure;
use crate::types::mode::FetchMode;
use crate::utils::{ensure_cache_dir_exists, get_cache_dir};
use bon::bon;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Client for cached ERA5 climate retrieval.
///
/// Downloaded payloads and the per-location JSON caches live below one root folder. Create an
/// instance with [`Era5Climate::new()`] for the default cache location, or
/// [`Era5Climate::with_cache_folder()`] to choose it.
///
/// CDS credentials are taken from the settings, then `CDSAPI_URL`/`CDSAPI_KEY`, then
/// `~/.cdsapirc`.
///
/// # Examples
///
/// ```rust,no_run
/// # use era5_climate::{Era5Climate, Era5ClimateError, Location, Measure};
/// # #[tokio::main]
/// # async fn main() -> Result<(), Era5ClimateError> {
/// let client = Era5Climate::new().await?;
/// let austin = Location::new("Austin, TX", 30.27, -97.74)?;
///
/// let outcome = client
///     .retrieve()
///     .locations(&[austin])
///     .year_start(2023)
///     .year_end(2024)
///     .measure(Measure::NoonTemperature)
///     .call()
///     .await?;
/// println!("{}", outcome.summary.format_summary());
/// let frame = outcome.dataset.to_frame()?;
/// # Ok(())
/// # }
/// ```
pub struct Era5Climate {
    settings: Settings,
    paths: RuntimePaths,
    store: CacheStore,
    transport: Arc<dyn Transport>,
}

#[bon]
impl Era5Climate {
    /// Creates a client with default settings below the system cache directory.
    ///
    /// # Errors
    ///
    /// [`Era5ClimateError::CacheDirResolution`] if there is no system cache directory, and the
    /// errors of [`Era5Climate::with_cache_folder`].
    pub async fn new() -> Result<Self, Era5ClimateError> {
        let cache_folder = get_cache_dir().map_err(Era5ClimateError::CacheDirResolution)?;
        Self::with_cache_folder(cache_folder).await
    }

    /// Creates a client with default settings below `cache_folder`.
    ///
    /// # Errors
    ///
    /// Fails when the cache folders cannot be created, the schema registry is invalid or no CDS
    /// key can be found.
    pub async fn with_cache_folder(cache_folder: PathBuf) -> Result<Self, Era5ClimateError> {
        Self::with_settings(Settings::default(), cache_folder).await
    }

    /// Loads settings from a TOML file. Relative paths in it resolve against the system cache
    /// directory.
    pub async fn from_config_file(path: impl AsRef<Path>) -> Result<Self, Era5ClimateError> {
        let settings = Settings::load_from_path(path)?;
        let cache_folder = get_cache_dir().map_err(Era5ClimateError::CacheDirResolution)?;
        Self::with_settings(settings, cache_folder).await
    }

    pub async fn with_settings(settings: Settings, cache_folder: PathBuf) -> Result<Self, Era5ClimateError> {
        let credentials = Credentials::resolve(&settings.client)?;
        let transport = CdsTransport::new(credentials, settings.client.request_timeout())?;
        Self::with_transport(settings, cache_folder, Arc::new(transport)).await
    }

    /// Uses `transport` instead of the CDS web API.
    pub async fn with_transport(
        settings: Settings,
        cache_folder: PathBuf,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, Era5ClimateError> {
        settings.validate()?;
        let paths = settings.paths.resolve_under(&cache_folder);
        for dir in [&paths.cache_dir, &paths.data_cache_dir] {
            ensure_cache_dir_exists(dir)
                .await
                .map_err(|e| Era5ClimateError::CacheDirCreation(dir.clone(), e))?;
        }
        let registry = Arc::new(SchemaRegistry::load_registry()?);
        info!(
            "Using cache {} (schema v{})",
            paths.data_cache_dir.display(),
            registry.current_version()
        );
        let store = CacheStore::new(paths.data_cache_dir.clone(), registry);
        Ok(Self {
            settings,
            paths,
            store,
            transport,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    /// Retrieves one measure for whole years `year_start..=year_end`.
    ///
    /// Cached days are served from the cache; the rest is fetched window by window and merged
    /// into the cache. Failed windows do not abort the run; they are listed in the summary.
    ///
    /// # Arguments
    ///
    /// * `.locations(&[Location])`: **Required.**
    /// * `.year_start(i32)`, `.year_end(i32)`: **Required.** Inclusive.
    /// * `.measure(Measure)`: **Required.**
    /// * `.fetch_mode(FetchMode)`: Optional. Defaults to the configured mode of the measure.
    ///   [`FetchMode::Compare`] fetches a single year both monthly and yearly.
    /// * `.update_cache(bool)`: Optional. Re-fetch cached days and overwrite them. Defaults to `false`.
    /// * `.observer(Arc<dyn RetrievalObserver>)`: Optional progress callbacks.
    /// * `.cancel(CancellationToken)`: Optional. Cancelling stops at the next window.
    ///
    /// # Errors
    ///
    /// [`Era5ClimateError::Coordinator`] if the year range is invalid for the fetch mode.
    #[builder]
    pub async fn retrieve(
        &self,
        locations: &[Location],
        year_start: i32,
        year_end: i32,
        measure: Measure,
        fetch_mode: Option<FetchMode>,
        update_cache: Option<bool>,
        observer: Option<Arc<dyn RetrievalObserver>>,
        cancel: Option<CancellationToken>,
    ) -> Result<RetrievalOutcome, Era5ClimateError> {
        let mut coordinator = self.coordinator();
        if let Some(observer) = observer {
            coordinator = coordinator.with_observer(observer);
        }
        if let Some(cancel) = cancel {
            coordinator = coordinator.with_cancellation(cancel);
        }
        let fetch_mode = fetch_mode.unwrap_or_else(|| self.settings.retrieval.fetch_mode.get(measure));
        let outcome = coordinator
            .retrieve_with_mode(
                locations,
                year_start,
                year_end,
                measure,
                fetch_mode,
                update_cache.unwrap_or(false),
            )
            .await?;
        Ok(outcome)
    }

    /// Names of the locations whose cache is missing days of the requested years.
    pub async fn locations_needing_retrieval(
        &self,
        locations: &[Location],
        year_start: i32,
        year_end: i32,
        measure: Measure,
    ) -> Vec<String> {
        self.coordinator()
            .locations_needing_retrieval(locations, year_start, year_end, measure)
            .await
    }

    /// The cache document of `location`, migrated to the current schema.
    pub async fn load_cache(&self, location: &Location) -> Result<CacheDocument, Era5ClimateError> {
        Ok(self.store.load(location).await?)
    }

    fn coordinator(&self) -> RetrievalCoordinator {
        let client = RetrievalClient::new(
            self.transport.clone(),
            self.settings.client.clone(),
            RawPayloadCache::new(self.paths.cache_dir.clone()),
            self.settings.retrieval.request_options(),
        );
        RetrievalCoordinator::new(self.store.clone(), client, self.settings.retrieval.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::client::tests::FakeTransport;
    use chrono::NaiveDate;

    fn payload() -> String {
        let mut csv = String::from("date,ssrd,latitude,longitude\n");
        let mut date = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        while date <= end {
            for hour in 0..24 {
                csv.push_str(&format!("{date} {hour:02}:00:00,100000,0.0,0.0\n"));
            }
            date = date.succ_opt().unwrap();
        }
        csv
    }

    #[tokio::test(start_paused = true)]
    async fn retrieves_through_a_custom_transport() -> Result<(), Era5ClimateError> {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::with_payload(payload()));
        let client =
            Era5Climate::with_transport(Settings::default(), dir.path().to_path_buf(), transport.clone()).await?;
        assert!(client.paths().data_cache_dir.is_dir());

        let null_island = Location::with_timezone("Null Island", 0.0, 0.0, "UTC")?;
        assert_eq!(
            client
                .locations_needing_retrieval(&[null_island.clone()], 2024, 2024, Measure::DailySolarRadiationEnergy)
                .await,
            vec!["Null Island".to_string()]
        );

        let outcome = client
            .retrieve()
            .locations(&[null_island.clone()])
            .year_start(2024)
            .year_end(2024)
            .measure(Measure::DailySolarRadiationEnergy)
            .call()
            .await?;
        assert!(outcome.summary.is_complete());
        assert_eq!(outcome.dataset.len(), 366);
        // 24 hourly samples of 0.1 MJ/m².
        assert_eq!(outcome.dataset.rows[0].value, 2.4);

        let cached = client.load_cache(&null_island).await?;
        assert_eq!(cached.cached_dates(Measure::DailySolarRadiationEnergy).len(), 366);
        assert!(client
            .locations_needing_retrieval(&[null_island], 2024, 2024, Measure::DailySolarRadiationEnergy)
            .await
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.retrieval.half_box_deg = -1.0;
        let transport = Arc::new(FakeTransport::default());
        let result = Era5Climate::with_transport(settings, dir.path().to_path_buf(), transport).await;
        assert!(matches!(result, Err(Era5ClimateError::Config(_))));
    }
}
