use crate::retrieval::request::JobRequest;
use crate::types::location::Location;
use crate::types::mode::DailySource;
use crate::types::request_window::RequestWindow;
use crate::utils::{ensure_cache_dir_exists, safe_file_stem};
use log::debug;
use std::path::{Path, PathBuf};

/// Downloaded payloads on disk, one file per (location, measure, source, window).
#[derive(Debug, Clone)]
pub struct RawPayloadCache {
    dir: PathBuf,
}

impl RawPayloadCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// e.g. `era5_t2m_Boulder_timeseries_20240101_20240131.csv`
    pub fn path_for(
        &self,
        location: &Location,
        window: &RequestWindow,
        source: DailySource,
        request: &JobRequest,
    ) -> PathBuf {
        let name = format!(
            "{}_{}_{}_{}_{}.{}",
            window.measure.raw_file_prefix(),
            safe_file_stem(&location.name),
            source,
            window.start_date().format("%Y%m%d"),
            window.end_date().format("%Y%m%d"),
            request.format.extension()
        );
        self.dir.join(name)
    }

    /// The payload at `path` if a previous run left a non-empty file there.
    pub async fn existing(&self, path: &Path) -> Option<PathBuf> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                debug!("Reusing downloaded payload {}", path.display());
                Some(path.to_path_buf())
            }
            _ => None,
        }
    }

    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        ensure_cache_dir_exists(&self.dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::request::{build_request, RequestOptions};
    use crate::types::measure::Measure;
    use crate::types::mode::ChunkMode;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn names_and_reuses_payloads() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let cache = RawPayloadCache::new(dir.path().join("raw"));
        let location = Location::with_timezone("São Paulo", -23.55, -46.63, "America/Sao_Paulo").unwrap();
        let window = RequestWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            Measure::DailyPrecipitation,
            ChunkMode::Monthly,
        )
        .unwrap();
        let request = build_request(
            &location,
            &window,
            &RequestOptions {
                half_box_deg: 0.25,
                noon_tolerance: chrono::TimeDelta::minutes(30),
            },
            DailySource::Hourly,
        );
        let path = cache.path_for(&location, &window, DailySource::Hourly, &request);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("era5_tp_S_o_Paulo_"));
        assert!(name.ends_with("_hourly_20240101_20240131.nc"));

        assert!(cache.existing(&path).await.is_none());
        cache.ensure_dir().await?;
        std::fs::write(&path, b"")?;
        assert!(cache.existing(&path).await.is_none());
        std::fs::write(&path, b"payload")?;
        assert_eq!(cache.existing(&path).await, Some(path.clone()));
        Ok(())
    }
}
