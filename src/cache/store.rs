use crate::cache::codec;
use crate::cache::document::CacheDocument;
use crate::cache::error::CacheError;
use crate::schema::registry::SchemaRegistry;
use crate::types::location::Location;
use crate::utils::{ensure_cache_dir_exists, safe_file_stem, write_atomic};
use log::{debug, info};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{fs, task};

/// Reads and writes per-location cache documents in one directory.
///
/// Every load validates the file against its declared schema version and migrates it forward;
/// every save writes the current version through an atomic replace.
#[derive(Debug, Clone)]
pub struct CacheStore {
    data_cache_dir: PathBuf,
    registry: Arc<SchemaRegistry>,
}

impl CacheStore {
    pub fn new(data_cache_dir: impl Into<PathBuf>, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            data_cache_dir: data_cache_dir.into(),
            registry,
        }
    }

    /// Deterministic cache file path for a location name.
    pub fn path_for(location_name: &str, data_cache_dir: &Path) -> PathBuf {
        data_cache_dir.join(format!("{}.json", safe_file_stem(location_name)))
    }

    pub fn data_cache_dir(&self) -> &Path {
        &self.data_cache_dir
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn document_path(&self, location_name: &str) -> PathBuf {
        Self::path_for(location_name, &self.data_cache_dir)
    }

    /// Loads the cache document of `location`, migrating it to the current schema.
    ///
    /// Returns an empty current-version document when no file exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Schema`] if the file is unversioned, too new, or invalid, and
    /// [`CacheError::PlaceMismatch`] if it belongs to a different location.
    pub async fn load(&self, location: &Location) -> Result<CacheDocument, CacheError> {
        let path = self.document_path(&location.name);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(
                    "No cache file for {} at {:?}; starting empty",
                    location.name, path
                );
                return Ok(CacheDocument::new(
                    location,
                    self.registry.current_version(),
                ));
            }
            Err(e) => return Err(CacheError::Read(path, e)),
        };

        let registry = Arc::clone(&self.registry);
        let path_clone = path.clone();
        let document =
            task::spawn_blocking(move || decode_document(&registry, &path_clone, &text)).await??;

        if document.place.name != location.name {
            return Err(CacheError::PlaceMismatch {
                path,
                expected: location.name.clone(),
                found: document.place.name,
            });
        }
        Ok(document)
    }

    /// Writes `document` at the current schema version, atomically replacing any existing file.
    pub async fn save(&self, document: &CacheDocument) -> Result<PathBuf, CacheError> {
        let version = self.registry.current_version();
        let path = self.document_path(&document.place.name);
        let text = codec::encode(document, version)
            .map_err(|e| CacheError::Encode(document.place.name.clone(), e))?;

        let encoded = codec::decode(&text).map_err(|e| CacheError::Parse(path.clone(), e))?;
        self.registry
            .validate(&encoded, version)
            .map_err(|source| CacheError::Schema {
                path: path.clone(),
                source,
            })?;

        ensure_cache_dir_exists(&self.data_cache_dir)
            .await
            .map_err(|e| CacheError::CacheDirCreation(self.data_cache_dir.clone(), e))?;

        let target = path.clone();
        task::spawn_blocking(move || {
            write_atomic(&target, text.as_bytes()).map_err(|e| CacheError::Write(target, e))
        })
        .await??;
        debug!("Saved cache for {} to {:?}", document.place.name, path);
        Ok(path)
    }
}

fn decode_document(
    registry: &SchemaRegistry,
    path: &Path,
    text: &str,
) -> Result<CacheDocument, CacheError> {
    let schema_err = |source| CacheError::Schema {
        path: path.to_path_buf(),
        source,
    };
    let raw = codec::decode(text).map_err(|e| CacheError::Parse(path.to_path_buf(), e))?;
    let declared = SchemaRegistry::detect_version(&raw).map_err(schema_err)?;
    let migrated = registry.migrate(&raw).map_err(schema_err)?;
    if declared < registry.current_version() {
        info!(
            "Migrated cache file {:?} from schema {} to {}",
            path,
            declared,
            registry.current_version()
        );
    }
    serde_json::from_value(migrated).map_err(|e| CacheError::Decode(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::error::SchemaError;
    use crate::types::measure::Measure;
    use chrono::NaiveDate;
    use serde_json::json;

    fn store(dir: &Path) -> CacheStore {
        CacheStore::new(dir, Arc::new(SchemaRegistry::load_registry().unwrap()))
    }

    fn austin() -> Location {
        Location::with_timezone("Austin, TX", 30.27, -97.74, "America/Chicago").unwrap()
    }

    #[tokio::test]
    async fn missing_file_yields_empty_current_document() -> Result<(), CacheError> {
        let dir = tempfile::tempdir().unwrap();
        let doc = store(dir.path()).load(&austin()).await?;
        assert_eq!(doc.schema_version, 2);
        assert_eq!(doc.value_count(), 0);
        assert_eq!(doc.place.timezone, "America/Chicago");
        Ok(())
    }

    #[tokio::test]
    async fn save_then_load_round_trips() -> Result<(), CacheError> {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut doc = store.load(&austin()).await?;
        doc.ensure_variable_metadata(Measure::DailyPrecipitation);
        let date = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();
        doc.insert("daily_precip_mm", date, 4.256);
        doc.insert("wet_hours_per_day", date, 2.0);

        let path = store.save(&doc).await?;
        assert_eq!(path, CacheStore::path_for("Austin, TX", dir.path()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let loaded = store.load(&austin()).await?;
        assert_eq!(loaded.get("daily_precip_mm", date), Some(4.26));
        assert_eq!(loaded.get("wet_hours_per_day", date), Some(2.0));
        assert_eq!(loaded.variables, doc.variables);
        Ok(())
    }

    #[tokio::test]
    async fn v1_file_is_migrated_on_load_and_rewritten_as_current() -> Result<(), CacheError> {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let path = store.document_path("Austin, TX");
        let legacy = json!({
            "schema_version": 1,
            "place": {"name": "Austin, TX", "lat": 30.27, "lon": -97.74,
                      "timezone": "America/Chicago", "grid_lat": 30.25, "grid_lon": -97.75},
            "temp_map_v1": {"2020": {"7": {"4": 35.1}}}
        });
        std::fs::write(&path, legacy.to_string()).unwrap();

        let doc = store.load(&austin()).await?;
        let date = NaiveDate::from_ymd_opt(2020, 7, 4).unwrap();
        assert_eq!(doc.schema_version, 2);
        assert_eq!(doc.get("noon_temp_C", date), Some(35.1));
        assert_eq!(doc.place.grid_lon, Some(-97.75));

        store.save(&doc).await?;
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["schema_version"], 2);
        Ok(())
    }

    #[tokio::test]
    async fn unversioned_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        std::fs::write(
            store.document_path("Austin, TX"),
            r#"{"place": {"name": "Austin, TX"}, "noon_temperatures": {}}"#,
        )
        .unwrap();
        let err = store.load(&austin()).await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::Schema {
                source: SchemaError::Legacy,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn yaml_cache_files_are_not_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let yaml = "schema_version: 2\nplace:\n  name: Austin, TX\n";
        std::fs::write(store.document_path("Austin, TX").with_extension("yaml"), yaml).unwrap();
        let doc = store.load(&austin()).await.unwrap();
        assert_eq!(doc.value_count(), 0);

        std::fs::write(store.document_path("Austin, TX"), yaml).unwrap();
        assert!(matches!(
            store.load(&austin()).await,
            Err(CacheError::Parse(..))
        ));
    }

    #[tokio::test]
    async fn foreign_place_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let other = Location::with_timezone("Elsewhere", 1.0, 1.0, "UTC").unwrap();
        let doc = CacheDocument::new(&other, 2);
        let text = codec::encode(&doc, 2).unwrap();
        std::fs::write(store.document_path("Austin, TX"), text).unwrap();

        assert!(matches!(
            store.load(&austin()).await,
            Err(CacheError::PlaceMismatch { .. })
        ));
    }
}
