use crate::schema::error::SchemaError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to create cache directory '{0}'")]
    CacheDirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to read cache file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to write cache file '{0}'")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("Cache file '{0}' is not valid JSON")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("Cache file '{0}' does not match the document layout")]
    Decode(PathBuf, #[source] serde_json::Error),

    #[error("Failed to encode cache document for '{0}'")]
    Encode(String, #[source] serde_json::Error),

    #[error("Cache file '{path}' failed schema checks")]
    Schema {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },

    #[error("Cache file '{path}' belongs to '{found}', expected '{expected}'")]
    PlaceMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
