use polars::error::PolarsError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single request window. Recorded in the summary, never fatal for a run.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Job {job_id} ended in state '{state}': {reason}")]
    Job {
        job_id: String,
        state: String,
        reason: String,
    },

    #[error("Job {job_id} did not finish within {waited:?}")]
    Timeout { job_id: String, waited: Duration },

    #[error("Job {job_id} was dismissed by the service before it finished")]
    Expired { job_id: String },

    #[error("Download of job {job_id} failed after {attempts} attempt(s)")]
    DownloadFailed {
        job_id: String,
        attempts: u32,
        #[source]
        source: Box<RetrievalError>,
    },

    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected response from {url}: {reason}")]
    UnexpectedResponse { url: String, reason: String },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("No CDS credentials found: {0}")]
    Credentials(String),

    #[error("Failed to decode payload '{path}': {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Failed parsing CSV payload '{0}'")]
    CsvDecode(PathBuf, #[source] PolarsError),

    #[cfg(feature = "netcdf")]
    #[error("Failed reading NetCDF payload '{0}'")]
    NetCdf(PathBuf, #[source] netcdf::Error),

    #[error("Failed to read zip payload '{0}'")]
    Zip(PathBuf, #[source] zip::result::ZipError),

    #[error("I/O error on '{0}'")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Data download or decompression failed")]
    DownloadIo(#[from] std::io::Error),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl RetrievalError {
    /// Transport-level failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            RetrievalError::NetworkRequest(..)
            | RetrievalError::Transport(_)
            | RetrievalError::DownloadIo(_) => true,
            RetrievalError::HttpStatus { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RetrievalError::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
