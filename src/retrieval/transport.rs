//! The seam between the job protocol and the service that runs jobs.

use crate::retrieval::credentials::Credentials;
use crate::retrieval::error::RetrievalError;
use crate::retrieval::job::RemoteStatus;
use crate::retrieval::request::JobRequest;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// A job as last reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJob {
    pub job_id: String,
    pub status: RemoteStatus,
    /// Human readable detail, mostly set on failures.
    pub message: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn submit(&self, request: &JobRequest) -> Result<RemoteJob, RetrievalError>;

    async fn status(&self, job_id: &str) -> Result<RemoteJob, RetrievalError>;

    /// Writes the result payload of a finished job to `dest`, returning its size in bytes.
    async fn download(&self, job_id: &str, dest: &Path) -> Result<u64, RetrievalError>;
}

/// The CDS retrieve API (`/retrieve/v1`).
pub struct CdsTransport {
    credentials: Credentials,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    #[serde(rename = "jobID")]
    job_id: String,
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse {
    asset: Asset,
}

#[derive(Debug, Deserialize)]
struct Asset {
    value: AssetValue,
}

#[derive(Debug, Deserialize)]
struct AssetValue {
    href: String,
}

impl CdsTransport {
    pub fn new(credentials: Credentials, request_timeout: Duration) -> Result<Self, RetrievalError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RetrievalError::NetworkRequest(credentials.url.clone(), e))?;
        Ok(Self { credentials, http })
    }

    fn retrieve_url(&self, tail: &str) -> String {
        format!("{}/retrieve/v1/{}", self.credentials.url, tail)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("PRIVATE-TOKEN", &self.credentials.key)
    }

    async fn send(&self, url: &str, builder: RequestBuilder) -> Result<Response, RetrievalError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| RetrievalError::NetworkRequest(url.to_string(), e))?;

        match response.error_for_status() {
            Ok(resp) => Ok(resp),
            Err(e) => {
                warn!("HTTP error for {}: {:?}", url, e);
                Err(if let Some(status) = e.status() {
                    RetrievalError::HttpStatus {
                        url: url.to_string(),
                        status,
                        source: e,
                    }
                } else {
                    RetrievalError::NetworkRequest(url.to_string(), e)
                })
            }
        }
    }

    async fn job_from(url: &str, response: Response) -> Result<RemoteJob, RetrievalError> {
        let body: JobResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::NetworkRequest(url.to_string(), e))?;
        let status = RemoteStatus::parse(&body.status).ok_or_else(|| {
            RetrievalError::UnexpectedResponse {
                url: url.to_string(),
                reason: format!("unknown job status '{}'", body.status),
            }
        })?;
        Ok(RemoteJob {
            job_id: body.job_id,
            status,
            message: body.message,
        })
    }
}

#[async_trait]
impl Transport for CdsTransport {
    async fn submit(&self, request: &JobRequest) -> Result<RemoteJob, RetrievalError> {
        let url = self.retrieve_url(&format!("processes/{}/execution", request.dataset));
        info!("Submitting {} job", request.dataset);
        debug!("Request inputs: {}", request.inputs);
        let builder = self
            .http
            .post(&url)
            .json(&json!({ "inputs": request.inputs }));
        let response = self.send(&url, builder).await?;
        Self::job_from(&url, response).await
    }

    async fn status(&self, job_id: &str) -> Result<RemoteJob, RetrievalError> {
        let url = self.retrieve_url(&format!("jobs/{job_id}"));
        let response = self.send(&url, self.http.get(&url)).await?;
        Self::job_from(&url, response).await
    }

    async fn download(&self, job_id: &str, dest: &Path) -> Result<u64, RetrievalError> {
        let results_url = self.retrieve_url(&format!("jobs/{job_id}/results"));
        let response = self.send(&results_url, self.http.get(&results_url)).await?;
        let results: ResultsResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::NetworkRequest(results_url.clone(), e))?;
        let href = results.asset.value.href;

        info!("Downloading results of job {} from {}", job_id, href);
        let response = self.send(&href, self.http.get(&href)).await?;
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let mut reader = StreamReader::new(stream);

        let dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = NamedTempFile::new_in(dir).map_err(|e| RetrievalError::Io(dir.to_path_buf(), e))?;
        let std_file = tmp
            .reopen()
            .map_err(|e| RetrievalError::Io(tmp.path().to_path_buf(), e))?;
        let mut file = tokio::fs::File::from_std(std_file);
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tmp.persist(dest)
            .map_err(|e| RetrievalError::Io(dest.to_path_buf(), e.error))?;
        info!("Saved {} bytes for job {} to {}", written, job_id, dest.display());
        Ok(written)
    }
}
