use crate::config::ClientSettings;
use crate::retrieval::decode::decode_payload;
use crate::retrieval::error::RetrievalError;
use crate::retrieval::job::{JobEvent, JobState};
use crate::retrieval::raw_cache::RawPayloadCache;
use crate::retrieval::request::{build_request, JobRequest, RequestOptions};
use crate::retrieval::transport::Transport;
use crate::types::location::Location;
use crate::types::mode::DailySource;
use crate::types::raw::GridSeries;
use crate::types::request_window::RequestWindow;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// What one completed job took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: String,
    pub bytes: u64,
    pub polls: u32,
    pub elapsed: Duration,
}

/// A payload on disk, either downloaded now or left by an earlier run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPayload {
    pub path: PathBuf,
    /// `None` when the payload was reused from the raw cache.
    pub job: Option<JobOutcome>,
}

impl FetchedPayload {
    pub fn reused(&self) -> bool {
        self.job.is_none()
    }
}

/// Drives submit, poll and download of CDS jobs over a [`Transport`].
pub struct RetrievalClient {
    transport: Arc<dyn Transport>,
    settings: ClientSettings,
    raw_cache: RawPayloadCache,
    request_options: RequestOptions,
}

fn next_poll_interval(current: Duration, max: Duration) -> Duration {
    current.mul_f64(1.5).min(max)
}

impl RetrievalClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: ClientSettings,
        raw_cache: RawPayloadCache,
        request_options: RequestOptions,
    ) -> Self {
        Self {
            transport,
            settings,
            raw_cache,
            request_options,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn raw_cache(&self) -> &RawPayloadCache {
        &self.raw_cache
    }

    /// Runs one job to completion and writes its payload to `dest`.
    ///
    /// # Errors
    ///
    /// * [`RetrievalError::Job`] when the service fails or rejects the job, or the status
    ///   endpoint failed more than `max_poll_errors` times in a row.
    /// * [`RetrievalError::Expired`] when the service dismissed the job.
    /// * [`RetrievalError::Timeout`] when the job is still pending after `max_wait`.
    /// * [`RetrievalError::DownloadFailed`] when a download fails with a non-transient error, or
    ///   on every attempt.
    pub async fn run(&self, request: &JobRequest, dest: &Path) -> Result<JobOutcome, RetrievalError> {
        let started = Instant::now();
        let mut state = JobState::Built;

        let remote = self.transport.submit(request).await?;
        let job_id = remote.job_id.clone();
        state = state.on(JobEvent::Submit).on(JobEvent::Remote(remote.status));
        let mut message = remote.message;
        info!("Job {} for {} is {}", job_id, request.dataset, state);

        let max_wait = self.settings.max_wait();
        let mut interval = self.settings.poll_interval();
        let mut polls = 0u32;
        let mut consecutive_errors = 0u32;

        while state.is_pending() {
            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                state = state.on(JobEvent::DeadlineElapsed);
                break;
            }
            sleep(interval.min(max_wait - elapsed)).await;
            interval = next_poll_interval(interval, self.settings.max_poll_interval());

            polls += 1;
            match self.transport.status(&job_id).await {
                Ok(remote) => {
                    consecutive_errors = 0;
                    if remote.message.is_some() {
                        message = remote.message;
                    }
                    let next = state.on(JobEvent::Remote(remote.status));
                    if next != state {
                        debug!("Job {} is now {}", job_id, next);
                    }
                    state = next;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        "Status check {} of job {} failed ({}/{}): {}",
                        polls, job_id, consecutive_errors, self.settings.max_poll_errors, e
                    );
                    if consecutive_errors > self.settings.max_poll_errors {
                        state = state.on(JobEvent::Fail(format!(
                            "{consecutive_errors} consecutive status errors, last: {e}"
                        )));
                    }
                }
            }
        }

        match state {
            JobState::Completed => {}
            JobState::Timeout => {
                return Err(RetrievalError::Timeout {
                    job_id,
                    waited: started.elapsed(),
                })
            }
            JobState::Expired => return Err(RetrievalError::Expired { job_id }),
            JobState::Failed(reason) => {
                return Err(RetrievalError::Job {
                    job_id,
                    state: "failed".to_string(),
                    reason: message.unwrap_or(reason),
                })
            }
            other => {
                return Err(RetrievalError::Job {
                    job_id,
                    state: other.to_string(),
                    reason: "job stopped before completion".to_string(),
                })
            }
        }

        let bytes = self.download_with_retries(&job_id, dest).await?;
        state = state.on(JobEvent::Downloaded);
        debug!("Job {} is {}", job_id, state);

        Ok(JobOutcome {
            job_id,
            bytes,
            polls,
            elapsed: started.elapsed(),
        })
    }

    async fn download_with_retries(&self, job_id: &str, dest: &Path) -> Result<u64, RetrievalError> {
        let attempts = self.settings.download_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.download(job_id, dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < attempts && e.is_transient() => {
                    warn!(
                        "Download of job {} failed (attempt {}/{}): {}; retrying in {:?}",
                        job_id,
                        attempt,
                        attempts,
                        e,
                        self.settings.retry_delay()
                    );
                    sleep(self.settings.retry_delay()).await;
                }
                Err(e) => {
                    return Err(RetrievalError::DownloadFailed {
                        job_id: job_id.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    })
                }
            }
        }
    }

    /// Makes the payload for `window` available on disk, reusing an earlier download.
    pub async fn fetch(
        &self,
        location: &Location,
        window: &RequestWindow,
        source: DailySource,
    ) -> Result<FetchedPayload, RetrievalError> {
        let request = build_request(location, window, &self.request_options, source);
        let path = self.raw_cache.path_for(location, window, source, &request);
        if let Some(path) = self.raw_cache.existing(&path).await {
            info!("Using downloaded payload {} for {}", path.display(), window);
            return Ok(FetchedPayload { path, job: None });
        }

        self.raw_cache
            .ensure_dir()
            .await
            .map_err(|e| RetrievalError::Io(self.raw_cache.dir().to_path_buf(), e))?;
        info!("Requesting {} for {} from {}", window, location.name, request.dataset);
        let outcome = self.run(&request, &path).await?;
        info!(
            "Job {} finished in {:?} after {} poll(s), {} bytes",
            outcome.job_id, outcome.elapsed, outcome.polls, outcome.bytes
        );
        Ok(FetchedPayload {
            path,
            job: Some(outcome),
        })
    }

    /// [`RetrievalClient::fetch`] followed by decoding the nearest grid cell.
    pub async fn fetch_series(
        &self,
        location: &Location,
        window: &RequestWindow,
        source: DailySource,
    ) -> Result<(GridSeries, FetchedPayload), RetrievalError> {
        let payload = self.fetch(location, window, source).await?;
        let series = decode_payload(&payload.path, window.measure, location).await?;
        Ok((series, payload))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::retrieval::job::RemoteStatus;
    use crate::retrieval::transport::RemoteJob;
    use crate::types::measure::Measure;
    use crate::types::mode::ChunkMode;
    use crate::utils::write_atomic;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted service. Status calls pop from `statuses`; once empty, jobs report success.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub statuses: Mutex<VecDeque<Result<RemoteStatus, String>>>,
        pub download_failures: Mutex<u32>,
        /// Downloads answer with a response that no retry can fix.
        pub download_rejected: bool,
        pub payload: Vec<u8>,
        pub submitted: Mutex<Vec<JobRequest>>,
        pub status_calls: Mutex<u32>,
        pub download_calls: Mutex<u32>,
    }

    impl FakeTransport {
        pub(crate) fn with_payload(payload: impl Into<Vec<u8>>) -> Self {
            Self {
                payload: payload.into(),
                ..Self::default()
            }
        }

        pub(crate) fn script(self, statuses: Vec<Result<RemoteStatus, String>>) -> Self {
            *self.statuses.lock().unwrap() = statuses.into();
            self
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn submit(&self, request: &JobRequest) -> Result<RemoteJob, RetrievalError> {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(request.clone());
            Ok(RemoteJob {
                job_id: format!("job-{}", submitted.len()),
                status: RemoteStatus::Accepted,
                message: None,
            })
        }

        async fn status(&self, job_id: &str) -> Result<RemoteJob, RetrievalError> {
            *self.status_calls.lock().unwrap() += 1;
            let next = self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(RemoteStatus::Successful));
            match next {
                Ok(status) => Ok(RemoteJob {
                    job_id: job_id.to_string(),
                    status,
                    message: None,
                }),
                Err(reason) => Err(RetrievalError::Transport(reason)),
            }
        }

        async fn download(&self, job_id: &str, dest: &Path) -> Result<u64, RetrievalError> {
            *self.download_calls.lock().unwrap() += 1;
            if self.download_rejected {
                return Err(RetrievalError::UnexpectedResponse {
                    url: format!("https://cds.example/jobs/{job_id}/results"),
                    reason: "404 Not Found".into(),
                });
            }
            {
                let mut failures = self.download_failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(RetrievalError::Transport("connection reset".into()));
                }
            }
            write_atomic(dest, &self.payload).map_err(|e| RetrievalError::Io(dest.to_path_buf(), e))?;
            Ok(self.payload.len() as u64)
        }
    }

    fn settings() -> ClientSettings {
        ClientSettings {
            poll_interval_secs: 2,
            max_poll_interval_secs: 10,
            max_wait_secs: 60,
            max_poll_errors: 2,
            download_retries: 2,
            retry_delay_secs: 5,
            ..ClientSettings::default()
        }
    }

    fn client(transport: Arc<FakeTransport>, dir: &Path) -> RetrievalClient {
        RetrievalClient::new(transport, settings(), RawPayloadCache::new(dir), request_options())
    }

    fn request_options() -> RequestOptions {
        RequestOptions {
            half_box_deg: 0.25,
            noon_tolerance: chrono::TimeDelta::minutes(30),
        }
    }

    fn request() -> JobRequest {
        let location = Location::with_timezone("Oslo", 59.91, 10.75, "Europe/Oslo").unwrap();
        let window = RequestWindow::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            Measure::NoonTemperature,
            ChunkMode::Monthly,
        )
        .unwrap();
        build_request(&location, &window, &request_options(), DailySource::Timeseries)
    }

    #[test]
    fn poll_interval_backs_off_to_cap() {
        let max = Duration::from_secs(10);
        let mut interval = Duration::from_secs(2);
        let mut seen = Vec::new();
        for _ in 0..6 {
            interval = next_poll_interval(interval, max);
            seen.push(interval.as_secs_f64());
        }
        assert_eq!(seen, vec![3.0, 4.5, 6.75, 10.0, 10.0, 10.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn completes_and_downloads() -> Result<(), RetrievalError> {
        let dir = tempfile::tempdir()?;
        let transport = Arc::new(
            FakeTransport::with_payload("valid_time,t2m\n").script(vec![
                Ok(RemoteStatus::Accepted),
                Ok(RemoteStatus::Running),
                Ok(RemoteStatus::Successful),
            ]),
        );
        let client = client(transport.clone(), dir.path());
        let dest = dir.path().join("out.csv");
        let outcome = client.run(&request(), &dest).await?;

        assert_eq!(outcome.job_id, "job-1");
        assert_eq!(outcome.polls, 3);
        assert_eq!(outcome.bytes, 15);
        assert_eq!(std::fs::read(&dest)?, b"valid_time,t2m\n");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_max_wait() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            FakeTransport::with_payload("x").script(vec![Ok(RemoteStatus::Running); 100]),
        );
        let client = client(transport.clone(), dir.path());
        let err = client
            .run(&request(), &dir.path().join("out.csv"))
            .await
            .unwrap_err();
        match err {
            RetrievalError::Timeout { waited, .. } => {
                assert!(waited >= Duration::from_secs(60) && waited < Duration::from_secs(61))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(*transport.download_calls.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_and_dismissal() {
        let dir = tempfile::tempdir().unwrap();
        let failed = Arc::new(FakeTransport::with_payload("x").script(vec![Ok(RemoteStatus::Failed)]));
        let err = client(failed, dir.path())
            .run(&request(), &dir.path().join("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Job { .. }));

        let dismissed =
            Arc::new(FakeTransport::with_payload("x").script(vec![Ok(RemoteStatus::Dismissed)]));
        let err = client(dismissed, dir.path())
            .run(&request(), &dir.path().join("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Expired { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn tolerates_bounded_status_errors() {
        let dir = tempfile::tempdir().unwrap();
        let flaky = Arc::new(FakeTransport::with_payload("x").script(vec![
            Err("502".into()),
            Err("502".into()),
            Ok(RemoteStatus::Running),
            Err("502".into()),
            Ok(RemoteStatus::Successful),
        ]));
        client(flaky, dir.path())
            .run(&request(), &dir.path().join("ok"))
            .await
            .unwrap();

        let broken = Arc::new(FakeTransport::with_payload("x").script(vec![Err("down".into()); 3]));
        let err = client(broken.clone(), dir.path())
            .run(&request(), &dir.path().join("fail"))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Job { ref reason, .. } if reason.contains("3 consecutive")));
        assert_eq!(*broken.status_calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn download_retries_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let recovering = Arc::new(FakeTransport::with_payload("x"));
        *recovering.download_failures.lock().unwrap() = 2;
        client(recovering.clone(), dir.path())
            .run(&request(), &dir.path().join("ok"))
            .await
            .unwrap();
        assert_eq!(*recovering.download_calls.lock().unwrap(), 3);

        let failing = Arc::new(FakeTransport::with_payload("x"));
        *failing.download_failures.lock().unwrap() = 10;
        let err = client(failing.clone(), dir.path())
            .run(&request(), &dir.path().join("fail"))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::DownloadFailed { attempts: 3, .. }));
        assert_eq!(*failing.download_calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_download_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport {
            download_rejected: true,
            ..FakeTransport::with_payload("x")
        });
        let started = Instant::now();
        let err = client(transport.clone(), dir.path())
            .run(&request(), &dir.path().join("missing"))
            .await
            .unwrap_err();
        match err {
            RetrievalError::DownloadFailed { attempts, source, .. } => {
                assert_eq!(attempts, 1);
                assert!(!source.is_transient());
            }
            other => panic!("expected download failure, got {other:?}"),
        }
        assert_eq!(*transport.download_calls.lock().unwrap(), 1);
        assert!(started.elapsed() < settings().retry_delay());
    }

    #[test]
    fn transient_errors() {
        assert!(RetrievalError::Transport("connection reset".into()).is_transient());
        assert!(!RetrievalError::decode("payload.nc", "no variable 'tp'").is_transient());
        assert!(!RetrievalError::UnexpectedResponse {
            url: "https://cds.example".into(),
            reason: "404 Not Found".into(),
        }
        .is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_reuses_existing_payload() -> Result<(), RetrievalError> {
        let dir = tempfile::tempdir()?;
        let transport = Arc::new(FakeTransport::with_payload(
            "valid_time,t2m\n2024-03-01 12:00:00,280.15\n",
        ));
        let client = client(transport.clone(), dir.path());
        let location = Location::with_timezone("Oslo", 59.91, 10.75, "Europe/Oslo").unwrap();
        let window = RequestWindow::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            Measure::NoonTemperature,
            ChunkMode::Monthly,
        )
        .unwrap();

        let (series, first) = client.fetch_series(&location, &window, DailySource::Timeseries).await?;
        assert!(!first.reused());
        assert_eq!(series.samples.len(), 1);
        assert!((series.samples[0].value - 7.0).abs() < 1e-9);

        let second = client.fetch(&location, &window, DailySource::Timeseries).await?;
        assert!(second.reused());
        assert_eq!(second.path, first.path);
        assert_eq!(transport.submitted.lock().unwrap().len(), 1);
        Ok(())
    }
}
