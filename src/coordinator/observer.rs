use crate::coordinator::summary::LocationSummary;
use crate::types::request_window::RequestWindow;

/// How one window ended, as reported to a [`RetrievalObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    Fetched,
    Reused,
    Failed,
}

/// Receives progress callbacks from a retrieval run. Every method defaults to doing nothing.
pub trait RetrievalObserver: Send + Sync {
    /// Called once before any location is processed, with the locations that need the service.
    fn retrieval_planned(&self, _locations_needing_retrieval: &[String]) {}

    fn location_started(&self, _location: &str, _index: usize, _total: usize, _windows: usize) {}

    fn window_started(&self, _location: &str, _window: &RequestWindow, _index: usize, _total: usize) {}

    fn window_completed(&self, _location: &str, _window: &RequestWindow, _outcome: WindowOutcome) {}

    fn location_completed(&self, _summary: &LocationSummary) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RetrievalObserver for NoopObserver {}
