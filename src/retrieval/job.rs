//! Lifecycle of one remote retrieval job.
//!
//! ```text
//! Built -> Submitted -> Queued <-> Running -> Completed -> Downloaded
//! ```
//!
//! Any state may fail. Queued and running jobs may also expire (dismissed by the service)
//! or time out locally.

use serde::Deserialize;
use std::fmt;

/// Status values reported by the CDS job API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Accepted,
    Running,
    Successful,
    Failed,
    Rejected,
    Dismissed,
}

impl RemoteStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "accepted" | "queued" => Some(RemoteStatus::Accepted),
            "running" => Some(RemoteStatus::Running),
            "successful" | "completed" => Some(RemoteStatus::Successful),
            "failed" => Some(RemoteStatus::Failed),
            "rejected" => Some(RemoteStatus::Rejected),
            "dismissed" | "deleted" => Some(RemoteStatus::Dismissed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Built,
    Submitted,
    Queued,
    Running,
    Completed,
    Downloaded,
    Failed(String),
    Expired,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Submit,
    Remote(RemoteStatus),
    Downloaded,
    DeadlineElapsed,
    Fail(String),
}

impl JobState {
    /// Applies `event`. Events that make no sense in the current state fail the job.
    pub fn on(&self, event: JobEvent) -> JobState {
        use JobState::*;
        match (self, event) {
            (_, JobEvent::Fail(reason)) if !self.is_terminal() => Failed(reason),

            (Built, JobEvent::Submit) => Submitted,

            (Submitted | Queued | Running, JobEvent::Remote(status)) => match status {
                RemoteStatus::Accepted => Queued,
                RemoteStatus::Running => Running,
                RemoteStatus::Successful => Completed,
                RemoteStatus::Failed => Failed("job failed on the service".to_string()),
                RemoteStatus::Rejected => Failed("job rejected by the service".to_string()),
                RemoteStatus::Dismissed => Expired,
            },

            (Submitted | Queued | Running, JobEvent::DeadlineElapsed) => Timeout,

            (Completed, JobEvent::Downloaded) => Downloaded,

            (state, event) => Failed(format!("invalid transition: {event:?} in state {state}")),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Downloaded | JobState::Failed(_) | JobState::Expired | JobState::Timeout
        )
    }

    /// Queued or running on the service.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            JobState::Submitted | JobState::Queued | JobState::Running
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Built => write!(f, "built"),
            JobState::Submitted => write!(f, "submitted"),
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Downloaded => write!(f, "downloaded"),
            JobState::Failed(reason) => write!(f, "failed ({reason})"),
            JobState::Expired => write!(f, "expired"),
            JobState::Timeout => write!(f, "timeout"),
        }
    }
}
