//! Job record and its lifecycle state machine.
//!
//! `Pending -> Running -> {Done, Error}`. Terminal states are absorbing:
//! every transition method is a no-op on a terminal job and returns `false`
//! so callers can tell a late signal from an applied one.

use serde::Serialize;

use crate::generation::GenerationRequest;
use crate::types::{JobId, Timestamp};

/// Highest progress value a job may report before it is `Done`.
pub const MAX_RUNNING_PROGRESS: u8 = 99;

/// Message used when the backend claims success but nothing materialized.
pub const NO_OUTPUT_MESSAGE: &str = "Backend reported completion but produced no output";

/// Lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// One materialized backend output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// File name as reported by the backend.
    pub filename: String,
    /// Backend subfolder the file lives in (often empty).
    pub subfolder: String,
    /// Backend storage category (`output`, `temp`, ...).
    pub category: String,
    /// Where the bytes were written locally.
    pub local_path: String,
    /// Public URL the caller can fetch the file from.
    pub url: String,
}

/// A generation job tracked in memory for the lifetime of the process.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub artifacts: Vec<Artifact>,
    pub error: Option<String>,
    pub request: GenerationRequest,
    /// Backend prompt id, known once submission succeeded.
    pub backend_ref: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub terminal_at: Option<Timestamp>,
}

impl Job {
    /// A fresh `Pending` job.
    pub fn new(id: JobId, request: GenerationRequest) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0,
            artifacts: Vec::new(),
            error: None,
            request,
            backend_ref: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            terminal_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Pending -> Running`.
    pub fn mark_running(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(chrono::Utc::now());
        true
    }

    /// Record the backend reference returned by a successful submission.
    pub fn set_backend_ref(&mut self, backend_ref: &str) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.backend_ref = Some(backend_ref.to_string());
        true
    }

    /// Apply a progress reading.
    ///
    /// Only accepted while `Running` and only when it advances the stored
    /// value. The value is capped at [`MAX_RUNNING_PROGRESS`]; 100 is
    /// reserved for `Done`.
    pub fn apply_progress(&mut self, percent: u8) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        let capped = percent.min(MAX_RUNNING_PROGRESS);
        if capped <= self.progress {
            return false;
        }
        self.progress = capped;
        true
    }

    /// `Running -> Done` with at least one artifact.
    ///
    /// An empty artifact list is converted into a failure carrying
    /// [`NO_OUTPUT_MESSAGE`], so a terminal job always has exactly one of
    /// artifacts or an error.
    pub fn complete(&mut self, artifacts: Vec<Artifact>) -> bool {
        if self.is_terminal() {
            return false;
        }
        if artifacts.is_empty() {
            return self.fail(NO_OUTPUT_MESSAGE);
        }
        self.status = JobStatus::Done;
        self.progress = 100;
        self.artifacts = artifacts;
        self.error = None;
        self.terminal_at = Some(chrono::Utc::now());
        true
    }

    /// Any non-terminal state `-> Error`.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let message = message.into();
        self.status = JobStatus::Error;
        self.error = Some(if message.trim().is_empty() {
            "Unknown error".to_string()
        } else {
            message
        });
        self.artifacts.clear();
        self.terminal_at = Some(chrono::Utc::now());
        true
    }
}

// ---------------------------------------------------------------------------
// Consumer-facing projection
// ---------------------------------------------------------------------------

/// Read-only view of a job returned by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    /// Present only once the job is `Done`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Artifact>>,
    pub created_at: Timestamp,
    pub terminal_at: Option<Timestamp>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            error: job.error.clone(),
            artifacts: (job.status == JobStatus::Done).then(|| job.artifacts.clone()),
            created_at: job.created_at,
            terminal_at: job.terminal_at,
        }
    }
}
