//! Drives one generation job from submission to a terminal state.
//!
//! After the workflow is queued, two producers feed one consumer loop: the
//! push channel (events classified as they arrive) and, once the push window
//! has passed or the push channel is gone, a status poll. The first
//! terminal classification from either side wins and the other side is
//! dropped. A terminal job is never touched again, so a late signal is a
//! no-op under the registry lock.
//!
//! Every backend call is bounded: the push handshake by the connect
//! timeout, everything else by the request timeout, and status polls also
//! by the overall deadline.

use std::sync::Arc;

use futures::StreamExt;
use tokio::time::{Instant, MissedTickBehavior};
use vprompt_comfyui::backend::{BackendError, EventStream, GenerationBackend};
use vprompt_comfyui::detector::{classify_event, classify_snapshot, Classification, Outcome};
use vprompt_comfyui::history::{OutputDescriptor, StatusSnapshot};
use vprompt_comfyui::messages::BackendEvent;
use vprompt_core::registry::JobRegistry;
use vprompt_core::timing::RunnerTiming;
use vprompt_core::types::JobId;

use super::artifacts::ArtifactStore;

/// How waiting for the backend ended.
#[derive(Debug)]
enum WaitOutcome {
    /// Backend reported success. Carries outputs when a status poll
    /// produced the signal.
    Succeeded(Option<Vec<OutputDescriptor>>),
    Failed(String),
    TimedOut,
}

/// Runs jobs against one backend. Shared by every job task.
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    backend: Arc<dyn GenerationBackend>,
    store: ArtifactStore,
    timing: RunnerTiming,
}

impl JobRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        backend: Arc<dyn GenerationBackend>,
        store: ArtifactStore,
        timing: RunnerTiming,
    ) -> Self {
        Self {
            registry,
            backend,
            store,
            timing,
        }
    }

    /// Run `job_id` to completion. Every exit path leaves the job terminal.
    pub async fn run(&self, job_id: JobId) {
        let Some(job) = self.registry.get(job_id) else {
            tracing::warn!(job_id = %job_id, "Runner started for unknown job");
            return;
        };
        if self.registry.update(job_id, |j| j.mark_running()) != Some(true) {
            tracing::warn!(job_id = %job_id, status = ?job.status, "Job is not pending, runner exits");
            return;
        }

        let client_id = uuid::Uuid::new_v4().to_string();

        // Subscribe before submitting so no event for the prompt is missed.
        let connect_timeout = self.timing.connect_timeout;
        let connected = tokio::time::timeout(
            connect_timeout,
            self.backend.open_event_stream(&client_id),
        )
        .await
        .unwrap_or_else(|_| {
            Err(BackendError::Connection(format!(
                "handshake timed out after {}s",
                connect_timeout.as_secs()
            )))
        });
        let events = match connected {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    "Push channel unavailable, falling back to polling",
                );
                None
            }
        };

        let request_timeout = self.timing.request_timeout;
        let submitted = tokio::time::timeout(
            request_timeout,
            self.backend.submit(&job.request.workflow, &client_id),
        )
        .await
        .unwrap_or_else(|_| {
            Err(BackendError::Submission(format!(
                "no response within {}s",
                request_timeout.as_secs()
            )))
        });
        let backend_ref = match submitted {
            Ok(backend_ref) => backend_ref,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to submit workflow");
                self.fail(job_id, format!("Submission failed: {e}"));
                return;
            }
        };
        self.registry
            .update(job_id, |j| j.set_backend_ref(&backend_ref));
        tracing::info!(
            job_id = %job_id,
            prompt_id = %backend_ref,
            kind = job.request.kind.as_str(),
            seed = job.request.seed,
            "Workflow submitted",
        );

        match self.await_terminal(job_id, &backend_ref, events).await {
            WaitOutcome::Succeeded(outputs) => {
                let outputs = self.settle_outputs(job_id, &backend_ref, outputs).await;
                let artifacts = self
                    .store
                    .materialize(
                        self.backend.as_ref(),
                        job_id,
                        &outputs,
                        self.timing.request_timeout,
                    )
                    .await;
                let stored = artifacts.len();
                self.registry.update(job_id, |j| j.complete(artifacts));
                tracing::info!(
                    job_id = %job_id,
                    prompt_id = %backend_ref,
                    outputs = outputs.len(),
                    stored,
                    "Generation finished",
                );
            }
            WaitOutcome::Failed(message) => {
                tracing::warn!(job_id = %job_id, prompt_id = %backend_ref, error = %message, "Backend reported failure");
                self.fail(job_id, message);
            }
            WaitOutcome::TimedOut => {
                let secs = self.timing.overall_deadline().as_secs();
                tracing::warn!(job_id = %job_id, prompt_id = %backend_ref, timeout_secs = secs, "Generation timed out");
                self.fail(job_id, format!("Timed out after {secs}s waiting for the backend"));
            }
        }
    }

    /// Race the push channel against status polling until a terminal
    /// classification or the overall deadline.
    async fn await_terminal(
        &self,
        job_id: JobId,
        backend_ref: &str,
        mut events: Option<EventStream>,
    ) -> WaitOutcome {
        let submitted = Instant::now();
        let deadline_at = submitted + self.timing.overall_deadline();
        let deadline = tokio::time::sleep_until(deadline_at);
        tokio::pin!(deadline);

        let poll_start = if events.is_some() {
            submitted + self.timing.push_window
        } else {
            submitted
        };
        let mut poll = poll_ticker(poll_start, &self.timing);

        loop {
            tokio::select! {
                biased;

                () = &mut deadline => return WaitOutcome::TimedOut,

                event = next_event(&mut events), if events.is_some() => match event {
                    Some(event) => {
                        if let Some(outcome) = self.on_classification(job_id, classify_event(&event, backend_ref)) {
                            tracing::debug!(job_id = %job_id, kind = %event.kind, "Terminal push event");
                            return outcome;
                        }
                    }
                    None => {
                        tracing::info!(job_id = %job_id, "Push channel closed, polling for status");
                        events = None;
                        if poll_start > Instant::now() {
                            poll = poll_ticker(Instant::now(), &self.timing);
                        }
                    }
                },

                // The fetch is awaited inside the branch, so it carries the
                // deadline itself.
                _ = poll.tick() => match self.fetch_status(backend_ref, Some(deadline_at)).await {
                    Ok(snapshot) => {
                        let classification = classify_snapshot(&snapshot);
                        if let Classification::Terminal(Outcome::Success) = classification {
                            tracing::debug!(job_id = %job_id, outputs = snapshot.outputs.len(), "Status poll reports completion");
                            return WaitOutcome::Succeeded(Some(snapshot.outputs));
                        }
                        if let Some(outcome) = self.on_classification(job_id, classification) {
                            return outcome;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(job_id = %job_id, error = %e, "Status poll failed, retrying");
                    }
                },
            }
        }
    }

    /// Apply progress; turn terminal classifications into an outcome.
    fn on_classification(&self, job_id: JobId, classification: Classification) -> Option<WaitOutcome> {
        match classification {
            Classification::Progress(percent) => {
                if self.registry.update(job_id, |j| j.apply_progress(percent)) == Some(true) {
                    tracing::debug!(job_id = %job_id, progress = percent, "Progress updated");
                }
                None
            }
            Classification::Terminal(Outcome::Success) => Some(WaitOutcome::Succeeded(None)),
            Classification::Terminal(Outcome::Failure(message)) => Some(WaitOutcome::Failed(message)),
            Classification::Ignore => None,
        }
    }

    /// Collect the output list after a success signal.
    ///
    /// Outputs can land in history slightly after the completion event, so
    /// status is fetched up to `settle_attempts` times spaced by the grace
    /// delay. Failed fetches count as attempts.
    async fn settle_outputs(
        &self,
        job_id: JobId,
        backend_ref: &str,
        known: Option<Vec<OutputDescriptor>>,
    ) -> Vec<OutputDescriptor> {
        // A poll already saw the completed status; wait before re-checking.
        let mut wait_first = match known {
            Some(outputs) if !outputs.is_empty() => return outputs,
            Some(_) => true,
            None => false,
        };

        for attempt in 1..=self.timing.settle_attempts {
            if wait_first {
                tokio::time::sleep(self.timing.completion_grace).await;
            }
            wait_first = true;

            match self.fetch_status(backend_ref, None).await {
                Ok(snapshot) if snapshot.has_outputs() => return snapshot.outputs,
                Ok(_) => {
                    tracing::debug!(job_id = %job_id, attempt, "No outputs recorded yet");
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, attempt, error = %e, "Failed to fetch outputs");
                }
            }
        }
        Vec::new()
    }

    /// One status fetch, bounded by the request timeout and `not_after`.
    /// Running out of time is a transient failure.
    async fn fetch_status(
        &self,
        backend_ref: &str,
        not_after: Option<Instant>,
    ) -> Result<StatusSnapshot, BackendError> {
        let mut limit = Instant::now() + self.timing.request_timeout;
        if let Some(not_after) = not_after {
            limit = limit.min(not_after);
        }
        tokio::time::timeout_at(limit, self.backend.get_status(backend_ref))
            .await
            .unwrap_or_else(|_| Err(BackendError::Transient("status request timed out".to_string())))
    }

    fn fail(&self, job_id: JobId, message: String) {
        self.registry.update(job_id, |j| j.fail(message));
    }
}

fn poll_ticker(start: Instant, timing: &RunnerTiming) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(start, timing.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_event(events: &mut Option<EventStream>) -> Option<BackendEvent> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
