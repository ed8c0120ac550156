//! Generation job engine.
//!
//! [`JobService`] owns the registry and spawns one [`runner::JobRunner`]
//! task per accepted job. The runner races push events against status
//! polling and materializes outputs through [`artifacts::ArtifactStore`].

pub mod artifacts;
pub mod runner;

use std::sync::Arc;

use vprompt_comfyui::backend::GenerationBackend;
use vprompt_core::error::CoreError;
use vprompt_core::generation::GenerationRequest;
use vprompt_core::job::Job;
use vprompt_core::registry::JobRegistry;
use vprompt_core::timing::RunnerTiming;
use vprompt_core::types::JobId;

use self::artifacts::ArtifactStore;
use self::runner::JobRunner;

/// Message recorded when a runner task dies without reaching a terminal state.
pub const RUNNER_CRASHED_MESSAGE: &str = "Job runner crashed";

/// Accepts generation requests and tracks them until they are terminal.
pub struct JobService {
    registry: Arc<JobRegistry>,
    runner: Arc<JobRunner>,
}

impl JobService {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        store: ArtifactStore,
        timing: RunnerTiming,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&registry),
            backend,
            store,
            timing,
        ));
        Self { registry, runner }
    }

    /// Register a job and start its runner. Returns without waiting for
    /// the backend.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, request: GenerationRequest) -> JobId {
        let job_id = self.registry.create(request);

        let runner = Arc::clone(&self.runner);
        let handle = tokio::spawn(async move { runner.run(job_id).await });

        // Supervisor: a panicking runner must not leave the job non-terminal.
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                tracing::error!(job_id = %job_id, error = %e, "Job runner task failed");
                registry.update(job_id, |j| j.fail(RUNNER_CRASHED_MESSAGE));
            }
        });

        tracing::info!(job_id = %job_id, "Generation job accepted");
        job_id
    }

    /// Snapshot of one job.
    pub fn get(&self, job_id: JobId) -> Result<Job, CoreError> {
        self.registry.get(job_id).ok_or_else(|| CoreError::NotFound {
            entity: "Generation",
            id: job_id.to_string(),
        })
    }

    /// Snapshot of every job, oldest first.
    pub fn list(&self) -> Vec<Job> {
        self.registry.list_all()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }
}
