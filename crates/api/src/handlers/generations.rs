//! Handlers for the `/generations` resource.
//!
//! Submission returns as soon as the job is registered; progress and
//! results are read back from the in-memory registry and never touch the
//! backend.

use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rand::Rng;
use serde::Serialize;
use vprompt_comfyui::workflow::{apply_overrides, load_workflow, WorkflowOverrides};
use vprompt_core::generation::{
    validate_submission, validate_workflow, GenerationRequest, SubmitGeneration, MAX_SEED,
};
use vprompt_core::job::{Artifact, JobStatus, JobStatusView};
use vprompt_core::types::JobId;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Headers that keep proxies and browsers from caching status reads.
const NO_CACHE_HEADERS: [(axum::http::HeaderName, &str); 3] = [
    (CACHE_CONTROL, "no-store, no-cache, must-revalidate, max-age=0"),
    (PRAGMA, "no-cache"),
    (EXPIRES, "0"),
];

#[derive(Debug, Serialize)]
pub struct SubmitAccepted {
    pub job_id: JobId,
    pub seed: u64,
}

#[derive(Debug, Serialize)]
pub struct GenerationResult {
    pub job_id: JobId,
    pub status: JobStatus,
    pub artifacts: Vec<Artifact>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/generations
///
/// Validate the request, resolve the workflow (request body or configured
/// template) with prompt and seed applied, and start a job. Returns 202 with
/// the job id and the seed that was used.
pub async fn submit_generation(
    State(state): State<AppState>,
    Json(input): Json<SubmitGeneration>,
) -> AppResult<impl IntoResponse> {
    validate_submission(&input)?;

    let seed = input
        .seed
        .unwrap_or_else(|| rand::rng().random_range(0..=MAX_SEED));

    let generation = &state.config.generation;
    let template = match input.workflow {
        Some(workflow) => workflow,
        None => {
            let path = generation.workflow_path(input.kind);
            let template = load_workflow(path)
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?;
            validate_workflow(&template).map_err(|e| {
                AppError::InternalError(format!("Template {}: {e}", path.display()))
            })?;
            template
        }
    };

    let overrides = WorkflowOverrides {
        prompt: input.prompt,
        negative_prompt: input.negative_prompt,
        seed: Some(seed),
    };
    let workflow = apply_overrides(&template, &generation.bindings, &overrides);

    let job_id = state.jobs.submit(GenerationRequest {
        kind: input.kind,
        seed,
        workflow,
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmitAccepted { job_id, seed },
        }),
    ))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/generations
///
/// Every job known to this process, oldest first.
pub async fn list_generations(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let views: Vec<JobStatusView> = state.jobs.list().iter().map(JobStatusView::from).collect();
    Ok(Json(DataResponse { data: views }))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /api/v1/generations/{id}/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.jobs.get(job_id)?;
    Ok((
        NO_CACHE_HEADERS,
        Json(DataResponse {
            data: JobStatusView::from(&job),
        }),
    ))
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// GET /api/v1/generations/{id}/result
///
/// Final artifacts or error. 400 while the job is still pending or running.
pub async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.jobs.get(job_id)?;
    if !job.is_terminal() {
        return Err(AppError::BadRequest(format!(
            "Generation {job_id} has not finished (progress {}%)",
            job.progress
        )));
    }

    Ok(Json(DataResponse {
        data: GenerationResult {
            job_id: job.id,
            status: job.status,
            artifacts: job.artifacts,
            error: job.error,
        },
    }))
}
