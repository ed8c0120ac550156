//! Generation request types and submission validation.
//!
//! A submission carries an optional backend workflow graph plus optional
//! prompt/seed overrides. The workflow itself is opaque to the orchestrator;
//! only its top-level shape is checked here.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Largest accepted deterministic seed (unsigned 32-bit range).
pub const MAX_SEED: u64 = u32::MAX as u64;

/// Maximum length of a positive or negative prompt override.
pub const MAX_PROMPT_LEN: usize = 10_000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What the backend is asked to produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    #[default]
    Image,
    Audio,
}

impl GenerationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }
}

/// Body of `POST /api/v1/generations`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitGeneration {
    #[serde(default)]
    pub kind: GenerationKind,
    /// Backend workflow graph. Falls back to the configured template.
    pub workflow: Option<serde_json::Value>,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    /// Deterministic seed; a random one is drawn when absent.
    pub seed: Option<u64>,
}

/// A fully resolved request, ready to hand to the backend verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub kind: GenerationKind,
    pub seed: u64,
    /// The workflow graph with all overrides applied.
    pub workflow: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a submission before any job is created.
pub fn validate_submission(input: &SubmitGeneration) -> Result<(), CoreError> {
    if let Some(seed) = input.seed {
        validate_seed(seed)?;
    }
    if let Some(workflow) = &input.workflow {
        validate_workflow(workflow)?;
    }
    for (field, value) in [
        ("prompt", &input.prompt),
        ("negative_prompt", &input.negative_prompt),
    ] {
        if let Some(text) = value {
            if text.len() > MAX_PROMPT_LEN {
                return Err(CoreError::Validation(format!(
                    "{field} must not exceed {MAX_PROMPT_LEN} characters"
                )));
            }
        }
    }
    Ok(())
}

/// Seeds must fit the backend's unsigned 32-bit sampler seed.
pub fn validate_seed(seed: u64) -> Result<(), CoreError> {
    if seed > MAX_SEED {
        return Err(CoreError::Validation(format!(
            "seed must be between 0 and {MAX_SEED}"
        )));
    }
    Ok(())
}

/// A workflow graph is a non-empty JSON object keyed by node id.
pub fn validate_workflow(workflow: &serde_json::Value) -> Result<(), CoreError> {
    match workflow.as_object() {
        Some(nodes) if !nodes.is_empty() => Ok(()),
        Some(_) => Err(CoreError::Validation(
            "workflow must contain at least one node".to_string(),
        )),
        None => Err(CoreError::Validation(
            "workflow must be a JSON object keyed by node id".to_string(),
        )),
    }
}
