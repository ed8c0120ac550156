//! Workflow templates and per-request overrides.
//!
//! A ComfyUI workflow in API format is a JSON object keyed by node id, each
//! node holding `class_type` and `inputs`. Requests that do not ship their
//! own workflow get a template loaded from disk with the prompt text and
//! seed written into configured nodes.

use std::path::Path;

use serde_json::Value;

/// Node ids that receive request overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBindings {
    /// Node whose `inputs.text` receives the positive prompt.
    pub positive: String,
    /// Node whose `inputs.text` receives the negative prompt.
    pub negative: String,
    /// Node whose `inputs.seed` receives the seed.
    pub seed: String,
}

impl Default for NodeBindings {
    fn default() -> Self {
        Self {
            positive: "6".to_string(),
            negative: "7".to_string(),
            seed: "3".to_string(),
        }
    }
}

/// Values written into a template.
#[derive(Debug, Clone, Default)]
pub struct WorkflowOverrides {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Failed to read workflow template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Workflow template {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Read a workflow template from disk.
pub async fn load_workflow(path: impl AsRef<Path>) -> Result<Value, WorkflowError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| WorkflowError::Io {
            path: display.clone(),
            source,
        })?;
    serde_json::from_str(&raw).map_err(|source| WorkflowError::Parse {
        path: display,
        source,
    })
}

/// Return a copy of `workflow` with the overrides applied.
///
/// Nodes missing from the workflow are skipped with a warning so a custom
/// template still runs with its own values.
pub fn apply_overrides(
    workflow: &Value,
    bindings: &NodeBindings,
    overrides: &WorkflowOverrides,
) -> Value {
    let mut workflow = workflow.clone();

    if let Some(prompt) = &overrides.prompt {
        set_input(&mut workflow, &bindings.positive, "text", Value::from(prompt.as_str()));
    }
    if let Some(negative) = &overrides.negative_prompt {
        set_input(&mut workflow, &bindings.negative, "text", Value::from(negative.as_str()));
    }
    if let Some(seed) = overrides.seed {
        set_input(&mut workflow, &bindings.seed, "seed", Value::from(seed));
    }

    workflow
}

fn set_input(workflow: &mut Value, node_id: &str, input: &str, value: Value) {
    let Some(node) = workflow.get_mut(node_id).and_then(Value::as_object_mut) else {
        tracing::warn!(node_id, input, "Workflow node not found, override skipped");
        return;
    };
    let inputs = node
        .entry("inputs")
        .or_insert_with(|| Value::Object(Default::default()));
    match inputs.as_object_mut() {
        Some(inputs) => {
            inputs.insert(input.to_string(), value);
        }
        None => tracing::warn!(node_id, input, "Workflow node inputs malformed, override skipped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn template() -> Value {
        json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 1, "steps": 20}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "placeholder"}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}}
        })
    }

    #[test]
    fn overrides_written_into_bound_nodes() {
        let overrides = WorkflowOverrides {
            prompt: Some("a lighthouse at dusk".into()),
            negative_prompt: Some("blurry".into()),
            seed: Some(4_294_967_295),
        };
        let out = apply_overrides(&template(), &NodeBindings::default(), &overrides);
        assert_eq!(out["6"]["inputs"]["text"], "a lighthouse at dusk");
        assert_eq!(out["7"]["inputs"]["text"], "blurry");
        assert_eq!(out["3"]["inputs"]["seed"], 4_294_967_295u64);
        assert_eq!(out["3"]["inputs"]["steps"], 20);
    }

    #[test]
    fn absent_overrides_leave_template_unchanged() {
        let out = apply_overrides(&template(), &NodeBindings::default(), &WorkflowOverrides::default());
        assert_eq!(out, template());
    }

    #[test]
    fn missing_node_is_skipped() {
        let bindings = NodeBindings {
            positive: "99".into(),
            ..Default::default()
        };
        let overrides = WorkflowOverrides {
            prompt: Some("x".into()),
            ..Default::default()
        };
        let out = apply_overrides(&template(), &bindings, &overrides);
        assert_eq!(out, template());
    }

    #[tokio::test]
    async fn load_template_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.json");
        std::fs::write(&path, template().to_string()).unwrap();
        let loaded = load_workflow(&path).await.unwrap();
        assert_eq!(loaded, template());
    }

    #[tokio::test]
    async fn load_missing_or_invalid_template_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            load_workflow(dir.path().join("nope.json")).await,
            Err(WorkflowError::Io { .. })
        );

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_matches!(load_workflow(&path).await, Err(WorkflowError::Parse { .. }));
    }
}
