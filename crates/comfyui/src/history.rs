//! Status snapshots parsed from `GET /history/{prompt_id}`.
//!
//! The history document is keyed by prompt id:
//!
//! ```json
//! {"<prompt_id>": {
//!     "outputs": {"9": {"images": [{"filename": "ComfyUI_0001_.png", "subfolder": "", "type": "output"}]}},
//!     "status": {"status_str": "success", "completed": true, "messages": [["execution_start", {}]]}
//! }}
//! ```
//!
//! It is empty (`{}`) until the prompt has finished executing.

use serde::{Deserialize, Serialize};

/// Node output keys that hold downloadable files.
pub const OUTPUT_KEYS: [&str; 4] = ["images", "audio", "gifs", "videos"];

/// Identifies one file the backend produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage category, sent as `type` by the backend.
    #[serde(rename = "type", default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "output".to_string()
}

/// What the backend reports about one prompt at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Whether the prompt appears in history at all.
    pub present: bool,
    /// Every output file, in node order.
    pub outputs: Vec<OutputDescriptor>,
    /// The backend's own "completed" flag.
    pub completed: bool,
    /// Coarse status string (`success`, `error`).
    pub status_str: Option<String>,
    /// Exception message from an `execution_error` status message.
    pub error_message: Option<String>,
}

impl StatusSnapshot {
    pub fn has_outputs(&self) -> bool {
        !self.outputs.is_empty()
    }
}

/// Build a snapshot for `prompt_id` from a raw history document.
pub fn parse_history(prompt_id: &str, history: &serde_json::Value) -> StatusSnapshot {
    let Some(entry) = history.get(prompt_id) else {
        return StatusSnapshot::default();
    };

    let outputs = entry
        .get("outputs")
        .and_then(|o| o.as_object())
        .map(|nodes| nodes.values().flat_map(node_outputs).collect())
        .unwrap_or_default();

    let status = entry.get("status");
    let completed = status
        .and_then(|s| s.get("completed"))
        .and_then(|c| c.as_bool())
        .unwrap_or(false);
    let status_str = status
        .and_then(|s| s.get("status_str"))
        .and_then(|s| s.as_str())
        .map(str::to_string);
    let error_message = status
        .and_then(|s| s.get("messages"))
        .and_then(|m| m.as_array())
        .and_then(|messages| messages.iter().find_map(execution_error_message));

    StatusSnapshot {
        present: true,
        outputs,
        completed,
        status_str,
        error_message,
    }
}

/// Collect file descriptors from one node's output object.
fn node_outputs(node: &serde_json::Value) -> Vec<OutputDescriptor> {
    OUTPUT_KEYS
        .iter()
        .filter_map(|key| node.get(*key).and_then(|v| v.as_array()))
        .flatten()
        .filter_map(|item| serde_json::from_value::<OutputDescriptor>(item.clone()).ok())
        .filter(|o| !o.filename.is_empty())
        .collect()
}

/// Status messages are `[kind, payload]` pairs.
fn execution_error_message(message: &serde_json::Value) -> Option<String> {
    let pair = message.as_array()?;
    if pair.first()?.as_str()? != "execution_error" {
        return None;
    }
    pair.get(1)?
        .get("exception_message")?
        .as_str()
        .map(str::to_string)
}
