//! ComfyUI WebSocket message envelope and parser.
//!
//! ComfyUI sends JSON messages shaped `{"type": "<kind>", "data": {...}}`,
//! but the payload schema drifts between server versions and custom nodes
//! add their own message kinds. Only the envelope is typed here; the payload
//! stays a [`serde_json::Value`] for the detector to inspect.

use serde::Deserialize;

/// One push-channel message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendEvent {
    /// Message kind, e.g. `progress`, `executing`, `crystools.monitor`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific payload; `Null` when the message has none.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl BackendEvent {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// The prompt this message is scoped to, if it names one.
    pub fn prompt_id(&self) -> Option<&str> {
        self.data.get("prompt_id").and_then(|v| v.as_str())
    }

    /// Whether the payload carries a `prompt_id` field at all.
    pub fn is_prompt_scoped(&self) -> bool {
        self.data.get("prompt_id").is_some_and(|v| !v.is_null())
    }
}

/// Parse a ComfyUI WebSocket text message.
///
/// Returns `Err` for malformed JSON or a missing `type` field. Callers
/// should log and continue.
pub fn parse_event(text: &str) -> Result<BackendEvent, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_progress_message() {
        let event = parse_event(r#"{"type":"progress","data":{"value":5,"max":20}}"#).unwrap();
        assert_eq!(event.kind, "progress");
        assert_eq!(event.data["value"], 5);
        assert!(event.prompt_id().is_none());
    }

    #[test]
    fn parse_executing_finished() {
        let event =
            parse_event(r#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#).unwrap();
        assert_eq!(event.prompt_id(), Some("xyz"));
        assert!(event.data["node"].is_null());
    }

    #[test]
    fn parse_unknown_kind_is_accepted() {
        let event =
            parse_event(r#"{"type":"crystools.monitor","data":{"cpu_utilization":12.5}}"#).unwrap();
        assert_eq!(event.kind, "crystools.monitor");
    }

    #[test]
    fn parse_without_data() {
        let event = parse_event(r#"{"type":"execution_success"}"#).unwrap();
        assert!(event.data.is_null());
        assert!(!event.is_prompt_scoped());
    }

    #[test]
    fn null_prompt_id_is_not_scoped() {
        let event = BackendEvent::new("executed", json!({"prompt_id": null}));
        assert!(!event.is_prompt_scoped());
    }

    #[test]
    fn parse_missing_type_returns_error() {
        assert!(parse_event(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_event("not json at all").is_err());
    }
}
