//! Completion detection for push events and status snapshots.
//!
//! ComfyUI's event schema is not stable across server versions and custom
//! nodes, so several historical shapes are accepted side by side. An event
//! is run through an ordered chain of pure rules; the first rule that
//! returns a classification wins. Contradictory events (for example a
//! sub-unit map that claims completion next to a partial percentage) are
//! resolved by that order alone.
//!
//! Classification never looks at job state. Dropping regressive progress
//! is the runner's responsibility.

use serde_json::{Map, Value};

use crate::history::StatusSnapshot;
use crate::messages::BackendEvent;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How a terminal signal ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

/// Result of classifying one event or snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Percentage in `0..=100`.
    Progress(u8),
    Terminal(Outcome),
    Ignore,
}

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Event kinds that carry progress payloads.
pub const PROGRESS_EVENT_KINDS: [&str; 3] = ["progress", "progress_state", "status"];

/// Event kinds used for "prompt finished" across backend versions.
pub const SUCCESS_EVENT_KINDS: [&str; 7] = [
    "execution_finished",
    "execution_complete",
    "execution_end",
    "executed",
    "execution_success",
    "success",
    "finished",
];

/// Event kinds reporting that the prompt failed or was stopped.
pub const FAILURE_EVENT_KINDS: [&str; 2] = ["execution_error", "execution_interrupted"];

/// Substring identifying telemetry broadcasts such as `crystools.monitor`.
const TELEMETRY_MARKER: &str = "monitor";

// ---------------------------------------------------------------------------
// Event classification
// ---------------------------------------------------------------------------

type Rule = fn(&BackendEvent, &str) -> Option<Classification>;

/// Rules in priority order.
const EVENT_RULES: [Rule; 6] = [
    telemetry_rule,
    all_units_complete_rule,
    progress_rule,
    success_event_rule,
    failure_event_rule,
    idle_executing_rule,
];

/// Classify one push event for the prompt `expected_ref`.
///
/// Pure: the same event and reference always yield the same result.
pub fn classify_event(event: &BackendEvent, expected_ref: &str) -> Classification {
    EVENT_RULES
        .iter()
        .find_map(|rule| rule(event, expected_ref))
        .unwrap_or(Classification::Ignore)
}

/// Telemetry/monitoring broadcasts are noise.
fn telemetry_rule(event: &BackendEvent, _expected_ref: &str) -> Option<Classification> {
    let payload_kind = event.data.get("type").and_then(|t| t.as_str());
    let is_telemetry = event.kind.contains(TELEMETRY_MARKER)
        || payload_kind.is_some_and(|k| k.contains(TELEMETRY_MARKER));
    is_telemetry.then_some(Classification::Ignore)
}

/// A sub-unit map in which every unit reports `value >= max` means the
/// prompt has nothing left to run.
///
/// Checked ahead of percentage extraction so a fully complete map ends the
/// job instead of being averaged into 100% progress. Needs at least one
/// unit that reports both fields.
fn all_units_complete_rule(event: &BackendEvent, _expected_ref: &str) -> Option<Classification> {
    if !matches!(event.kind.as_str(), "progress" | "progress_state") {
        return None;
    }
    let nodes = event.data.get("nodes")?.as_object()?;
    let mut counted = 0usize;
    for unit in nodes.values() {
        let (Some(value), Some(max)) = (number(unit, "value"), number(unit, "max")) else {
            continue;
        };
        if value < max {
            return None;
        }
        counted += 1;
    }
    (counted > 0).then_some(Classification::Terminal(Outcome::Success))
}

/// Percentage extraction for progress-bearing events.
///
/// Tries the payload first, then each nested object in it.
fn progress_rule(event: &BackendEvent, _expected_ref: &str) -> Option<Classification> {
    if !PROGRESS_EVENT_KINDS.contains(&event.kind.as_str()) {
        return None;
    }
    let data = event.data.as_object()?;
    extract_percent(data)
        .or_else(|| {
            data.values()
                .filter_map(|v| v.as_object())
                .find_map(extract_percent)
        })
        .map(Classification::Progress)
}

/// Named "finished" events, unless scoped to a different prompt.
fn success_event_rule(event: &BackendEvent, expected_ref: &str) -> Option<Classification> {
    if !SUCCESS_EVENT_KINDS.contains(&event.kind.as_str()) {
        return None;
    }
    scope_matches(event, expected_ref).then_some(Classification::Terminal(Outcome::Success))
}

/// Backend-reported execution errors for this prompt.
fn failure_event_rule(event: &BackendEvent, expected_ref: &str) -> Option<Classification> {
    if !FAILURE_EVENT_KINDS.contains(&event.kind.as_str()) {
        return None;
    }
    if !scope_matches(event, expected_ref) {
        return None;
    }
    let message = event
        .data
        .get("exception_message")
        .and_then(|m| m.as_str())
        .filter(|m| !m.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match event.kind.as_str() {
            "execution_interrupted" => "Execution interrupted on the backend".to_string(),
            _ => "Execution failed on the backend".to_string(),
        });
    Some(Classification::Terminal(Outcome::Failure(message)))
}

/// `executing` with no active node for this prompt.
///
/// FRAGILE: this is how current ComfyUI versions signal that nothing is
/// left to execute. It is a convention, not a documented contract, and
/// should be revisited if the backend protocol gains explicit versioning.
fn idle_executing_rule(event: &BackendEvent, expected_ref: &str) -> Option<Classification> {
    if event.kind != "executing" {
        return None;
    }
    if event.prompt_id() != Some(expected_ref) {
        return None;
    }
    let idle = match event.data.get("node") {
        None | Some(Value::Null) => true,
        Some(Value::String(node)) => node.is_empty(),
        Some(_) => false,
    };
    idle.then_some(Classification::Terminal(Outcome::Success))
}

// ---------------------------------------------------------------------------
// Snapshot classification
// ---------------------------------------------------------------------------

/// Classify a history snapshot.
///
/// Outputs present, or an explicit completed/success flag, is success; the
/// runner re-checks for outputs after a grace delay when the list is empty.
pub fn classify_snapshot(snapshot: &StatusSnapshot) -> Classification {
    if !snapshot.present {
        return Classification::Ignore;
    }
    if snapshot.has_outputs() {
        return Classification::Terminal(Outcome::Success);
    }
    match snapshot.status_str.as_deref() {
        Some("error") => {
            let message = snapshot
                .error_message
                .clone()
                .unwrap_or_else(|| "Execution failed on the backend".to_string());
            Classification::Terminal(Outcome::Failure(message))
        }
        Some("success") => Classification::Terminal(Outcome::Success),
        _ if snapshot.completed => Classification::Terminal(Outcome::Success),
        _ => Classification::Ignore,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Unscoped events apply to every prompt; scoped ones only to theirs.
fn scope_matches(event: &BackendEvent, expected_ref: &str) -> bool {
    !event.is_prompt_scoped() || event.prompt_id() == Some(expected_ref)
}

/// Percentage from one payload object, trying each known shape in order.
fn extract_percent(data: &Map<String, Value>) -> Option<u8> {
    let field = |key: &str| data.get(key).and_then(Value::as_f64);

    // Direct percentage fields.
    if let Some(p) = field("progress").or_else(|| field("percent")) {
        return Some(clamp_percent(p.trunc()));
    }

    // value / max
    if let Some(p) = ratio(field("value"), field("max")) {
        return Some(p);
    }

    // Averaged sub-unit map.
    if let Some(nodes) = data.get("nodes").and_then(Value::as_object) {
        let percents: Vec<f64> = nodes
            .values()
            .filter_map(|unit| match (number(unit, "value"), number(unit, "max")) {
                (Some(value), Some(max)) if max > 0.0 => Some(value / max * 100.0),
                _ => None,
            })
            .collect();
        if !percents.is_empty() {
            let avg = percents.iter().sum::<f64>() / percents.len() as f64;
            return Some(clamp_percent(avg.round()));
        }
    }

    // step / steps, then samples_done / total_samples
    ratio(field("step"), field("steps"))
        .or_else(|| ratio(field("samples_done"), field("total_samples")))
}

fn ratio(value: Option<f64>, max: Option<f64>) -> Option<u8> {
    match (value, max) {
        (Some(value), Some(max)) if max > 0.0 => Some(clamp_percent((value / max * 100.0).round())),
        _ => None,
    }
}

fn number(unit: &Value, key: &str) -> Option<f64> {
    unit.get(key).and_then(Value::as_f64)
}

fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 100.0) as u8
}
