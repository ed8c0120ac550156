#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::channel::mpsc;
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::time::Instant;
use tower::ServiceExt;

use vprompt_api::config::{ComfyUIConfig, GenerationConfig, ServerConfig};
use vprompt_api::engine::artifacts::ArtifactStore;
use vprompt_api::engine::JobService;
use vprompt_api::router::build_app_router;
use vprompt_api::state::AppState;
use vprompt_comfyui::backend::{BackendError, EventStream, GenerationBackend};
use vprompt_comfyui::history::{OutputDescriptor, StatusSnapshot};
use vprompt_comfyui::messages::BackendEvent;
use vprompt_comfyui::workflow::NodeBindings;
use vprompt_core::generation::{GenerationKind, GenerationRequest};
use vprompt_core::job::Job;
use vprompt_core::timing::RunnerTiming;
use vprompt_core::types::JobId;

/// Prompt id every [`FakeBackend`] submission returns.
pub const PROMPT_ID: &str = "prompt-1";

type HistoryScript = Box<dyn Fn(Duration) -> StatusSnapshot + Send + Sync>;

/// Backend calls a [`FakeBackend`] can be told never to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hang {
    Connect,
    Submit,
    Status,
    Fetch,
}

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

/// Scripted [`GenerationBackend`].
///
/// History is a function of the time elapsed since the fake was built, so
/// tests running on a paused clock control exactly when outputs appear.
pub struct FakeBackend {
    clock: Instant,
    /// `None` makes `open_event_stream` fail.
    push: Mutex<Option<EventStream>>,
    submit_error: Option<String>,
    history: HistoryScript,
    missing: HashSet<String>,
    /// Status calls still to fail with `Transient`.
    failing_polls: AtomicUsize,
    hangs: HashSet<Hang>,
    pub submitted: Mutex<Vec<Value>>,
    pub status_calls: AtomicUsize,
}

impl FakeBackend {
    /// Push channel open but silent, history always empty.
    pub fn new() -> Self {
        Self {
            clock: Instant::now(),
            push: Mutex::new(Some(futures::stream::pending().boxed())),
            submit_error: None,
            history: Box::new(|_| StatusSnapshot::default()),
            missing: HashSet::new(),
            failing_polls: AtomicUsize::new(0),
            hangs: HashSet::new(),
            submitted: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_push(self, stream: EventStream) -> Self {
        *self.push.lock().unwrap() = Some(stream);
        self
    }

    pub fn without_push(self) -> Self {
        *self.push.lock().unwrap() = None;
        self
    }

    pub fn failing_submit(mut self, message: &str) -> Self {
        self.submit_error = Some(message.to_string());
        self
    }

    pub fn with_history(
        mut self,
        script: impl Fn(Duration) -> StatusSnapshot + Send + Sync + 'static,
    ) -> Self {
        self.history = Box::new(script);
        self
    }

    /// History reports `names` as outputs from `after` onwards.
    pub fn outputs_after(self, after: Duration, names: &[&str]) -> Self {
        let ready = outputs_snapshot(names);
        self.with_history(move |elapsed| {
            if elapsed >= after {
                ready.clone()
            } else {
                StatusSnapshot::default()
            }
        })
    }

    /// Fetching `name` fails with `NotFound`.
    pub fn missing_artifact(mut self, name: &str) -> Self {
        self.missing.insert(name.to_string());
        self
    }

    /// The first `count` status calls fail with `Transient`.
    pub fn failing_polls(self, count: usize) -> Self {
        self.failing_polls.store(count, Ordering::SeqCst);
        self
    }

    /// `call` never completes.
    pub fn hanging(mut self, call: Hang) -> Self {
        self.hangs.insert(call);
        self
    }

    async fn maybe_hang(&self, call: Hang) {
        if self.hangs.contains(&call) {
            std::future::pending::<()>().await;
        }
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn open_event_stream(&self, _client_id: &str) -> Result<EventStream, BackendError> {
        self.maybe_hang(Hang::Connect).await;
        self.push
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| BackendError::Connection("connection refused".into()))
    }

    async fn submit(&self, workflow: &Value, _client_id: &str) -> Result<String, BackendError> {
        self.maybe_hang(Hang::Submit).await;
        if let Some(message) = &self.submit_error {
            return Err(BackendError::Submission(message.clone()));
        }
        self.submitted.lock().unwrap().push(workflow.clone());
        Ok(PROMPT_ID.to_string())
    }

    async fn get_status(&self, backend_ref: &str) -> Result<StatusSnapshot, BackendError> {
        assert_eq!(backend_ref, PROMPT_ID);
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_hang(Hang::Status).await;
        let failed = self
            .failing_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BackendError::Transient("HTTP 502: bad gateway".into()));
        }
        Ok((self.history)(self.clock.elapsed()))
    }

    async fn fetch_artifact(&self, output: &OutputDescriptor) -> Result<Vec<u8>, BackendError> {
        self.maybe_hang(Hang::Fetch).await;
        if self.missing.contains(&output.filename) {
            return Err(BackendError::NotFound(output.filename.clone()));
        }
        Ok(format!("bytes of {}", output.filename).into_bytes())
    }
}

/// A push channel the test feeds by hand.
pub fn push_channel() -> (mpsc::UnboundedSender<BackendEvent>, EventStream) {
    let (tx, rx) = mpsc::unbounded();
    (tx, rx.boxed())
}

pub fn outputs_snapshot(names: &[&str]) -> StatusSnapshot {
    StatusSnapshot {
        present: true,
        outputs: names
            .iter()
            .map(|name| OutputDescriptor {
                filename: name.to_string(),
                subfolder: String::new(),
                category: "output".to_string(),
            })
            .collect(),
        completed: true,
        status_str: Some("success".to_string()),
        error_message: None,
    }
}

// ---------------------------------------------------------------------------
// Job service helpers
// ---------------------------------------------------------------------------

pub fn test_store(output_dir: &Path) -> ArtifactStore {
    ArtifactStore::new(output_dir.to_path_buf(), "/outputs", "vPrompt_")
}

pub fn test_service(backend: Arc<FakeBackend>, output_dir: &Path) -> JobService {
    JobService::new(backend, test_store(output_dir), RunnerTiming::default())
}

pub fn image_request() -> GenerationRequest {
    GenerationRequest {
        kind: GenerationKind::Image,
        seed: 1234,
        workflow: serde_json::json!({"3": {"class_type": "KSampler", "inputs": {"seed": 1234}}}),
    }
}

pub fn job(service: &JobService, id: JobId) -> Job {
    service.get(id).expect("job exists")
}

/// Let spawned tasks run without moving the clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Wait until the job is terminal, polling every 50ms.
pub async fn wait_for_terminal(service: &JobService, id: JobId) -> Job {
    for _ in 0..10_000 {
        let current = job(service, id);
        if current.is_terminal() {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {id} never reached a terminal state");
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` rooted at `root`.
///
/// Outputs go to `root/outputs`, templates are read from `root/image.json`
/// and `root/audio.json`.
pub fn test_config(root: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5001".to_string()],
        request_timeout_secs: 30,
        comfyui: ComfyUIConfig {
            address: "127.0.0.1".to_string(),
            port: 8188,
        },
        generation: GenerationConfig {
            output_dir: root.join("outputs"),
            public_output_path: "/outputs".to_string(),
            output_file_prefix: "vPrompt_".to_string(),
            workflow_path: root.join("image.json"),
            audio_workflow_path: root.join("audio.json"),
            bindings: NodeBindings::default(),
            timing: RunnerTiming::default(),
        },
    }
}

/// Write the default image template into `root`.
pub fn write_template(root: &Path) -> PathBuf {
    let path = root.join("image.json");
    let template = serde_json::json!({
        "3": {"class_type": "KSampler", "inputs": {"seed": 0, "steps": 20}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
        "7": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}}
    });
    std::fs::write(&path, template.to_string()).expect("write template");
    path
}

/// Build the full application router with all middleware layers.
pub fn build_test_app(backend: Arc<FakeBackend>, root: &Path) -> (Router, AppState) {
    let config = test_config(root);
    let store = ArtifactStore::new(
        config.generation.output_dir.clone(),
        &config.generation.public_output_path,
        &config.generation.output_file_prefix,
    );
    let state = AppState {
        jobs: Arc::new(JobService::new(backend, store, config.generation.timing)),
        config: Arc::new(config.clone()),
    };
    (build_app_router(state.clone(), &config), state)
}

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Poll the status endpoint until the job is terminal.
pub async fn wait_for_status(app: &Router, job_id: &str) -> Value {
    let uri = format!("/api/v1/generations/{job_id}/status");
    for _ in 0..200 {
        let response = get(app.clone(), &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let status = json["data"]["status"].as_str().unwrap_or_default().to_string();
        if status == "done" || status == "error" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} never finished");
}
