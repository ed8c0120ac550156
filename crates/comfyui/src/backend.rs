//! The generation backend seam the job runner drives.
//!
//! [`GenerationBackend`] covers the four calls a job needs: open a push
//! channel, submit a workflow, poll status and fetch one output file.
//! [`ComfyUIBackend`] implements it over the REST and WebSocket clients;
//! tests substitute scripted fakes.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::ComfyUIClient;
use crate::history::{parse_history, OutputDescriptor, StatusSnapshot};
use crate::messages::BackendEvent;
use crate::processor::event_stream;

/// Push events for one client id. Ends when the channel closes.
pub type EventStream = Pin<Box<dyn Stream<Item = BackendEvent> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend refused or failed to accept a workflow.
    #[error("{0}")]
    Submission(String),

    /// The push channel could not be opened.
    #[error("{0}")]
    Connection(String),

    /// A request failed in a way that may succeed on retry.
    #[error("{0}")]
    Transient(String),

    /// The requested output does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Open the push channel scoped to `client_id`.
    async fn open_event_stream(&self, client_id: &str) -> Result<EventStream, BackendError>;

    /// Queue a workflow and return the backend's reference for it.
    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<String, BackendError>;

    /// Current status of a submitted workflow.
    async fn get_status(&self, backend_ref: &str) -> Result<StatusSnapshot, BackendError>;

    /// Download the bytes of one output file.
    async fn fetch_artifact(&self, output: &OutputDescriptor) -> Result<Vec<u8>, BackendError>;
}

/// [`GenerationBackend`] for a single ComfyUI server.
#[derive(Clone)]
pub struct ComfyUIBackend {
    api: ComfyUIApi,
    client: ComfyUIClient,
}

impl ComfyUIBackend {
    /// * `api_url` - e.g. `http://127.0.0.1:8188`
    /// * `ws_url` - e.g. `ws://127.0.0.1:8188`
    /// * `request_timeout` - bound on each REST call
    pub fn new(
        api_url: String,
        ws_url: String,
        request_timeout: Duration,
    ) -> Result<Self, ComfyUIApiError> {
        Ok(Self {
            api: ComfyUIApi::new(api_url, request_timeout)?,
            client: ComfyUIClient::new(ws_url),
        })
    }
}

#[async_trait]
impl GenerationBackend for ComfyUIBackend {
    async fn open_event_stream(&self, client_id: &str) -> Result<EventStream, BackendError> {
        let conn = self
            .client
            .connect(client_id)
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Ok(event_stream(conn.ws_stream, conn.client_id))
    }

    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<String, BackendError> {
        let response = self
            .api
            .submit_workflow(workflow, client_id)
            .await
            .map_err(|e| BackendError::Submission(e.to_string()))?;
        tracing::debug!(
            prompt_id = %response.prompt_id,
            queue_number = response.number,
            "Workflow queued",
        );
        Ok(response.prompt_id)
    }

    async fn get_status(&self, backend_ref: &str) -> Result<StatusSnapshot, BackendError> {
        let history = self
            .api
            .get_history(backend_ref)
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        Ok(parse_history(backend_ref, &history))
    }

    async fn fetch_artifact(&self, output: &OutputDescriptor) -> Result<Vec<u8>, BackendError> {
        self.api
            .view(&output.filename, &output.subfolder, &output.category)
            .await
            .map_err(|e| map_fetch_error(&output.filename, e))
    }
}

fn map_fetch_error(filename: &str, err: ComfyUIApiError) -> BackendError {
    match err.status() {
        Some(404) => BackendError::NotFound(filename.to_string()),
        _ => BackendError::Transient(err.to_string()),
    }
}
