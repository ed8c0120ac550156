//! ComfyUI backend client library.
//!
//! Provides the HTTP API wrapper, the WebSocket push channel, loose event
//! parsing, history snapshot parsing, the completion detector that turns
//! events and snapshots into progress/terminal classifications, workflow
//! override helpers, and the [`backend::GenerationBackend`] trait the job
//! runner drives.

pub mod api;
pub mod backend;
pub mod client;
pub mod detector;
pub mod history;
pub mod messages;
pub mod processor;
pub mod workflow;
