use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::JobService;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Generation job service (registry plus runner spawning).
    pub jobs: Arc<JobService>,
}
