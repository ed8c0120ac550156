pub mod generations;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /generations                        submit, list
/// /generations/{id}/status            progress snapshot (uncached)
/// /generations/{id}/result            artifacts or error once terminal
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/generations", generations::router())
}
