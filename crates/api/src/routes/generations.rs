//! Route definitions for the `/generations` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::generations;
use crate::state::AppState;

/// Routes mounted at `/generations`.
///
/// ```text
/// GET    /                -> list_generations
/// POST   /                -> submit_generation
/// GET    /{id}/status     -> get_status
/// GET    /{id}/result     -> get_result
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(generations::list_generations).post(generations::submit_generation),
        )
        .route("/{id}/status", get(generations::get_status))
        .route("/{id}/result", get(generations::get_result))
}
