use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /{id}            -> get_job
/// POST   /{id}/run        -> run_job
/// POST   /{id}/reload     -> reload_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/run", post(jobs::run_job))
        .route("/{id}/reload", post(jobs::reload_job))
}
