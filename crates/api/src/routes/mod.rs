pub mod backends;
pub mod commands;
pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /commands/parse                          preview (POST)
/// /projects/{project_id}/commands          list, create
/// /commands/{id}                           delete
/// /commands/{id}/move                      reorder (POST)
/// /commands/{id}/run                       expand and enqueue (POST)
/// /commands/{id}/jobs                      list jobs
/// /jobs/{id}                               get
/// /jobs/{id}/run                           enqueue (POST)
/// /jobs/{id}/reload                        rebuild and enqueue (POST)
/// /backends                                reachable backends
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/commands", commands::router())
        .nest("/projects", commands::project_router())
        .nest("/jobs", jobs::router())
        .nest("/backends", backends::router())
}
