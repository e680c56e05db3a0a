use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::commands;
use crate::state::AppState;

/// Routes mounted at `/commands`.
///
/// ```text
/// POST   /parse           -> parse_command
/// DELETE /{id}            -> delete_command
/// POST   /{id}/move       -> move_command
/// POST   /{id}/run        -> run_command
/// GET    /{id}/jobs       -> list_command_jobs
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/parse", post(commands::parse_command))
        .route("/{id}", delete(commands::delete_command))
        .route("/{id}/move", post(commands::move_command))
        .route("/{id}/run", post(commands::run_command))
        .route("/{id}/jobs", get(commands::list_command_jobs))
}

/// Routes mounted at `/projects`.
///
/// ```text
/// GET    /{project_id}/commands   -> list_commands
/// POST   /{project_id}/commands   -> create_command
/// ```
pub fn project_router() -> Router<AppState> {
    Router::new().route(
        "/{project_id}/commands",
        get(commands::list_commands).post(commands::create_command),
    )
}
