//! Handlers for command records: parse preview, per-project listing and
//! creation, reordering, deletion, and running.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use bowl_core::types::DbId;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::{DataResponse, JobResponse, RunResponse};
use crate::state::AppState;

fn require_code(code: &str) -> AppResult<()> {
    if code.trim().is_empty() {
        return Err(AppError::BadRequest("code must not be empty".into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ParseCommandRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommandRequest {
    pub code: String,
    /// Zero-based position; appended when absent.
    #[serde(default)]
    pub insert_at: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct MoveCommandRequest {
    pub position: i32,
}

/// POST /api/v1/commands/parse
///
/// Parse command text without storing it.
pub async fn parse_command(
    State(state): State<AppState>,
    Json(input): Json<ParseCommandRequest>,
) -> AppResult<impl IntoResponse> {
    require_code(&input.code)?;
    let parsed = state.service.preview(&input.code)?;
    Ok(Json(DataResponse { data: parsed }))
}

/// GET /api/v1/projects/{project_id}/commands
pub async fn list_commands(
    State(state): State<AppState>,
    Path(project_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let commands = state.service.list_commands(project_id).await?;
    Ok(Json(DataResponse { data: commands }))
}

/// POST /api/v1/projects/{project_id}/commands
///
/// Parse, validate and store a command. Returns 201 with the record.
pub async fn create_command(
    State(state): State<AppState>,
    Path(project_id): Path<DbId>,
    Json(input): Json<CreateCommandRequest>,
) -> AppResult<impl IntoResponse> {
    require_code(&input.code)?;
    let record = state
        .service
        .add_command(project_id, &input.code, input.insert_at)
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: record })))
}

/// POST /api/v1/commands/{id}/move
pub async fn move_command(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<MoveCommandRequest>,
) -> AppResult<impl IntoResponse> {
    let record = state.service.move_command(id, input.position).await?;
    Ok(Json(DataResponse { data: record }))
}

/// DELETE /api/v1/commands/{id}
///
/// Deletes the command and its jobs. Returns 204.
pub async fn delete_command(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.service.delete_command(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/commands/{id}/run
///
/// Expand the command into jobs and enqueue them.
pub async fn run_command(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.service.run_command(id).await?;
    Ok(Json(DataResponse {
        data: RunResponse::from(outcome),
    }))
}

/// GET /api/v1/commands/{id}/jobs
pub async fn list_command_jobs(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let jobs: Vec<JobResponse> = state
        .service
        .list_jobs(id)
        .await?
        .into_iter()
        .map(JobResponse::from)
        .collect();
    Ok(Json(DataResponse { data: jobs }))
}
