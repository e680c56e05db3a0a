//! Handlers for individual jobs.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use bowl_core::types::DbId;

use crate::error::AppResult;
use crate::response::{DataResponse, JobResponse};
use crate::state::AppState;

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.service.get_job(id).await?;
    Ok(Json(DataResponse {
        data: JobResponse::from(job),
    }))
}

/// POST /api/v1/jobs/{id}/run
///
/// Enqueue a waiting job. Any other status is a 409.
pub async fn run_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.service.run_job(id).await?;
    Ok(Json(DataResponse {
        data: JobResponse::from(job),
    }))
}

/// POST /api/v1/jobs/{id}/reload
///
/// Rebuild the job from the current catalog, reset it to waiting and
/// enqueue it.
pub async fn reload_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.service.reload_job(id).await?;
    Ok(Json(DataResponse {
        data: JobResponse::from(job),
    }))
}
