use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/backends
///
/// Code names of the backends that passed their last probe.
pub async fn list_backends(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let backends = state.manager.reachable_backends().await;
    Ok(Json(DataResponse { data: backends }))
}
