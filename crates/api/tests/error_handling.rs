//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no router is
//! involved.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use bowl_api::error::AppError;
use bowl_core::error::CoreError;
use bowl_pipeline::{PipelineError, StoreError};
use http_body_util::BodyExt;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn not_found_error_returns_404() {
    let err = AppError::Core(CoreError::NotFound {
        entity: "command",
        id: 42,
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "command with id 42 not found");
}

#[tokio::test]
async fn bad_request_error_returns_400() {
    let (status, json) = error_to_response(AppError::BadRequest("code must not be empty".into())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(json["error"], "code must not be empty");
}

#[tokio::test]
async fn syntax_error_returns_400_with_position_text() {
    let err = AppError::Core(CoreError::Syntax {
        text: "local anime".into(),
        message: "expected `-$`".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "SYNTAX_ERROR");
    assert!(json["error"].as_str().unwrap().contains("expected `-$`"));
}

#[tokio::test]
async fn reference_error_lists_every_problem() {
    let err = AppError::Pipeline(PipelineError::Core(CoreError::Reference(vec![
        "Unknown server `remote`".into(),
        "Unknown group `colors`".into(),
    ])));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], "REFERENCE_ERROR");
    assert_eq!(
        json["errors"],
        serde_json::json!(["Unknown server `remote`", "Unknown group `colors`"])
    );
}

#[tokio::test]
async fn validation_and_graph_errors_return_422() {
    let (status, json) =
        error_to_response(AppError::Core(CoreError::Validation("two region selections".into())))
            .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert!(json.get("errors").is_none());

    let (status, json) =
        error_to_response(AppError::Core(CoreError::InvalidGraph("no sampler".into()))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], "INVALID_GRAPH");
}

#[tokio::test]
async fn conflict_error_returns_409() {
    let err = AppError::Pipeline(CoreError::Conflict("job 3 is Finished".into()).into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");
    assert_eq!(json["error"], "job 3 is Finished");
}

#[tokio::test]
async fn internal_errors_are_sanitized() {
    for err in [
        AppError::Core(CoreError::Internal("secret connection string".into())),
        AppError::Pipeline(PipelineError::Store(StoreError::Invariant(
            "secret invariant".into(),
        ))),
        AppError::Pipeline(PipelineError::BackendUnreachable("local".into())),
    ] {
        let (status, json) = error_to_response(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["code"], "INTERNAL_ERROR");
        assert!(!json["error"].as_str().unwrap().contains("secret"));
    }
}

#[tokio::test]
async fn row_not_found_returns_404() {
    let err = AppError::Pipeline(PipelineError::Store(StoreError::Database(
        sqlx::Error::RowNotFound,
    )));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}
