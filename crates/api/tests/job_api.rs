//! Integration tests for `/api/v1/jobs`.

mod common;

use axum::http::StatusCode;
use bowl_pipeline::events::JobEvent;
use bowl_pipeline::testing::{FakeOutcome, SERVER};
use common::{body_json, create_command, get, post, wait_for_status};
use tokio::sync::broadcast;

async fn failure_of(rx: &mut broadcast::Receiver<JobEvent>, id: i64) -> String {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(JobEvent::JobFailed { job_id, error }) if job_id == id => return error,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("job fails within timeout")
}

async fn run(app: &axum::Router, code: &str) -> Vec<serde_json::Value> {
    let id = create_command(app, code).await;
    let json = body_json(post(app, &format!("/api/v1/commands/{id}/run")).await).await;
    json["data"]["jobs"].as_array().unwrap().clone()
}

#[tokio::test]
async fn submitted_job_finishes_and_writes_its_result() {
    let app = common::build_test_app().await;
    let jobs = run(&app.router, "local -$ anime : characters(alice)").await;
    let id = jobs[0]["id"].as_i64().unwrap();

    let job = wait_for_status(&app.router, id, "FINISHED").await;
    assert_eq!(job["prompt_id"], "fake-1");
    let path = job["result_path"].as_str().unwrap();
    assert!(std::path::Path::new(path).exists());
}

#[tokio::test]
async fn run_job_rejects_jobs_that_are_not_waiting() {
    let app = common::build_test_app().await;
    let jobs = run(&app.router, "local -$ anime : characters(bob)").await;
    let id = jobs[0]["id"].as_i64().unwrap();
    wait_for_status(&app.router, id, "FINISHED").await;

    let response = post(&app.router, &format!("/api/v1/jobs/{id}/run")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");
}

#[tokio::test]
async fn waiting_job_can_be_run_again() {
    let app = common::build_test_app().await;
    app.factory.backend(SERVER).set_reachable(false);
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !app.manager.reachable_backends().await.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("backend goes offline");

    let mut events = app.manager.subscribe();
    let jobs = run(&app.router, "local -$ anime : characters(alice)").await;
    let id = jobs[0]["id"].as_i64().unwrap();
    failure_of(&mut events, id).await;
    wait_for_status(&app.router, id, "WAITING").await;

    app.factory.backend(SERVER).set_reachable(true);
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while app.manager.reachable_backends().await.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("backend comes back");

    let response = post(&app.router, &format!("/api/v1/jobs/{id}/run")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["status"], "WAITING");
    wait_for_status(&app.router, id, "FINISHED").await;
}

#[tokio::test]
async fn reload_resets_finished_job_and_picks_up_catalog_edits() {
    let app = common::build_test_app().await;
    let jobs = run(&app.router, "local -$ anime : characters(alice)").await;
    let id = jobs[0]["id"].as_i64().unwrap();
    wait_for_status(&app.router, id, "FINISHED").await;

    let alice = app.seeded.items["alice"].id;
    assert!(
        app.store
            .update_item(alice, |item| item.positive_prompt = "alice, red scarf".into())
            .await
    );

    let response = post(&app.router, &format!("/api/v1/jobs/{id}/reload")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "WAITING");
    assert!(json["data"]["positive_prompt"]
        .as_str()
        .unwrap()
        .contains("red scarf"));

    wait_for_status(&app.router, id, "FINISHED").await;
    let submitted = app.factory.backend(SERVER).submitted();
    assert_eq!(submitted.len(), 2);
}

#[tokio::test]
async fn failed_job_stays_processing_until_reloaded() {
    let app = common::build_test_app().await;
    app.factory.backend(SERVER).set_outcome(FakeOutcome::Fail);
    let mut events = app.manager.subscribe();

    let jobs = run(&app.router, "local -$ anime : characters(alice)").await;
    let id = jobs[0]["id"].as_i64().unwrap();
    let error = failure_of(&mut events, id).await;
    assert!(error.contains("CUDA out of memory"));
    wait_for_status(&app.router, id, "PROCESSING").await;

    app.factory.backend(SERVER).set_outcome(FakeOutcome::Succeed);
    let response = post(&app.router, &format!("/api/v1/jobs/{id}/reload")).await;
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_status(&app.router, id, "FINISHED").await;
}

#[tokio::test]
async fn missing_job_returns_404() {
    let app = common::build_test_app().await;

    let response = get(&app.router, "/api/v1/jobs/999").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "job with id 999 not found");

    assert_eq!(post(&app.router, "/api/v1/jobs/999/run").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        post(&app.router, "/api/v1/jobs/999/reload").await.status(),
        StatusCode::NOT_FOUND
    );
}
