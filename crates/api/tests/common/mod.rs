#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;

use bowl_api::config::ServerConfig;
use bowl_api::state::AppState;
use bowl_pipeline::memory::InMemoryStore;
use bowl_pipeline::testing::{seed_catalog, FakeFactory, Seeded, SERVER};
use bowl_pipeline::{CommandService, JobManager, ManagerConfig};

/// Router plus the handles tests use to script and inspect the backend.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
    pub factory: Arc<FakeFactory>,
    pub manager: Arc<JobManager>,
    pub seeded: Seeded,
    _results: TempDir,
}

/// Build a test `ServerConfig` writing results under `results`.
pub fn test_config(results: &TempDir) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        results_dir: results.path().to_path_buf(),
        ..ServerConfig::default()
    }
}

fn manager_config() -> ManagerConfig {
    ManagerConfig {
        probe_interval: Duration::from_millis(10),
        probe_timeout: Duration::from_millis(50),
        completion_timeout: Duration::from_millis(500),
        shutdown_timeout: Duration::from_secs(1),
    }
}

/// Build the full application over a seeded in-memory catalog and a fake
/// backend, waiting until the backend has passed its first probe.
pub async fn build_test_app() -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let seeded = seed_catalog(&store).await;
    let factory = Arc::new(FakeFactory::new());
    factory.backend(SERVER);

    let results = tempfile::tempdir().unwrap();
    let config = test_config(&results);

    let manager = JobManager::start(
        store.clone(),
        store.clone(),
        factory.clone(),
        manager_config(),
    );
    let service = CommandService::new(
        store.clone(),
        store.clone(),
        manager.clone(),
        config.results_dir.clone(),
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.reachable_backends().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("fake backend comes online");

    let state = AppState {
        config: Arc::new(config),
        service,
        store: store.clone(),
        manager: manager.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE]);

    TestApp {
        router: bowl_api::build_app(state, cors),
        store,
        factory,
        manager,
        seeded,
        _results: results,
    }
}

pub async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn post(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn delete(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Create a command in project 1 and return its id.
pub async fn create_command(app: &Router, code: &str) -> i64 {
    let response = post_json(
        app,
        "/api/v1/projects/1/commands",
        serde_json::json!({ "code": code }),
    )
    .await;
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    body_json(response).await["data"]["id"].as_i64().unwrap()
}

/// Poll a job until it reports `status`.
pub async fn wait_for_status(app: &Router, job_id: i64, status: &str) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let json = body_json(get(app, &format!("/api/v1/jobs/{job_id}")).await).await;
            if json["data"]["status"] == status {
                return json["data"].clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {job_id} reaches {status}"))
}
