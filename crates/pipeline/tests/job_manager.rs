//! End-to-end runs of the job manager against the in-memory store and a
//! scripted backend.

use std::sync::Arc;
use std::time::Duration;

use bowl_db::models::status::JobStatus;
use bowl_pipeline::events::JobEvent;
use bowl_pipeline::memory::InMemoryStore;
use bowl_pipeline::store::JobStore;
use bowl_pipeline::testing::{seed_catalog, FakeFactory, FakeOutcome, SERVER};
use bowl_pipeline::{CommandService, JobManager, ManagerConfig};
use tempfile::TempDir;
use tokio::sync::broadcast;

const EVENT_WAIT: Duration = Duration::from_secs(5);

struct Harness {
    store: Arc<InMemoryStore>,
    factory: Arc<FakeFactory>,
    manager: Arc<JobManager>,
    service: CommandService,
    _results: TempDir,
}

fn config() -> ManagerConfig {
    ManagerConfig {
        probe_interval: Duration::from_millis(10),
        probe_timeout: Duration::from_millis(50),
        completion_timeout: Duration::from_millis(300),
        shutdown_timeout: Duration::from_secs(1),
    }
}

async fn harness(reachable: bool) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    seed_catalog(&store).await;
    let factory = Arc::new(FakeFactory::new());
    factory.backend(SERVER).set_reachable(reachable);

    let manager = JobManager::start(store.clone(), store.clone(), factory.clone(), config());
    let results = tempfile::tempdir().unwrap();
    let service = CommandService::new(store.clone(), store.clone(), manager.clone(), results.path());

    if reachable {
        tokio::time::timeout(EVENT_WAIT, async {
            while manager.reachable_backends().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("backend comes online");
    }

    Harness {
        store,
        factory,
        manager,
        service,
        _results: results,
    }
}

async fn next_event(
    rx: &mut broadcast::Receiver<JobEvent>,
    wanted: impl Fn(&JobEvent) -> bool,
) -> JobEvent {
    tokio::time::timeout(EVENT_WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event within timeout")
}

fn is_terminal(event: &JobEvent) -> bool {
    matches!(event, JobEvent::JobFinished { .. } | JobEvent::JobFailed { .. })
}

async fn add_and_run(h: &Harness, text: &str) -> Vec<bowl_db::models::job::Job> {
    let record = h.service.add_command(1, text, None).await.unwrap();
    h.service.run_command(record.id).await.unwrap().jobs
}

#[tokio::test]
async fn primary_and_fixer_jobs_finish_in_order() {
    let h = harness(true).await;
    let mut rx = h.manager.subscribe();
    let jobs = add_and_run(&h, "local -$ anime : characters(alice) > upscale").await;
    assert_eq!(jobs.len(), 2);

    for job in &jobs {
        let event = next_event(&mut rx, is_terminal).await;
        assert_eq!(
            event,
            JobEvent::JobFinished {
                job_id: job.id,
                result_path: job.result_path.clone(),
            }
        );
        let stored = h.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), Some(JobStatus::Finished));
        assert!(stored.prompt_id.is_some());
        assert!(image::open(&job.result_path).is_ok());
    }

    let submitted = h.factory.backend(SERVER).submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0]["6"]["inputs"]["text"], "alice");
    assert_eq!(submitted[1]["1"]["inputs"]["image"], jobs[0].result_path.as_str());

    h.manager.shutdown().await;
}

#[tokio::test]
async fn execution_error_leaves_job_processing() {
    let h = harness(true).await;
    h.factory.backend(SERVER).set_outcome(FakeOutcome::Fail);
    let mut rx = h.manager.subscribe();
    let jobs = add_and_run(&h, "local -$ anime : characters(alice) > upscale").await;

    let failed = next_event(&mut rx, is_terminal).await;
    assert!(matches!(&failed, JobEvent::JobFailed { job_id, error }
        if *job_id == jobs[0].id && error.contains("CUDA out of memory")));
    let fixer = next_event(&mut rx, is_terminal).await;
    assert!(matches!(&fixer, JobEvent::JobFailed { job_id, error }
        if *job_id == jobs[1].id && error.contains("has not finished")));

    let primary = h.store.find_job(jobs[0].id).await.unwrap().unwrap();
    assert_eq!(primary.status(), Some(JobStatus::Processing));
    let fixer = h.store.find_job(jobs[1].id).await.unwrap().unwrap();
    assert_eq!(fixer.status(), Some(JobStatus::Waiting));

    h.manager.shutdown().await;
}

#[tokio::test]
async fn unreachable_backend_leaves_job_waiting() {
    let h = harness(false).await;
    let mut rx = h.manager.subscribe();
    let jobs = add_and_run(&h, "local -$ anime : characters(bob)").await;

    let event = next_event(&mut rx, is_terminal).await;
    assert!(matches!(&event, JobEvent::JobFailed { error, .. } if error.contains("not reachable")));
    let job = h.store.find_job(jobs[0].id).await.unwrap().unwrap();
    assert_eq!(job.status(), Some(JobStatus::Waiting));
    assert!(h.factory.backend(SERVER).submitted().is_empty());

    h.manager.shutdown().await;
}

#[tokio::test]
async fn timed_out_job_can_be_reloaded_and_finished() {
    let h = harness(true).await;
    let backend = h.factory.backend(SERVER);
    backend.set_outcome(FakeOutcome::Silent);
    let mut rx = h.manager.subscribe();
    let jobs = add_and_run(&h, "local -$ anime : characters(alice)").await;

    let event = next_event(&mut rx, is_terminal).await;
    assert!(matches!(&event, JobEvent::JobFailed { error, .. } if error.contains("No completion event")));
    assert_eq!(
        h.store.find_job(jobs[0].id).await.unwrap().unwrap().status(),
        Some(JobStatus::Processing)
    );

    backend.set_outcome(FakeOutcome::Succeed);
    let reloaded = h.service.reload_job(jobs[0].id).await.unwrap();
    assert_eq!(reloaded.status(), Some(JobStatus::Waiting));

    let event = next_event(&mut rx, is_terminal).await;
    assert!(matches!(event, JobEvent::JobFinished { job_id, .. } if job_id == jobs[0].id));
    assert_eq!(backend.submitted().len(), 2);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn backend_going_offline_is_reported() {
    let h = harness(true).await;
    let mut rx = h.manager.subscribe();
    h.factory.backend(SERVER).set_reachable(false);

    let event = next_event(&mut rx, |e| matches!(e, JobEvent::BackendOffline { .. })).await;
    assert_eq!(event, JobEvent::BackendOffline { backend: SERVER.into() });
    assert!(h.manager.reachable_backends().await.is_empty());

    h.manager.shutdown().await;
}
