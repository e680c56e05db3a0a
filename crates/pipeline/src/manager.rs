//! The job manager: a backend prober and a serial job consumer.
//!
//! [`JobManager::start`] spawns two long-lived tasks. The prober refreshes
//! the reachable-backend table every `probe_interval`; the consumer pops
//! job ids from an unbounded FIFO and runs each one to completion before
//! taking the next. Lifecycle events are broadcast via a
//! [`tokio::sync::broadcast`] channel; call [`JobManager::subscribe`] to
//! receive them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bowl_comfyui::backend::{BackendError, OutputImage};
use bowl_comfyui::processor::await_completion;
use bowl_core::error::CoreError;
use bowl_core::types::DbId;
use bowl_db::models::job::Job;
use bowl_db::models::status::JobStatus;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::backends::{probe_cycle, BackendFactory, BackendTable};
use crate::error::{PipelineError, PipelineResult, StoreError};
use crate::events::JobEvent;
use crate::payload::{build_payload, Template};
use crate::store::{AssetCatalog, JobStore};

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Image type ComfyUI gives saved (non-preview) outputs.
const SAVED_IMAGE_KIND: &str = "output";

/// Timing knobs of the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub probe_interval: Duration,
    /// Per-probe deadline.
    pub probe_timeout: Duration,
    /// Longest wait for a submitted prompt's terminal event.
    pub completion_timeout: Duration,
    /// Per-task deadline when shutting down.
    pub shutdown_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
            completion_timeout: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Where job ids go to be executed.
#[cfg_attr(test, mockall::automock)]
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job_id: DbId);
}

/// How one dequeued job ended.
#[derive(Debug)]
enum Outcome {
    Finished { result_path: String },
    /// Not WAITING; `None` when the stored status id is unknown.
    Skipped(Option<JobStatus>),
}

/// State shared by the two tasks.
struct Dispatcher {
    store: Arc<dyn JobStore>,
    catalog: Arc<dyn AssetCatalog>,
    table: BackendTable,
    event_tx: broadcast::Sender<JobEvent>,
    config: ManagerConfig,
}

/// Long-lived dispatcher of generation jobs.
///
/// Created once at startup via [`JobManager::start`]; the returned `Arc`
/// can be cloned into request handlers.
pub struct JobManager {
    dispatcher: Arc<Dispatcher>,
    queue_tx: mpsc::UnboundedSender<DbId>,
    /// Cancelled during shutdown.
    cancel: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl JobManager {
    /// Spawn the prober and the consumer. Must be called inside a Tokio
    /// runtime.
    pub fn start(
        store: Arc<dyn JobStore>,
        catalog: Arc<dyn AssetCatalog>,
        factory: Arc<dyn BackendFactory>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let dispatcher = Arc::new(Dispatcher {
            store,
            catalog,
            table: BackendTable::default(),
            event_tx,
            config,
        });

        let prober = tokio::spawn(run_prober(
            Arc::clone(&dispatcher),
            factory,
            cancel.child_token(),
        ));
        let consumer = tokio::spawn(run_consumer(
            Arc::clone(&dispatcher),
            queue_rx,
            cancel.child_token(),
        ));

        tracing::info!(
            probe_interval_ms = dispatcher.config.probe_interval.as_millis() as u64,
            completion_timeout_secs = dispatcher.config.completion_timeout.as_secs(),
            "Job manager started",
        );

        Arc::new(Self {
            dispatcher,
            queue_tx,
            cancel,
            tasks: Mutex::new(vec![("prober", prober), ("consumer", consumer)]),
        })
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.dispatcher.event_tx.subscribe()
    }

    /// Code names of the backends that passed their last probe, sorted.
    pub async fn reachable_backends(&self) -> Vec<String> {
        self.dispatcher.table.code_names().await
    }

    /// Stop both tasks.
    ///
    /// The consumer finishes its in-flight job and takes no new ones. Each
    /// task gets `shutdown_timeout` to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job manager");
        self.cancel.cancel();

        let mut tasks = self.tasks.lock().await;
        for (name, handle) in tasks.drain(..) {
            if tokio::time::timeout(self.dispatcher.config.shutdown_timeout, handle)
                .await
                .is_err()
            {
                tracing::warn!(task = name, "Task did not stop within the shutdown timeout");
            }
        }

        tracing::info!("Job manager shut down complete");
    }
}

impl JobQueue for JobManager {
    fn enqueue(&self, job_id: DbId) {
        if self.queue_tx.send(job_id).is_err() {
            tracing::warn!(job_id, "Job queue is closed; job not enqueued");
        } else {
            tracing::debug!(job_id, "Job enqueued");
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn run_prober(
    dispatcher: Arc<Dispatcher>,
    factory: Arc<dyn BackendFactory>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(dispatcher.config.probe_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = probe_cycle(
                    &dispatcher.table,
                    dispatcher.catalog.as_ref(),
                    factory.as_ref(),
                    dispatcher.config.probe_timeout,
                    &dispatcher.event_tx,
                )
                .await
                {
                    tracing::error!(error = %e, "Backend probe cycle failed");
                }
            }
        }
    }
    tracing::debug!("Prober stopped");
}

async fn run_consumer(
    dispatcher: Arc<Dispatcher>,
    mut queue_rx: mpsc::UnboundedReceiver<DbId>,
    cancel: CancellationToken,
) {
    loop {
        let job_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = queue_rx.recv() => match next {
                Some(job_id) => job_id,
                None => break,
            },
        };

        match dispatcher.process(job_id).await {
            Ok(Outcome::Finished { result_path }) => {
                tracing::info!(job_id, result_path = %result_path, "Job finished");
                let _ = dispatcher.event_tx.send(JobEvent::JobFinished {
                    job_id,
                    result_path,
                });
            }
            Ok(Outcome::Skipped(status)) => {
                tracing::debug!(job_id, ?status, "Job is not waiting; skipped");
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Job failed");
                let _ = dispatcher.event_tx.send(JobEvent::JobFailed {
                    job_id,
                    error: e.to_string(),
                });
            }
        }
    }
    tracing::debug!("Consumer stopped");
}

// ---------------------------------------------------------------------------
// Job execution
// ---------------------------------------------------------------------------

impl Dispatcher {
    async fn process(&self, job_id: DbId) -> PipelineResult<Outcome> {
        let job = self.store.find_job(job_id).await?.ok_or(CoreError::NotFound {
            entity: "job",
            id: job_id,
        })?;
        let status = job.status();
        if status != Some(JobStatus::Waiting) {
            if status.is_none() {
                tracing::warn!(
                    job_id,
                    status_id = job.status_id,
                    "Job has an unknown status id; not runnable",
                );
            }
            return Ok(Outcome::Skipped(status));
        }

        let handle = self
            .table
            .get(&job.server_code_name)
            .await
            .ok_or_else(|| PipelineError::BackendUnreachable(job.server_code_name.clone()))?;
        let payload = self.payload(&job).await?;

        let mut events = handle.backend.events().await?;
        let prompt_id = handle.backend.submit(&payload).await?;
        if !self.store.mark_processing(job.id, &prompt_id).await? {
            return Err(StoreError::Invariant(format!(
                "job {} left WAITING while it was being submitted",
                job.id
            ))
            .into());
        }
        tracing::info!(
            job_id = job.id,
            backend = %job.server_code_name,
            prompt_id = %prompt_id,
            "Job submitted",
        );
        let _ = self.event_tx.send(JobEvent::JobSubmitted {
            job_id: job.id,
            backend: job.server_code_name.clone(),
            prompt_id: prompt_id.clone(),
        });

        await_completion(&mut events, &prompt_id, self.config.completion_timeout).await?;
        drop(events);

        let images = handle.backend.fetch_images(&prompt_id).await?;
        let image = pick_result(images).ok_or_else(|| BackendError::NoOutput(prompt_id.clone()))?;
        save_result(image.bytes, PathBuf::from(&job.result_path)).await?;

        if !self.store.mark_finished(job.id).await? {
            return Err(StoreError::Invariant(format!(
                "job {} left PROCESSING before its result was stored",
                job.id
            ))
            .into());
        }
        Ok(Outcome::Finished {
            result_path: job.result_path,
        })
    }

    /// Resolve the job's template and build the workflow to submit.
    async fn payload(&self, job: &Job) -> PipelineResult<serde_json::Value> {
        if let Some(code_name) = &job.fixer_code_name {
            let fixer = self
                .catalog
                .find_fixer(code_name)
                .await?
                .ok_or_else(|| CoreError::Reference(vec![format!("Unknown fixer `{code_name}`")]))?;
            if let Some(parent_id) = job.parent_job_id {
                let parent = self.store.find_job(parent_id).await?;
                if parent.and_then(|p| p.status()) != Some(JobStatus::Finished) {
                    return Err(PipelineError::ParentNotFinished {
                        job: job.id,
                        parent: parent_id,
                    });
                }
            }
            return Ok(build_payload(job, Template::Fixer(&fixer))?);
        }

        let code_name = job.generator_code_name.as_deref().ok_or_else(|| {
            CoreError::Validation(format!("job {} names neither a generator nor a fixer", job.id))
        })?;
        let generator = self
            .catalog
            .find_generator(code_name)
            .await?
            .ok_or_else(|| CoreError::Reference(vec![format!("Unknown generator `{code_name}`")]))?;
        Ok(build_payload(job, Template::Generator(&generator))?)
    }
}

/// The first saved image, or the first image of any kind.
fn pick_result(images: Vec<OutputImage>) -> Option<OutputImage> {
    let saved = images.iter().position(|i| i.kind == SAVED_IMAGE_KIND).unwrap_or(0);
    images.into_iter().nth(saved)
}

/// Decode `bytes` and write them as PNG to `path`, creating parent
/// directories.
async fn save_result(bytes: Vec<u8>, path: PathBuf) -> PipelineResult<()> {
    tokio::task::spawn_blocking(move || -> PipelineResult<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let image = image::load_from_memory(&bytes)?;
        image.save_with_format(&path, image::ImageFormat::Png)?;
        Ok(())
    })
    .await
    .map_err(|e| CoreError::Internal(format!("result writer task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::memory::InMemoryStore;
    use crate::store::MockJobStore;
    use crate::testing::{seed_catalog, FakeFactory, GENERATOR, SERVER, SERVER_HOST};

    fn waiting_job(id: DbId) -> Job {
        Job {
            id,
            project_id: 1,
            command_id: 1,
            group_items: Vec::new(),
            server_code_name: SERVER.into(),
            server_host: SERVER_HOST.into(),
            generator_code_name: Some(GENERATOR.into()),
            fixer_code_name: None,
            parent_job_id: None,
            source_image: None,
            status_id: JobStatus::Waiting.id(),
            prompt_id: None,
            positive_prompt: "alice, sit".into(),
            negative_prompt: String::new(),
            control_image: None,
            loras: Vec::new(),
            ip_adapters: Vec::new(),
            region_prompts: Vec::new(),
            result_path: "/results/command_1/a.png".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    /// A dispatcher over `store` whose backend table already holds the
    /// seeded server.
    async fn dispatcher(store: MockJobStore) -> (Dispatcher, Arc<FakeFactory>) {
        let catalog = Arc::new(InMemoryStore::new());
        seed_catalog(&catalog).await;
        let factory = Arc::new(FakeFactory::new());
        let (event_tx, _) = broadcast::channel(16);
        let table = BackendTable::default();
        probe_cycle(&table, catalog.as_ref(), factory.as_ref(), Duration::from_millis(50), &event_tx)
            .await
            .unwrap();
        assert_eq!(table.code_names().await, vec![SERVER.to_string()]);

        let dispatcher = Dispatcher {
            store: Arc::new(store),
            catalog,
            table,
            event_tx,
            config: ManagerConfig::default(),
        };
        (dispatcher, factory)
    }

    #[tokio::test]
    async fn failed_lookup_surfaces_as_store_error() {
        let mut store = MockJobStore::new();
        store
            .expect_find_job()
            .returning(|_| Err(StoreError::Invariant("connection lost".into())));
        store.expect_mark_processing().never();
        let (dispatcher, factory) = dispatcher(store).await;

        assert_matches!(
            dispatcher.process(5).await,
            Err(PipelineError::Store(StoreError::Invariant(_)))
        );
        assert!(factory.backend(SERVER).submitted().is_empty());
    }

    #[tokio::test]
    async fn failed_status_write_stops_the_job() {
        let mut store = MockJobStore::new();
        store
            .expect_find_job()
            .returning(|id| Ok(Some(waiting_job(id))));
        store
            .expect_mark_processing()
            .times(1)
            .returning(|_, _| Err(StoreError::Invariant("connection lost".into())));
        store.expect_mark_finished().never();
        let (dispatcher, factory) = dispatcher(store).await;

        assert_matches!(
            dispatcher.process(5).await,
            Err(PipelineError::Store(StoreError::Invariant(_)))
        );
        assert_eq!(factory.backend(SERVER).submitted().len(), 1);
    }

    #[tokio::test]
    async fn unknown_status_id_is_skipped() {
        let mut store = MockJobStore::new();
        store.expect_find_job().returning(|id| {
            let mut job = waiting_job(id);
            job.status_id = 99;
            Ok(Some(job))
        });
        store.expect_mark_processing().never();
        store.expect_mark_finished().never();
        let (dispatcher, factory) = dispatcher(store).await;

        assert_matches!(dispatcher.process(5).await, Ok(Outcome::Skipped(None)));
        assert!(factory.backend(SERVER).submitted().is_empty());
    }

    fn image(kind: &str, node: &str) -> OutputImage {
        OutputImage {
            node_id: node.into(),
            filename: format!("{node}.png"),
            kind: kind.into(),
            bytes: Vec::new(),
        }
    }

    #[test]
    fn saved_image_is_preferred_over_previews() {
        let picked = pick_result(vec![image("temp", "8"), image("output", "9")]).unwrap();
        assert_eq!(picked.node_id, "9");
    }

    #[test]
    fn falls_back_to_first_image() {
        let picked = pick_result(vec![image("temp", "8"), image("temp", "10")]).unwrap();
        assert_eq!(picked.node_id, "8");
        assert!(pick_result(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn result_is_written_as_png_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("command_1").join("a.png");
        let bytes = crate::testing::png_bytes().unwrap();

        save_result(bytes, path.clone()).await.unwrap();
        assert!(image::open(&path).is_ok());
    }

    #[tokio::test]
    async fn undecodable_result_is_an_image_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_result(b"not an image".to_vec(), dir.path().join("x.png"))
            .await
            .unwrap_err();
        assert_matches!(err, PipelineError::Image(_));
    }
}
