//! Command and job operations exposed to callers.
//!
//! [`CommandService`] composes the parser, validation, expansion and the
//! stores, and hands runnable job ids to a [`JobQueue`].

use std::path::PathBuf;
use std::sync::Arc;

use bowl_core::command::{parse, ParsedCommand};
use bowl_core::error::CoreError;
use bowl_core::types::DbId;
use bowl_db::models::command::{CommandRecord, CreateCommand};
use bowl_db::models::job::Job;
use bowl_db::models::status::JobStatus;
use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};
use crate::expansion::{expand, rederive};
use crate::manager::JobQueue;
use crate::store::{AssetCatalog, JobStore};
use crate::validation::validate_command;

/// Jobs created by one run of a command.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub produced: usize,
    pub jobs: Vec<Job>,
}

#[derive(Clone)]
pub struct CommandService {
    store: Arc<dyn JobStore>,
    catalog: Arc<dyn AssetCatalog>,
    queue: Arc<dyn JobQueue>,
    results_dir: PathBuf,
}

impl CommandService {
    pub fn new(
        store: Arc<dyn JobStore>,
        catalog: Arc<dyn AssetCatalog>,
        queue: Arc<dyn JobQueue>,
        results_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            catalog,
            queue,
            results_dir: results_dir.into(),
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Parse without touching storage.
    pub fn preview(&self, text: &str) -> PipelineResult<ParsedCommand> {
        Ok(parse(text)?)
    }

    /// Parse, validate references, then store at `insert_at` (or last).
    pub async fn add_command(
        &self,
        project_id: DbId,
        text: &str,
        insert_at: Option<i32>,
    ) -> PipelineResult<CommandRecord> {
        let parsed = parse(text)?;
        validate_command(&parsed, self.catalog.as_ref()).await?;

        let command_json = serde_json::to_value(&parsed)
            .map_err(|e| CoreError::Internal(format!("failed to serialize command: {e}")))?;
        let record = self
            .store
            .create_command(
                &CreateCommand {
                    project_id,
                    command_code: text.trim().to_string(),
                    command_json,
                },
                insert_at,
            )
            .await?;

        tracing::info!(
            command_id = record.id,
            project_id,
            sort_order = record.sort_order,
            "Command added",
        );
        Ok(record)
    }

    pub async fn list_commands(&self, project_id: DbId) -> PipelineResult<Vec<CommandRecord>> {
        Ok(self.store.list_commands(project_id).await?)
    }

    pub async fn move_command(&self, id: DbId, position: i32) -> PipelineResult<CommandRecord> {
        self.store
            .move_command(id, position)
            .await?
            .ok_or_else(|| command_not_found(id))
    }

    /// Deletes the command together with its jobs.
    pub async fn delete_command(&self, id: DbId) -> PipelineResult<()> {
        if !self.store.delete_command(id).await? {
            return Err(command_not_found(id));
        }
        tracing::info!(command_id = id, "Command deleted");
        Ok(())
    }

    /// Expand the stored command, persist the jobs all-or-nothing, and
    /// enqueue every one of them in creation order.
    pub async fn run_command(&self, id: DbId) -> PipelineResult<RunOutcome> {
        let record = self
            .store
            .find_command(id)
            .await?
            .ok_or_else(|| command_not_found(id))?;
        let command: ParsedCommand = serde_json::from_value(record.command_json.clone())
            .map_err(|e| CoreError::Internal(format!("stored command {id} is unreadable: {e}")))?;

        let expansion = expand(&command, &record, self.catalog.as_ref(), &self.results_dir).await?;
        if expansion.jobs.is_empty() {
            tracing::info!(command_id = id, "Command produced no jobs");
            return Ok(RunOutcome {
                produced: 0,
                jobs: Vec::new(),
            });
        }

        let jobs = self.store.create_jobs(&expansion.jobs).await?;
        for job in &jobs {
            self.queue.enqueue(job.id);
        }
        tracing::info!(command_id = id, produced = jobs.len(), "Command run");
        Ok(RunOutcome {
            produced: jobs.len(),
            jobs,
        })
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    pub async fn list_jobs(&self, command_id: DbId) -> PipelineResult<Vec<Job>> {
        if self.store.find_command(command_id).await?.is_none() {
            return Err(command_not_found(command_id));
        }
        Ok(self.store.list_jobs_by_command(command_id).await?)
    }

    pub async fn get_job(&self, id: DbId) -> PipelineResult<Job> {
        self.store.find_job(id).await?.ok_or_else(|| job_not_found(id))
    }

    /// Enqueue a WAITING job.
    pub async fn run_job(&self, id: DbId) -> PipelineResult<Job> {
        let job = self.get_job(id).await?;
        match job.status() {
            Some(JobStatus::Waiting) => {}
            Some(status) => {
                return Err(CoreError::Conflict(format!(
                    "job {id} is {status:?}; only waiting jobs can be run"
                ))
                .into())
            }
            None => {
                return Err(CoreError::Conflict(format!(
                    "job {id} has unknown status id {}",
                    job.status_id
                ))
                .into())
            }
        }
        self.queue.enqueue(job.id);
        Ok(job)
    }

    /// Enqueue every WAITING job, oldest first. Called once at startup so
    /// work accepted by a previous process is not lost.
    pub async fn requeue_waiting(&self) -> PipelineResult<usize> {
        let mut jobs = self.store.list_jobs_by_status(JobStatus::Waiting).await?;
        jobs.sort_by_key(|j| j.id);
        for job in &jobs {
            self.queue.enqueue(job.id);
        }
        if !jobs.is_empty() {
            tracing::info!(count = jobs.len(), "Re-enqueued waiting jobs");
        }
        Ok(jobs.len())
    }

    /// Rebuild the job from the current catalog, reset it to WAITING and
    /// enqueue it. This is the only way back from FINISHED.
    pub async fn reload_job(&self, id: DbId) -> PipelineResult<Job> {
        let job = self.get_job(id).await?;
        let refresh = rederive(&job, self.catalog.as_ref()).await?;
        let job = self
            .store
            .reset_job(id, &refresh)
            .await?
            .ok_or_else(|| job_not_found(id))?;

        tracing::info!(job_id = id, "Job reloaded");
        self.queue.enqueue(job.id);
        Ok(job)
    }
}

fn command_not_found(id: DbId) -> PipelineError {
    CoreError::NotFound {
        entity: "command",
        id,
    }
    .into()
}

fn job_not_found(id: DbId) -> PipelineError {
    CoreError::NotFound { entity: "job", id }.into()
}
