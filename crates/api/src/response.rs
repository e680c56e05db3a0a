//! Shared response envelope types for API handlers.
//!
//! All API responses use a `{ "data": ... }` envelope. Use [`DataResponse`]
//! instead of ad-hoc `serde_json::json!({ "data": ... })`.

use bowl_db::models::job::Job;
use bowl_db::models::status::JobStatus;
use bowl_pipeline::service::RunOutcome;
use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// A job with its status spelled out next to the raw `status_id`.
///
/// `status` is `null` for an id outside the status table.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: Job,
    pub status: Option<JobStatus>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            status: job.status(),
            job,
        }
    }
}

/// Result of running a command.
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub produced: usize,
    pub jobs: Vec<JobResponse>,
}

impl From<RunOutcome> for RunResponse {
    fn from(outcome: RunOutcome) -> Self {
        Self {
            produced: outcome.produced,
            jobs: outcome.jobs.into_iter().map(JobResponse::from).collect(),
        }
    }
}
