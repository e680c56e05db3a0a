//! Lifecycle events broadcast by the [`JobManager`](crate::JobManager).

use bowl_core::types::DbId;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    BackendOnline {
        backend: String,
    },
    BackendOffline {
        backend: String,
    },
    JobSubmitted {
        job_id: DbId,
        backend: String,
        prompt_id: String,
    },
    JobFinished {
        job_id: DbId,
        result_path: String,
    },
    /// The job keeps its last persisted status.
    JobFailed {
        job_id: DbId,
        error: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Option<DbId> {
        match self {
            JobEvent::JobSubmitted { job_id, .. }
            | JobEvent::JobFinished { job_id, .. }
            | JobEvent::JobFailed { job_id, .. } => Some(*job_id),
            JobEvent::BackendOnline { .. } | JobEvent::BackendOffline { .. } => None,
        }
    }
}
