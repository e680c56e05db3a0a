use bowl_comfyui::backend::BackendError;
use bowl_core::error::CoreError;
use bowl_core::types::DbId;

/// Errors from the store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A store-level invariant would be violated (e.g. illegal status
    /// transition, dangling parent index).
    #[error("Store invariant violated: {0}")]
    Invariant(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The job's backend is not in the reachable table.
    #[error("Backend `{0}` is not reachable")]
    BackendUnreachable(String),

    #[error("Parent job {parent} of job {job} has not finished")]
    ParentNotFinished { job: DbId, parent: DbId },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
