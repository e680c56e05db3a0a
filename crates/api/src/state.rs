use std::sync::Arc;

use bowl_pipeline::store::JobStore;
use bowl_pipeline::{CommandService, JobManager};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Command and job operations.
    pub service: CommandService,
    /// Used by the health check.
    pub store: Arc<dyn JobStore>,
    pub manager: Arc<JobManager>,
}
