//! Job expansion and execution.
//!
//! Ties the pure domain logic in `bowl-core` to storage and the generation
//! backends: the store traits and their implementations, reference
//! validation, the expansion engine, payload building, the [`JobManager`]
//! and the command/job operations in [`service`].

pub mod assembly;
pub mod backends;
pub mod error;
pub mod events;
pub mod expansion;
pub mod manager;
pub mod memory;
pub mod payload;
pub mod pg;
pub mod service;
pub mod store;
pub mod validation;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{PipelineError, PipelineResult, StoreError};
pub use manager::{JobManager, ManagerConfig};
pub use service::CommandService;
