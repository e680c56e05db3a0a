//! Store traits injected into the pipeline.
//!
//! [`AssetCatalog`] is the read side (servers, templates, groups, items);
//! [`JobStore`] persists commands and jobs. [`crate::pg::PgStore`] backs
//! both with PostgreSQL and [`crate::memory::InMemoryStore`] keeps them in
//! process.

use async_trait::async_trait;
use bowl_core::command::ItemFilter;
use bowl_core::types::DbId;
use bowl_db::models::command::{CommandRecord, CreateCommand};
use bowl_db::models::group::Group;
use bowl_db::models::item::Item;
use bowl_db::models::job::{Job, JobRefresh, NewJob};
use bowl_db::models::server::Server;
use bowl_db::models::status::JobStatus;
use bowl_db::models::template::{Fixer, Generator};

use crate::error::StoreError;

/// Read access to the asset catalog, templates and servers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetCatalog: Send + Sync {
    /// Enabled servers, ordered by code name.
    async fn list_servers(&self) -> Result<Vec<Server>, StoreError>;
    async fn find_server(&self, code_name: &str) -> Result<Option<Server>, StoreError>;
    async fn find_generator(&self, code_name: &str) -> Result<Option<Generator>, StoreError>;
    async fn find_fixer(&self, code_name: &str) -> Result<Option<Fixer>, StoreError>;
    async fn find_group(&self, code_name: &str) -> Result<Option<Group>, StoreError>;
    /// Items of a group passing `filter`, in catalog order.
    async fn list_items(&self, group_id: DbId, filter: &ItemFilter)
        -> Result<Vec<Item>, StoreError>;
    async fn find_item(&self, id: DbId) -> Result<Option<Item>, StoreError>;
}

/// Persistence for commands and jobs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    async fn create_command(
        &self,
        input: &CreateCommand,
        insert_at: Option<i32>,
    ) -> Result<CommandRecord, StoreError>;
    async fn find_command(&self, id: DbId) -> Result<Option<CommandRecord>, StoreError>;
    async fn list_commands(&self, project_id: DbId) -> Result<Vec<CommandRecord>, StoreError>;
    /// Deletes the command and its jobs. Returns `false` if it did not exist.
    async fn delete_command(&self, id: DbId) -> Result<bool, StoreError>;
    async fn move_command(
        &self,
        id: DbId,
        position: i32,
    ) -> Result<Option<CommandRecord>, StoreError>;

    /// Insert a whole expansion batch, all-or-nothing.
    async fn create_jobs(&self, jobs: &[NewJob]) -> Result<Vec<Job>, StoreError>;
    async fn find_job(&self, id: DbId) -> Result<Option<Job>, StoreError>;
    async fn list_jobs_by_command(&self, command_id: DbId) -> Result<Vec<Job>, StoreError>;
    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;
    /// `WAITING -> PROCESSING`; `false` if the job was not waiting.
    async fn mark_processing(&self, id: DbId, prompt_id: &str) -> Result<bool, StoreError>;
    /// `PROCESSING -> FINISHED`; `false` if the job was not processing.
    async fn mark_finished(&self, id: DbId) -> Result<bool, StoreError>;
    /// Back to `WAITING` with refreshed content, from any status.
    async fn reset_job(&self, id: DbId, refresh: &JobRefresh) -> Result<Option<Job>, StoreError>;
}
