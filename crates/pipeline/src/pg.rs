//! PostgreSQL-backed stores over the `bowl-db` repositories.

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
use bowl_db::repositories::{
    CommandRepo, FixerRepo, GeneratorRepo, GroupRepo, ItemRepo, JobRepo, ServerRepo,
};
use bowl_db::DbPool;

use crate::error::StoreError;
use crate::store::{AssetCatalog, JobStore};

/// Implements both store traits on a shared connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl AssetCatalog for PgStore {
    async fn list_servers(&self) -> Result<Vec<Server>, StoreError> {
        Ok(ServerRepo::list_enabled(&self.pool).await?)
    }

    async fn find_server(&self, code_name: &str) -> Result<Option<Server>, StoreError> {
        Ok(ServerRepo::find_by_code_name(&self.pool, code_name).await?)
    }

    async fn find_generator(&self, code_name: &str) -> Result<Option<Generator>, StoreError> {
        Ok(GeneratorRepo::find_by_code_name(&self.pool, code_name).await?)
    }

    async fn find_fixer(&self, code_name: &str) -> Result<Option<Fixer>, StoreError> {
        Ok(FixerRepo::find_by_code_name(&self.pool, code_name).await?)
    }

    async fn find_group(&self, code_name: &str) -> Result<Option<Group>, StoreError> {
        Ok(GroupRepo::find_by_code_name(&self.pool, code_name).await?)
    }

    async fn list_items(
        &self,
        group_id: DbId,
        filter: &ItemFilter,
    ) -> Result<Vec<Item>, StoreError> {
        Ok(ItemRepo::list_by_group(&self.pool, group_id, filter).await?)
    }

    async fn find_item(&self, id: DbId) -> Result<Option<Item>, StoreError> {
        Ok(ItemRepo::find_by_id(&self.pool, id).await?)
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(bowl_db::health_check(&self.pool).await?)
    }

    async fn create_command(
        &self,
        input: &CreateCommand,
        insert_at: Option<i32>,
    ) -> Result<CommandRecord, StoreError> {
        Ok(CommandRepo::create(&self.pool, input, insert_at).await?)
    }

    async fn find_command(&self, id: DbId) -> Result<Option<CommandRecord>, StoreError> {
        Ok(CommandRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_commands(&self, project_id: DbId) -> Result<Vec<CommandRecord>, StoreError> {
        Ok(CommandRepo::list_by_project(&self.pool, project_id).await?)
    }

    async fn delete_command(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(CommandRepo::delete(&self.pool, id).await?)
    }

    async fn move_command(
        &self,
        id: DbId,
        position: i32,
    ) -> Result<Option<CommandRecord>, StoreError> {
        Ok(CommandRepo::move_to(&self.pool, id, position).await?)
    }

    async fn create_jobs(&self, jobs: &[NewJob]) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::create_batch(&self.pool, jobs).await?)
    }

    async fn find_job(&self, id: DbId) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_jobs_by_command(&self, command_id: DbId) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::list_by_command(&self.pool, command_id).await?)
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::list_by_status(&self.pool, status).await?)
    }

    async fn mark_processing(&self, id: DbId, prompt_id: &str) -> Result<bool, StoreError> {
        Ok(JobRepo::mark_processing(&self.pool, id, prompt_id).await?)
    }

    async fn mark_finished(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(JobRepo::mark_finished(&self.pool, id).await?)
    }

    async fn reset_job(&self, id: DbId, refresh: &JobRefresh) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::reset(&self.pool, id, refresh).await?)
    }
}
