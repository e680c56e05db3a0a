//! In-process implementation of both store traits.
//!
//! Used by tests and by the API's test harness. Mirrors the Postgres
//! semantics: dense command ordering, cascading deletes, all-or-nothing
//! job batches, and status transitions guarded on the source status.

use async_trait::async_trait;
use bowl_core::command::ItemFilter;
use bowl_core::types::{DbId, Timestamp};
use bowl_db::models::command::{CommandRecord, CreateCommand};
use bowl_db::models::group::{CreateGroup, Group};
use bowl_db::models::item::{CreateItem, Item};
use bowl_db::models::job::{Job, JobRefresh, NewJob};
use bowl_db::models::server::{CreateServer, Server};
use bowl_db::models::status::JobStatus;
use bowl_db::models::template::{CreateFixer, CreateGenerator, Fixer, Generator};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{AssetCatalog, JobStore};

#[derive(Default)]
struct MemoryState {
    last_id: DbId,
    servers: Vec<Server>,
    generators: Vec<Generator>,
    fixers: Vec<Fixer>,
    groups: Vec<Group>,
    items: Vec<Item>,
    commands: Vec<CommandRecord>,
    jobs: Vec<Job>,
}

impl MemoryState {
    fn next_id(&mut self) -> DbId {
        self.last_id += 1;
        self.last_id
    }

    fn project_commands_mut(&mut self, project_id: DbId) -> impl Iterator<Item = &mut CommandRecord> {
        self.commands
            .iter_mut()
            .filter(move |c| c.project_id == project_id)
    }

    fn job_mut(&mut self, id: DbId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }
}

fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Catalog and job storage held behind a single async lock.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Catalog seeding
    // -----------------------------------------------------------------------

    pub async fn add_server(&self, input: CreateServer) -> Server {
        let mut state = self.state.write().await;
        let server = Server {
            id: state.next_id(),
            name: input.name,
            code_name: input.code_name,
            host: input.host,
            is_enabled: true,
            created_at: now(),
            updated_at: now(),
        };
        state.servers.push(server.clone());
        server
    }

    /// Returns `false` if no server has this code name.
    pub async fn set_server_enabled(&self, code_name: &str, enabled: bool) -> bool {
        let mut state = self.state.write().await;
        match state.servers.iter_mut().find(|s| s.code_name == code_name) {
            Some(server) => {
                server.is_enabled = enabled;
                server.updated_at = now();
                true
            }
            None => false,
        }
    }

    pub async fn add_generator(&self, input: CreateGenerator) -> Generator {
        let mut state = self.state.write().await;
        let generator = Generator {
            id: state.next_id(),
            code_name: input.code_name,
            workflow_json: input.workflow_json,
            positive_prompt_title: input.positive_prompt_title,
            negative_prompt_title: input.negative_prompt_title,
            load_image_controlnet_title: input.load_image_controlnet_title,
            save_image_title: input.save_image_title,
            created_at: now(),
            updated_at: now(),
        };
        state.generators.push(generator.clone());
        generator
    }

    pub async fn add_fixer(&self, input: CreateFixer) -> Fixer {
        let mut state = self.state.write().await;
        let fixer = Fixer {
            id: state.next_id(),
            code_name: input.code_name,
            workflow_json: input.workflow_json,
            positive_prompt: input.positive_prompt,
            negative_prompt: input.negative_prompt,
            positive_prompt_title: input.positive_prompt_title,
            negative_prompt_title: input.negative_prompt_title,
            load_image_title: input.load_image_title,
            save_image_title: input.save_image_title,
            created_at: now(),
            updated_at: now(),
        };
        state.fixers.push(fixer.clone());
        fixer
    }

    pub async fn add_group(&self, input: CreateGroup) -> Group {
        let mut state = self.state.write().await;
        let group = Group {
            id: state.next_id(),
            name: input.name,
            code_name: input.code_name,
            description: input.description,
            created_at: now(),
            updated_at: now(),
        };
        state.groups.push(group.clone());
        group
    }

    pub async fn add_item(&self, input: CreateItem) -> Item {
        let mut state = self.state.write().await;
        let item = Item {
            id: state.next_id(),
            group_id: input.group_id,
            name: input.name,
            code_name: input.code_name,
            sort_order: input.sort_order,
            positive_prompt: input.positive_prompt,
            negative_prompt: input.negative_prompt,
            lora: input.lora,
            ip_adapter: input.ip_adapter,
            control_image: input.control_image,
            regions: input.regions,
            created_at: now(),
            updated_at: now(),
        };
        state.items.push(item.clone());
        item
    }

    /// Apply `edit` to an item in place. Returns `false` if it does not exist.
    pub async fn update_item(&self, id: DbId, edit: impl FnOnce(&mut Item)) -> bool {
        let mut state = self.state.write().await;
        match state.items.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                edit(item);
                item.updated_at = now();
                true
            }
            None => false,
        }
    }

    pub async fn remove_item(&self, id: DbId) -> bool {
        let mut state = self.state.write().await;
        let before = state.items.len();
        state.items.retain(|i| i.id != id);
        state.items.len() != before
    }
}

#[async_trait]
impl AssetCatalog for InMemoryStore {
    async fn list_servers(&self) -> Result<Vec<Server>, StoreError> {
        let state = self.state.read().await;
        let mut servers: Vec<Server> =
            state.servers.iter().filter(|s| s.is_enabled).cloned().collect();
        servers.sort_by(|a, b| a.code_name.cmp(&b.code_name));
        Ok(servers)
    }

    async fn find_server(&self, code_name: &str) -> Result<Option<Server>, StoreError> {
        let state = self.state.read().await;
        Ok(state.servers.iter().find(|s| s.code_name == code_name).cloned())
    }

    async fn find_generator(&self, code_name: &str) -> Result<Option<Generator>, StoreError> {
        let state = self.state.read().await;
        Ok(state.generators.iter().find(|g| g.code_name == code_name).cloned())
    }

    async fn find_fixer(&self, code_name: &str) -> Result<Option<Fixer>, StoreError> {
        let state = self.state.read().await;
        Ok(state.fixers.iter().find(|f| f.code_name == code_name).cloned())
    }

    async fn find_group(&self, code_name: &str) -> Result<Option<Group>, StoreError> {
        let state = self.state.read().await;
        Ok(state.groups.iter().find(|g| g.code_name == code_name).cloned())
    }

    async fn list_items(
        &self,
        group_id: DbId,
        filter: &ItemFilter,
    ) -> Result<Vec<Item>, StoreError> {
        let state = self.state.read().await;
        let mut items: Vec<Item> = state
            .items
            .iter()
            .filter(|i| i.group_id == group_id && filter.admits(&i.code_name))
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.sort_order, i.id));
        Ok(items)
    }

    async fn find_item(&self, id: DbId) -> Result<Option<Item>, StoreError> {
        let state = self.state.read().await;
        Ok(state.items.iter().find(|i| i.id == id).cloned())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_command(
        &self,
        input: &CreateCommand,
        insert_at: Option<i32>,
    ) -> Result<CommandRecord, StoreError> {
        let mut state = self.state.write().await;
        let count = state
            .commands
            .iter()
            .filter(|c| c.project_id == input.project_id)
            .count() as i32;
        let position = insert_at.map_or(count, |at| at.clamp(0, count));

        for command in state.project_commands_mut(input.project_id) {
            if command.sort_order >= position {
                command.sort_order += 1;
            }
        }

        let record = CommandRecord {
            id: state.next_id(),
            project_id: input.project_id,
            sort_order: position,
            command_code: input.command_code.clone(),
            command_json: input.command_json.clone(),
            created_at: now(),
            updated_at: now(),
        };
        state.commands.push(record.clone());
        Ok(record)
    }

    async fn find_command(&self, id: DbId) -> Result<Option<CommandRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.commands.iter().find(|c| c.id == id).cloned())
    }

    async fn list_commands(&self, project_id: DbId) -> Result<Vec<CommandRecord>, StoreError> {
        let state = self.state.read().await;
        let mut commands: Vec<CommandRecord> = state
            .commands
            .iter()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        commands.sort_by_key(|c| c.sort_order);
        Ok(commands)
    }

    async fn delete_command(&self, id: DbId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(index) = state.commands.iter().position(|c| c.id == id) else {
            return Ok(false);
        };
        let removed = state.commands.remove(index);
        state.jobs.retain(|j| j.command_id != id);
        for command in state.project_commands_mut(removed.project_id) {
            if command.sort_order > removed.sort_order {
                command.sort_order -= 1;
            }
        }
        Ok(true)
    }

    async fn move_command(
        &self,
        id: DbId,
        position: i32,
    ) -> Result<Option<CommandRecord>, StoreError> {
        let mut state = self.state.write().await;
        let Some((project_id, from)) = state
            .commands
            .iter()
            .find(|c| c.id == id)
            .map(|c| (c.project_id, c.sort_order))
        else {
            return Ok(None);
        };
        let count = state
            .commands
            .iter()
            .filter(|c| c.project_id == project_id)
            .count() as i32;
        let to = position.clamp(0, (count - 1).max(0));

        for command in state.project_commands_mut(project_id) {
            if command.id == id {
                command.sort_order = to;
                command.updated_at = now();
            } else if to < from && command.sort_order >= to && command.sort_order < from {
                command.sort_order += 1;
            } else if to > from && command.sort_order > from && command.sort_order <= to {
                command.sort_order -= 1;
            }
        }
        Ok(state.commands.iter().find(|c| c.id == id).cloned())
    }

    async fn create_jobs(&self, jobs: &[NewJob]) -> Result<Vec<Job>, StoreError> {
        let mut state = self.state.write().await;

        // Validate the whole batch before writing anything.
        for (index, job) in jobs.iter().enumerate() {
            if let Some(parent) = job.parent {
                if parent >= index {
                    return Err(StoreError::Invariant(format!(
                        "job {index} references parent {parent} which is not inserted before it"
                    )));
                }
            }
            if job.generator_code_name.is_some() == job.fixer_code_name.is_some() {
                return Err(StoreError::Invariant(format!(
                    "job {index} must name exactly one of generator and fixer"
                )));
            }
        }

        let mut created: Vec<Job> = Vec::with_capacity(jobs.len());
        for job in jobs {
            let parent_job_id = job.parent.map(|parent| created[parent].id);
            created.push(Job {
                id: state.next_id(),
                project_id: job.project_id,
                command_id: job.command_id,
                group_items: job.group_items.clone(),
                server_code_name: job.server_code_name.clone(),
                server_host: job.server_host.clone(),
                generator_code_name: job.generator_code_name.clone(),
                fixer_code_name: job.fixer_code_name.clone(),
                parent_job_id,
                source_image: job.source_image.clone(),
                status_id: JobStatus::Waiting.id(),
                prompt_id: None,
                positive_prompt: job.positive_prompt.clone(),
                negative_prompt: job.negative_prompt.clone(),
                control_image: job.control_image.clone(),
                loras: job.loras.clone(),
                ip_adapters: job.ip_adapters.clone(),
                region_prompts: job.region_prompts.clone(),
                result_path: job.result_path.clone(),
                created_at: now(),
                updated_at: now(),
            });
        }
        state.jobs.extend(created.iter().cloned());
        Ok(created)
    }

    async fn find_job(&self, id: DbId) -> Result<Option<Job>, StoreError> {
        let state = self.state.read().await;
        Ok(state.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn list_jobs_by_command(&self, command_id: DbId) -> Result<Vec<Job>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.command_id == command_id)
            .cloned()
            .collect())
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status_id == status.id())
            .cloned()
            .collect())
    }

    async fn mark_processing(&self, id: DbId, prompt_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.job_mut(id) {
            Some(job) if job.status().is_some_and(|s| s.can_advance_to(JobStatus::Processing)) => {
                job.status_id = JobStatus::Processing.id();
                job.prompt_id = Some(prompt_id.to_string());
                job.updated_at = now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_finished(&self, id: DbId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.job_mut(id) {
            Some(job) if job.status().is_some_and(|s| s.can_advance_to(JobStatus::Finished)) => {
                job.status_id = JobStatus::Finished.id();
                job.updated_at = now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_job(&self, id: DbId, refresh: &JobRefresh) -> Result<Option<Job>, StoreError> {
        let mut state = self.state.write().await;
        let Some(job) = state.job_mut(id) else {
            return Ok(None);
        };
        job.status_id = JobStatus::Waiting.id();
        job.prompt_id = None;
        job.positive_prompt = refresh.positive_prompt.clone();
        job.negative_prompt = refresh.negative_prompt.clone();
        job.control_image = refresh.control_image.clone();
        job.loras = refresh.loras.clone();
        job.ip_adapters = refresh.ip_adapters.clone();
        job.region_prompts = refresh.region_prompts.clone();
        job.updated_at = now();
        Ok(Some(job.clone()))
    }
}
