//! Job entity: one concrete unit of generation work.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use bowl_core::descriptors::{IpAdapterSpec, LoraSpec, RegionPrompt};
use bowl_core::types::{DbId, Timestamp};

use super::status::{JobStatus, StatusId};

/// Which part of a job an item contributed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemSlot {
    /// A non-region factor; feeds the main prompts.
    #[default]
    Base,
    /// The layout item that defines the region geometry.
    Layout,
    /// An item selected for one region keyword.
    Region { keyword: String },
}

impl ItemSlot {
    /// Short stable label used in result-name identities.
    pub fn label(&self) -> String {
        match self {
            ItemSlot::Base => "base".to_string(),
            ItemSlot::Layout => "layout".to_string(),
            ItemSlot::Region { keyword } => format!("region={keyword}"),
        }
    }
}

/// One `(group_id, item_id)` pair a job was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupItemRef {
    pub group_id: DbId,
    pub item_id: DbId,
    #[serde(default)]
    pub slot: ItemSlot,
}

impl GroupItemRef {
    pub fn new(group_id: DbId, item_id: DbId, slot: ItemSlot) -> Self {
        Self {
            group_id,
            item_id,
            slot,
        }
    }

    /// `group:item:slot`, the identity fed into result-name digests.
    pub fn identity(&self) -> String {
        format!("{}:{}:{}", self.group_id, self.item_id, self.slot.label())
    }
}

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub project_id: DbId,
    pub command_id: DbId,
    #[sqlx(json)]
    pub group_items: Vec<GroupItemRef>,
    pub server_code_name: String,
    pub server_host: String,
    /// Set on primary jobs.
    pub generator_code_name: Option<String>,
    /// Set on fixer jobs, together with `parent_job_id`.
    pub fixer_code_name: Option<String>,
    pub parent_job_id: Option<DbId>,
    /// The parent's result path a fixer job consumes.
    pub source_image: Option<String>,
    pub status_id: StatusId,
    /// Backend request id assigned on submission.
    pub prompt_id: Option<String>,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub control_image: Option<String>,
    #[sqlx(json)]
    pub loras: Vec<LoraSpec>,
    #[sqlx(json)]
    pub ip_adapters: Vec<IpAdapterSpec>,
    #[sqlx(json)]
    pub region_prompts: Vec<RegionPrompt>,
    pub result_path: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Typed status; `None` for an id outside the `job_statuses` table.
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }

    pub fn is_fixer(&self) -> bool {
        self.fixer_code_name.is_some()
    }
}

/// A job about to be inserted as part of one expansion batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewJob {
    pub project_id: DbId,
    pub command_id: DbId,
    pub group_items: Vec<GroupItemRef>,
    pub server_code_name: String,
    pub server_host: String,
    pub generator_code_name: Option<String>,
    pub fixer_code_name: Option<String>,
    /// Index of the parent job within the same batch.
    pub parent: Option<usize>,
    pub source_image: Option<String>,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub control_image: Option<String>,
    pub loras: Vec<LoraSpec>,
    pub ip_adapters: Vec<IpAdapterSpec>,
    pub region_prompts: Vec<RegionPrompt>,
    pub result_path: String,
}

/// Catalog-derived fields rewritten by a reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobRefresh {
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub control_image: Option<String>,
    pub loras: Vec<LoraSpec>,
    pub ip_adapters: Vec<IpAdapterSpec>,
    pub region_prompts: Vec<RegionPrompt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_defaults_to_base_when_missing() {
        let parsed: GroupItemRef =
            serde_json::from_value(serde_json::json!({ "group_id": 1, "item_id": 2 })).unwrap();
        assert_eq!(parsed.slot, ItemSlot::Base);
        assert_eq!(parsed.identity(), "1:2:base");
    }

    #[test]
    fn region_slot_round_trips_with_keyword() {
        let item = GroupItemRef::new(3, 9, ItemSlot::Region { keyword: "left".into() });
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["slot"]["kind"], "region");
        assert_eq!(value["slot"]["keyword"], "left");
        assert_eq!(item.identity(), "3:9:region=left");
    }

    fn job_with_status(status_id: StatusId) -> Job {
        let now = chrono::Utc::now();
        Job {
            id: 1,
            project_id: 1,
            command_id: 1,
            group_items: Vec::new(),
            server_code_name: "local".into(),
            server_host: "127.0.0.1:8188".into(),
            generator_code_name: Some("anime".into()),
            fixer_code_name: None,
            parent_job_id: None,
            source_image: None,
            status_id,
            prompt_id: None,
            positive_prompt: String::new(),
            negative_prompt: String::new(),
            control_image: None,
            loras: Vec::new(),
            ip_adapters: Vec::new(),
            region_prompts: Vec::new(),
            result_path: "/results/a.png".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn unknown_status_id_has_no_status() {
        assert_eq!(job_with_status(JobStatus::Finished.id()).status(), Some(JobStatus::Finished));
        assert_eq!(job_with_status(99).status(), None);
    }
}
