//! Asset item entity: one concrete, interchangeable asset within a group.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use bowl_core::descriptors::{IpAdapterSpec, LoraSpec, RegionArea};
use bowl_core::types::{DbId, Timestamp};

/// A row from the `items` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Item {
    pub id: DbId,
    pub group_id: DbId,
    pub name: String,
    /// Unique within the group.
    pub code_name: String,
    pub sort_order: i32,
    pub positive_prompt: String,
    pub negative_prompt: String,
    #[sqlx(json)]
    pub lora: Option<LoraSpec>,
    #[sqlx(json)]
    pub ip_adapter: Option<IpAdapterSpec>,
    /// Control-net reference image path.
    pub control_image: Option<String>,
    /// Named sub-regions; non-empty only on layout items.
    #[sqlx(json)]
    pub regions: Vec<RegionArea>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating an item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateItem {
    pub group_id: DbId,
    pub name: String,
    pub code_name: String,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub positive_prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    pub lora: Option<LoraSpec>,
    pub ip_adapter: Option<IpAdapterSpec>,
    pub control_image: Option<String>,
    #[serde(default)]
    pub regions: Vec<RegionArea>,
}
