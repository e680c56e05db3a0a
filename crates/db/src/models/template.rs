//! Workflow templates: generators (primary synthesis) and fixers
//! (post-processing passes).
//!
//! Both store the backend's API-format workflow plus the `_meta.title`s of
//! the nodes the payload builder writes into.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use bowl_core::types::{DbId, Timestamp};

/// A row from the `generators` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Generator {
    pub id: DbId,
    pub code_name: String,
    pub workflow_json: serde_json::Value,
    pub positive_prompt_title: Option<String>,
    pub negative_prompt_title: Option<String>,
    pub load_image_controlnet_title: Option<String>,
    pub save_image_title: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a generator.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGenerator {
    pub code_name: String,
    pub workflow_json: serde_json::Value,
    pub positive_prompt_title: Option<String>,
    pub negative_prompt_title: Option<String>,
    pub load_image_controlnet_title: Option<String>,
    pub save_image_title: Option<String>,
}

/// A row from the `fixers` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Fixer {
    pub id: DbId,
    pub code_name: String,
    pub workflow_json: serde_json::Value,
    /// Fixed prompt text the pass always uses.
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub positive_prompt_title: Option<String>,
    pub negative_prompt_title: Option<String>,
    /// Title of the `LoadImage` node that receives the input image.
    pub load_image_title: String,
    pub save_image_title: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a fixer.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFixer {
    pub code_name: String,
    pub workflow_json: serde_json::Value,
    #[serde(default)]
    pub positive_prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    pub positive_prompt_title: Option<String>,
    pub negative_prompt_title: Option<String>,
    pub load_image_title: String,
    pub save_image_title: Option<String>,
}
