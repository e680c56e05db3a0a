//! Asset group entity (e.g. "characters", "poses").

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use bowl_core::types::{DbId, Timestamp};

/// A row from the `groups` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Group {
    pub id: DbId,
    pub name: String,
    pub code_name: String,
    pub description: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a group.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroup {
    pub name: String,
    pub code_name: String,
    pub description: Option<String>,
}
