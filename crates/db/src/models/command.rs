//! Stored commands, ordered per project.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use bowl_core::types::{DbId, Timestamp};

/// A row from the `commands` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CommandRecord {
    pub id: DbId,
    pub project_id: DbId,
    /// Zero-based, dense position within the project.
    pub sort_order: i32,
    /// The command text as the user wrote it.
    pub command_code: String,
    /// The serialized `ParsedCommand`.
    pub command_json: serde_json::Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for storing a parsed command.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCommand {
    pub project_id: DbId,
    pub command_code: String,
    pub command_json: serde_json::Value,
}
