//! Generation backend (ComfyUI server) entity.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use bowl_core::types::{DbId, Timestamp};

/// A row from the `servers` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Server {
    pub id: DbId,
    pub name: String,
    pub code_name: String,
    /// `host:port` or a full `http(s)://` base URL.
    pub host: String,
    pub is_enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering a server.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateServer {
    pub name: String,
    pub code_name: String,
    pub host: String,
}
