//! Repository for the `servers` table.

use sqlx::PgPool;

use crate::models::server::{CreateServer, Server};

/// Column list for `servers` queries.
const COLUMNS: &str = "id, name, code_name, host, is_enabled, created_at, updated_at";

/// Provides access to registered generation backends.
pub struct ServerRepo;

impl ServerRepo {
    /// Register a new server, enabled by default.
    pub async fn create(pool: &PgPool, input: &CreateServer) -> Result<Server, sqlx::Error> {
        let query = format!(
            "INSERT INTO servers (name, code_name, host) VALUES ($1, $2, $3) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Server>(&query)
            .bind(&input.name)
            .bind(&input.code_name)
            .bind(&input.host)
            .fetch_one(pool)
            .await
    }

    /// All servers ordered by code name.
    pub async fn list(pool: &PgPool) -> Result<Vec<Server>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM servers ORDER BY code_name");
        sqlx::query_as::<_, Server>(&query).fetch_all(pool).await
    }

    /// Servers the prober should keep an eye on.
    pub async fn list_enabled(pool: &PgPool) -> Result<Vec<Server>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM servers WHERE is_enabled = true ORDER BY code_name");
        sqlx::query_as::<_, Server>(&query).fetch_all(pool).await
    }

    pub async fn find_by_code_name(
        pool: &PgPool,
        code_name: &str,
    ) -> Result<Option<Server>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM servers WHERE code_name = $1");
        sqlx::query_as::<_, Server>(&query)
            .bind(code_name)
            .fetch_optional(pool)
            .await
    }

    /// Enable or disable a server. Returns `true` if the row exists.
    pub async fn set_enabled(
        pool: &PgPool,
        code_name: &str,
        enabled: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE servers SET is_enabled = $2 WHERE code_name = $1")
            .bind(code_name)
            .bind(enabled)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
