//! Repository for the `groups` table.

use sqlx::PgPool;
use bowl_core::types::DbId;

use crate::models::group::{CreateGroup, Group};

const COLUMNS: &str = "id, name, code_name, description, created_at, updated_at";

/// Provides access to asset groups.
pub struct GroupRepo;

impl GroupRepo {
    pub async fn create(pool: &PgPool, input: &CreateGroup) -> Result<Group, sqlx::Error> {
        let query = format!(
            "INSERT INTO groups (name, code_name, description) VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Group>(&query)
            .bind(&input.name)
            .bind(&input.code_name)
            .bind(&input.description)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Group>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM groups WHERE id = $1");
        sqlx::query_as::<_, Group>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_code_name(
        pool: &PgPool,
        code_name: &str,
    ) -> Result<Option<Group>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM groups WHERE code_name = $1");
        sqlx::query_as::<_, Group>(&query)
            .bind(code_name)
            .fetch_optional(pool)
            .await
    }
}
