//! Repository for the `commands` table.
//!
//! `sort_order` is kept dense (0..n) per project. The unique constraint on
//! `(project_id, sort_order)` is deferred, so shifting rows inside a
//! transaction never trips it midway.

use sqlx::PgPool;
use bowl_core::types::DbId;

use crate::models::command::{CommandRecord, CreateCommand};

const COLUMNS: &str =
    "id, project_id, sort_order, command_code, command_json, created_at, updated_at";

/// Provides ordered storage of commands.
pub struct CommandRepo;

impl CommandRepo {
    /// Store a command at `insert_at` (clamped to the project's range), or
    /// append it when `insert_at` is `None`.
    pub async fn create(
        pool: &PgPool,
        input: &CreateCommand,
        insert_at: Option<i32>,
    ) -> Result<CommandRecord, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commands WHERE project_id = $1")
            .bind(input.project_id)
            .fetch_one(&mut *tx)
            .await?;
        let count = count as i32;
        let position = insert_at.map_or(count, |at| at.clamp(0, count));

        if position < count {
            sqlx::query(
                "UPDATE commands SET sort_order = sort_order + 1 \
                 WHERE project_id = $1 AND sort_order >= $2",
            )
            .bind(input.project_id)
            .bind(position)
            .execute(&mut *tx)
            .await?;
        }

        let query = format!(
            "INSERT INTO commands (project_id, sort_order, command_code, command_json) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        let record = sqlx::query_as::<_, CommandRecord>(&query)
            .bind(input.project_id)
            .bind(position)
            .bind(&input.command_code)
            .bind(&input.command_json)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(record)
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<CommandRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM commands WHERE id = $1");
        sqlx::query_as::<_, CommandRecord>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_project(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Vec<CommandRecord>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM commands WHERE project_id = $1 ORDER BY sort_order");
        sqlx::query_as::<_, CommandRecord>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    /// Delete a command (its jobs cascade) and close the gap it leaves.
    ///
    /// Returns `true` if a row was deleted.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let removed: Option<(DbId, i32)> = sqlx::query_as(
            "DELETE FROM commands WHERE id = $1 RETURNING project_id, sort_order",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((project_id, sort_order)) = removed else {
            return Ok(false);
        };

        sqlx::query(
            "UPDATE commands SET sort_order = sort_order - 1 \
             WHERE project_id = $1 AND sort_order > $2",
        )
        .bind(project_id)
        .bind(sort_order)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Move a command to `position` (clamped), shifting the commands in
    /// between by one. Returns the moved row, or `None` if not found.
    pub async fn move_to(
        pool: &PgPool,
        id: DbId,
        position: i32,
    ) -> Result<Option<CommandRecord>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let current: Option<(DbId, i32)> = sqlx::query_as(
            "SELECT project_id, sort_order FROM commands WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((project_id, from)) = current else {
            return Ok(None);
        };

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commands WHERE project_id = $1")
            .bind(project_id)
            .fetch_one(&mut *tx)
            .await?;
        let to = position.clamp(0, (count as i32 - 1).max(0));

        if to < from {
            sqlx::query(
                "UPDATE commands SET sort_order = sort_order + 1 \
                 WHERE project_id = $1 AND sort_order >= $2 AND sort_order < $3",
            )
            .bind(project_id)
            .bind(to)
            .bind(from)
            .execute(&mut *tx)
            .await?;
        } else if to > from {
            sqlx::query(
                "UPDATE commands SET sort_order = sort_order - 1 \
                 WHERE project_id = $1 AND sort_order > $2 AND sort_order <= $3",
            )
            .bind(project_id)
            .bind(from)
            .bind(to)
            .execute(&mut *tx)
            .await?;
        }

        let query =
            format!("UPDATE commands SET sort_order = $2 WHERE id = $1 RETURNING {COLUMNS}");
        let record = sqlx::query_as::<_, CommandRecord>(&query)
            .bind(id)
            .bind(to)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(record))
    }
}
