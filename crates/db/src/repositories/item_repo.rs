//! Repository for the `items` table.
//!
//! Items always come back in catalog order (`sort_order`, then `id`),
//! regardless of the order names appear in an include-only filter.

use sqlx::types::Json;
use sqlx::PgPool;
use bowl_core::command::ItemFilter;
use bowl_core::types::DbId;

use crate::models::item::{CreateItem, Item};

const COLUMNS: &str = "\
    id, group_id, name, code_name, sort_order, positive_prompt, negative_prompt, \
    lora, ip_adapter, control_image, regions, created_at, updated_at";

/// Provides access to the items of asset groups.
pub struct ItemRepo;

impl ItemRepo {
    pub async fn create(pool: &PgPool, input: &CreateItem) -> Result<Item, sqlx::Error> {
        let query = format!(
            "INSERT INTO items \
                (group_id, name, code_name, sort_order, positive_prompt, negative_prompt, \
                 lora, ip_adapter, control_image, regions) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Item>(&query)
            .bind(input.group_id)
            .bind(&input.name)
            .bind(&input.code_name)
            .bind(input.sort_order)
            .bind(&input.positive_prompt)
            .bind(&input.negative_prompt)
            .bind(Json(&input.lora))
            .bind(Json(&input.ip_adapter))
            .bind(&input.control_image)
            .bind(Json(&input.regions))
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Item>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM items WHERE id = $1");
        sqlx::query_as::<_, Item>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Items of a group that pass `filter`, in catalog order.
    pub async fn list_by_group(
        pool: &PgPool,
        group_id: DbId,
        filter: &ItemFilter,
    ) -> Result<Vec<Item>, sqlx::Error> {
        match filter {
            ItemFilter::All => {
                let query = format!(
                    "SELECT {COLUMNS} FROM items WHERE group_id = $1 ORDER BY sort_order, id"
                );
                sqlx::query_as::<_, Item>(&query)
                    .bind(group_id)
                    .fetch_all(pool)
                    .await
            }
            ItemFilter::IncludeOnly(names) => {
                let query = format!(
                    "SELECT {COLUMNS} FROM items \
                     WHERE group_id = $1 AND code_name = ANY($2) \
                     ORDER BY sort_order, id"
                );
                sqlx::query_as::<_, Item>(&query)
                    .bind(group_id)
                    .bind(names)
                    .fetch_all(pool)
                    .await
            }
            ItemFilter::Exclude(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                let query = format!(
                    "SELECT {COLUMNS} FROM items \
                     WHERE group_id = $1 AND NOT (code_name = ANY($2)) \
                     ORDER BY sort_order, id"
                );
                sqlx::query_as::<_, Item>(&query)
                    .bind(group_id)
                    .bind(names)
                    .fetch_all(pool)
                    .await
            }
        }
    }
}
