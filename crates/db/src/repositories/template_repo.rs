//! Repositories for the `generators` and `fixers` tables.

use sqlx::PgPool;

use crate::models::template::{CreateFixer, CreateGenerator, Fixer, Generator};

const GENERATOR_COLUMNS: &str = "\
    id, code_name, workflow_json, positive_prompt_title, negative_prompt_title, \
    load_image_controlnet_title, save_image_title, created_at, updated_at";

const FIXER_COLUMNS: &str = "\
    id, code_name, workflow_json, positive_prompt, negative_prompt, \
    positive_prompt_title, negative_prompt_title, load_image_title, save_image_title, \
    created_at, updated_at";

/// Provides access to generator workflow templates.
pub struct GeneratorRepo;

impl GeneratorRepo {
    pub async fn create(pool: &PgPool, input: &CreateGenerator) -> Result<Generator, sqlx::Error> {
        let query = format!(
            "INSERT INTO generators \
                (code_name, workflow_json, positive_prompt_title, negative_prompt_title, \
                 load_image_controlnet_title, save_image_title) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {GENERATOR_COLUMNS}"
        );
        sqlx::query_as::<_, Generator>(&query)
            .bind(&input.code_name)
            .bind(&input.workflow_json)
            .bind(&input.positive_prompt_title)
            .bind(&input.negative_prompt_title)
            .bind(&input.load_image_controlnet_title)
            .bind(&input.save_image_title)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_code_name(
        pool: &PgPool,
        code_name: &str,
    ) -> Result<Option<Generator>, sqlx::Error> {
        let query = format!("SELECT {GENERATOR_COLUMNS} FROM generators WHERE code_name = $1");
        sqlx::query_as::<_, Generator>(&query)
            .bind(code_name)
            .fetch_optional(pool)
            .await
    }
}

/// Provides access to fixer (post-processing) workflow templates.
pub struct FixerRepo;

impl FixerRepo {
    pub async fn create(pool: &PgPool, input: &CreateFixer) -> Result<Fixer, sqlx::Error> {
        let query = format!(
            "INSERT INTO fixers \
                (code_name, workflow_json, positive_prompt, negative_prompt, \
                 positive_prompt_title, negative_prompt_title, load_image_title, save_image_title) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {FIXER_COLUMNS}"
        );
        sqlx::query_as::<_, Fixer>(&query)
            .bind(&input.code_name)
            .bind(&input.workflow_json)
            .bind(&input.positive_prompt)
            .bind(&input.negative_prompt)
            .bind(&input.positive_prompt_title)
            .bind(&input.negative_prompt_title)
            .bind(&input.load_image_title)
            .bind(&input.save_image_title)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_code_name(
        pool: &PgPool,
        code_name: &str,
    ) -> Result<Option<Fixer>, sqlx::Error> {
        let query = format!("SELECT {FIXER_COLUMNS} FROM fixers WHERE code_name = $1");
        sqlx::query_as::<_, Fixer>(&query)
            .bind(code_name)
            .fetch_optional(pool)
            .await
    }
}
