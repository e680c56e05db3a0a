//! Repository for the `jobs` table.
//!
//! Status transitions are guarded in SQL: each `mark_*` call only matches
//! rows in the expected source status, so a stale caller cannot move a job
//! backwards. [`JobRepo::reset`] is the only path back to `Waiting`.

use sqlx::types::Json;
use sqlx::PgPool;
use bowl_core::types::DbId;

use crate::models::job::{Job, JobRefresh, NewJob};
use crate::models::status::JobStatus;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, project_id, command_id, group_items, server_code_name, server_host, \
    generator_code_name, fixer_code_name, parent_job_id, source_image, \
    status_id, prompt_id, positive_prompt, negative_prompt, control_image, \
    loras, ip_adapters, region_prompts, result_path, created_at, updated_at";

/// Provides storage and status transitions for generation jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert one expansion batch in a single transaction.
    ///
    /// `NewJob::parent` indexes into `jobs`; parents must precede their
    /// children. Nothing is written if any insert fails.
    pub async fn create_batch(pool: &PgPool, jobs: &[NewJob]) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs \
                (project_id, command_id, group_items, server_code_name, server_host, \
                 generator_code_name, fixer_code_name, parent_job_id, source_image, status_id, \
                 positive_prompt, negative_prompt, control_image, loras, ip_adapters, \
                 region_prompts, result_path) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING {COLUMNS}"
        );

        let mut tx = pool.begin().await?;
        let mut created: Vec<Job> = Vec::with_capacity(jobs.len());

        for (index, job) in jobs.iter().enumerate() {
            let parent_job_id = match job.parent {
                Some(parent) if parent < index => Some(created[parent].id),
                Some(parent) => {
                    return Err(sqlx::Error::Protocol(format!(
                        "job {index} references parent {parent} which is not inserted before it"
                    )))
                }
                None => None,
            };

            let row = sqlx::query_as::<_, Job>(&query)
                .bind(job.project_id)
                .bind(job.command_id)
                .bind(Json(&job.group_items))
                .bind(&job.server_code_name)
                .bind(&job.server_host)
                .bind(&job.generator_code_name)
                .bind(&job.fixer_code_name)
                .bind(parent_job_id)
                .bind(&job.source_image)
                .bind(JobStatus::Waiting.id())
                .bind(&job.positive_prompt)
                .bind(&job.negative_prompt)
                .bind(&job.control_image)
                .bind(Json(&job.loras))
                .bind(Json(&job.ip_adapters))
                .bind(Json(&job.region_prompts))
                .bind(&job.result_path)
                .fetch_one(&mut *tx)
                .await?;
            created.push(row);
        }

        tx.commit().await?;
        tracing::debug!(count = created.len(), "Inserted job batch");
        Ok(created)
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Jobs of a command in creation order.
    pub async fn list_by_command(pool: &PgPool, command_id: DbId) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE command_id = $1 ORDER BY id");
        sqlx::query_as::<_, Job>(&query)
            .bind(command_id)
            .fetch_all(pool)
            .await
    }

    pub async fn list_by_status(
        pool: &PgPool,
        status: JobStatus,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE status_id = $1 ORDER BY id");
        sqlx::query_as::<_, Job>(&query)
            .bind(status.id())
            .fetch_all(pool)
            .await
    }

    /// `WAITING -> PROCESSING`, recording the backend request id.
    ///
    /// Returns `false` if the job was not waiting.
    pub async fn mark_processing(
        pool: &PgPool,
        id: DbId,
        prompt_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status_id = $2, prompt_id = $3 WHERE id = $1 AND status_id = $4",
        )
        .bind(id)
        .bind(JobStatus::Processing.id())
        .bind(prompt_id)
        .bind(JobStatus::Waiting.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `PROCESSING -> FINISHED`. Returns `false` if the job was not processing.
    pub async fn mark_finished(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE jobs SET status_id = $2 WHERE id = $1 AND status_id = $3")
                .bind(id)
                .bind(JobStatus::Finished.id())
                .bind(JobStatus::Processing.id())
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Rewrite catalog-derived fields, clear the request id and put the job
    /// back to `WAITING` from any status.
    pub async fn reset(
        pool: &PgPool,
        id: DbId,
        refresh: &JobRefresh,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET \
                status_id = $2, prompt_id = NULL, \
                positive_prompt = $3, negative_prompt = $4, control_image = $5, \
                loras = $6, ip_adapters = $7, region_prompts = $8 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Waiting.id())
            .bind(&refresh.positive_prompt)
            .bind(&refresh.negative_prompt)
            .bind(&refresh.control_image)
            .bind(Json(&refresh.loras))
            .bind(Json(&refresh.ip_adapters))
            .bind(Json(&refresh.region_prompts))
            .fetch_optional(pool)
            .await
    }
}
