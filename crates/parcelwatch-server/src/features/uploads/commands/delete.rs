use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::ingest::aggregate;
use crate::ingest::models::UploadJob;
use crate::storage::Storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUploadCommand {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteUploadResponse {
    pub job_id: Uuid,
    pub violations_deleted: u64,
    pub staging_rows_deleted: u64,
    pub blob_deleted: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteUploadError {
    #[error("Upload job not found: {0}")]
    NotFound(Uuid),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Delete a job and everything it ingested.
///
/// Violations are found through the staging-row property links, then
/// staging rows, the source blob, and the job row go. Properties stay (they
/// may carry violations from other jobs) but their aggregates are
/// recomputed. Every cascade step is logged on failure and skipped, never
/// fatal; only the job-row delete itself can fail the operation.
#[tracing::instrument(skip(pool, storage))]
pub async fn handle(
    pool: &PgPool,
    storage: &Storage,
    command: DeleteUploadCommand,
) -> Result<DeleteUploadResponse, DeleteUploadError> {
    let job: UploadJob = sqlx::query_as("SELECT * FROM upload_jobs WHERE id = $1")
        .bind(command.job_id)
        .fetch_optional(pool)
        .await?
        .ok_or(DeleteUploadError::NotFound(command.job_id))?;

    let touched: Vec<Uuid> = match sqlx::query_scalar(
        "SELECT DISTINCT property_id FROM staging_rows
         WHERE job_id = $1 AND property_id IS NOT NULL",
    )
    .bind(job.id)
    .fetch_all(pool)
    .await
    {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "could not list touched properties, continuing");
            Vec::new()
        }
    };

    let violations_deleted = match sqlx::query(
        "DELETE FROM violations v
         USING staging_rows s
         WHERE s.job_id = $1 AND v.property_id = s.property_id",
    )
    .bind(job.id)
    .execute(pool)
    .await
    {
        Ok(result) => result.rows_affected(),
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "violation cascade failed, continuing");
            0
        }
    };

    let staging_rows_deleted = match sqlx::query("DELETE FROM staging_rows WHERE job_id = $1")
        .bind(job.id)
        .execute(pool)
        .await
    {
        Ok(result) => result.rows_affected(),
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "staging cascade failed, continuing");
            0
        }
    };

    for property_id in &touched {
        if let Err(e) = aggregate::refresh_property_aggregates(pool, *property_id).await {
            tracing::warn!(property_id = %property_id, error = %e, "aggregate refresh failed after delete");
        }
    }

    let blob_deleted = match storage.delete(&job.storage_key).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(job_id = %job.id, key = %job.storage_key, error = %e, "blob delete failed, continuing");
            false
        }
    };

    sqlx::query("DELETE FROM upload_jobs WHERE id = $1")
        .bind(job.id)
        .execute(pool)
        .await?;

    tracing::info!(
        job_id = %job.id,
        violations_deleted,
        staging_rows_deleted,
        blob_deleted,
        "upload job deleted"
    );

    Ok(DeleteUploadResponse {
        job_id: job.id,
        violations_deleted,
        staging_rows_deleted,
        blob_deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_blob_failure_does_not_block_job_delete(pool: PgPool) -> sqlx::Result<()> {
        let job_id: Uuid = sqlx::query_scalar(
            "INSERT INTO upload_jobs (owner_id, storage_key, original_filename, status)
             VALUES ($1, 'uploads/test/source.csv', 'source.csv', 'complete') RETURNING id",
        )
        .bind(Uuid::nil())
        .fetch_one(&pool)
        .await?;

        let property_id: Uuid = sqlx::query_scalar(
            "INSERT INTO properties (address, city, state, zip)
             VALUES ('123 Main St', 'Phoenix', 'AZ', '85001') RETURNING id",
        )
        .fetch_one(&pool)
        .await?;
        sqlx::query(
            "INSERT INTO staging_rows (job_id, row_num, address, city, state, property_id)
             VALUES ($1, 1, '123 Main St', 'Phoenix', 'AZ', $2)",
        )
        .bind(job_id)
        .bind(property_id)
        .execute(&pool)
        .await?;
        sqlx::query("INSERT INTO violations (property_id, status) VALUES ($1, 'Open')")
            .bind(property_id)
            .execute(&pool)
            .await?;

        // The unconfigured test client cannot reach any blob store, so the
        // blob step fails; the rest of the cascade must still land.
        let response = handle(
            &pool,
            &storage::test_storage(),
            DeleteUploadCommand { job_id },
        )
        .await
        .unwrap();

        assert!(!response.blob_deleted);
        assert_eq!(response.violations_deleted, 1);
        assert_eq!(response.staging_rows_deleted, 1);

        let jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_one(&pool)
            .await?;
        assert_eq!(jobs, 0);

        // The property survives with recomputed (now empty) aggregates.
        let total: i32 =
            sqlx::query_scalar("SELECT total_violations FROM properties WHERE id = $1")
                .bind(property_id)
                .fetch_one(&pool)
                .await?;
        assert_eq!(total, 0);
        Ok(())
    }
}
