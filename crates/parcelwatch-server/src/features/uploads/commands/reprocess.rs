use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::ingest::models::{JobStatus, UploadJob};
use crate::ingest::pipeline::reset_job;
use crate::ingest::UploadPipeline;
use crate::storage::Storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprocessUploadCommand {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReprocessUploadResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ReprocessUploadError {
    #[error("Upload job not found: {0}")]
    NotFound(Uuid),
    #[error("file no longer exists in storage")]
    SourceFileMissing,
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Rerun a job from its source blob.
///
/// The blob existence check happens before the job is touched, so a job
/// whose file was deleted keeps its original status and counters and the
/// caller gets a clear error instead of a freshly zeroed failed job.
#[tracing::instrument(skip(pool, storage, pipeline))]
pub async fn handle(
    pool: &PgPool,
    storage: &Storage,
    pipeline: UploadPipeline,
    command: ReprocessUploadCommand,
) -> Result<ReprocessUploadResponse, ReprocessUploadError> {
    let job: UploadJob = sqlx::query_as("SELECT * FROM upload_jobs WHERE id = $1")
        .bind(command.job_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ReprocessUploadError::NotFound(command.job_id))?;

    if !storage.exists(&job.storage_key).await? {
        tracing::warn!(job_id = %job.id, key = %job.storage_key, "reprocess refused, source blob gone");
        return Err(ReprocessUploadError::SourceFileMissing);
    }

    reset_job(pool, job.id).await?;
    pipeline.spawn(job.id);
    tracing::info!(job_id = %job.id, previous_status = %job.status, "upload job reprocessing");

    Ok(ReprocessUploadResponse {
        job_id: job.id,
        status: JobStatus::Queued.as_str().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestConfig;
    use crate::storage;

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_blob_check_failure_leaves_job_untouched(pool: PgPool) -> sqlx::Result<()> {
        let job_id: Uuid = sqlx::query_scalar(
            "INSERT INTO upload_jobs
                 (owner_id, storage_key, original_filename, status,
                  total_rows, processed_rows, properties_created, violations_created)
             VALUES ($1, 'uploads/test/source.csv', 'source.csv', 'complete', 10, 10, 3, 10)
             RETURNING id",
        )
        .bind(Uuid::nil())
        .fetch_one(&pool)
        .await?;

        // The unconfigured test client cannot perform the existence check,
        // so the handler must bail before resetting anything.
        let storage = storage::test_storage();
        let pipeline =
            UploadPipeline::new(pool.clone(), storage.clone(), IngestConfig::default());
        let result = handle(
            &pool,
            &storage,
            pipeline,
            ReprocessUploadCommand { job_id },
        )
        .await;
        assert!(result.is_err());

        let job: UploadJob = sqlx::query_as("SELECT * FROM upload_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_one(&pool)
            .await?;
        assert_eq!(job.status, "complete");
        assert_eq!(job.total_rows, 10);
        assert_eq!(job.processed_rows, 10);
        assert_eq!(job.properties_created, 3);
        assert_eq!(job.violations_created, 10);
        Ok(())
    }
}
