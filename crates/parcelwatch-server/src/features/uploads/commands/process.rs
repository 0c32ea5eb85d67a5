use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::ingest::models::{JobStatus, UploadJob};
use crate::ingest::UploadPipeline;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessUploadCommand {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessUploadResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessUploadError {
    #[error("Upload job not found: {0}")]
    NotFound(Uuid),
    #[error("Job is {0} and cannot be started; reprocess it instead")]
    InvalidState(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Kick off the pipeline for a queued job. Returns as soon as the job is
/// handed to a background task; the caller polls the job row for progress.
#[tracing::instrument(skip(pool, pipeline))]
pub async fn handle(
    pool: &PgPool,
    pipeline: UploadPipeline,
    command: ProcessUploadCommand,
) -> Result<ProcessUploadResponse, ProcessUploadError> {
    let job: UploadJob = sqlx::query_as("SELECT * FROM upload_jobs WHERE id = $1")
        .bind(command.job_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ProcessUploadError::NotFound(command.job_id))?;

    if job.status() != JobStatus::Queued {
        return Err(ProcessUploadError::InvalidState(job.status));
    }

    pipeline.spawn(command.job_id);
    tracing::info!(job_id = %command.job_id, "upload job handed to pipeline");

    Ok(ProcessUploadResponse {
        job_id: command.job_id,
        status: JobStatus::Queued.as_str().to_string(),
    })
}
