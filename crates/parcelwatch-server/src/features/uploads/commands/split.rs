use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::ingest::models::{JobStatus, UploadJob};
use crate::ingest::parser::{self, DeclaredLocality, ParseError};
use crate::ingest::splitter::{self, SplitError};
use crate::ingest::UploadPipeline;
use crate::storage::Storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitUploadCommand {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitChild {
    pub job_id: Uuid,
    pub city: String,
    pub state: String,
    pub rows: usize,
    pub storage_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitUploadResponse {
    pub parent_job_id: Uuid,
    pub children: Vec<SplitChild>,
}

#[derive(Debug, thiserror::Error)]
pub enum SplitUploadError {
    #[error("Upload job not found: {0}")]
    NotFound(Uuid),
    #[error("Job is {0} and cannot be split; only queued jobs can")]
    InvalidState(String),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Split error: {0}")]
    Split(#[from] SplitError),
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Split a multi-city upload into one child job per locality and start all
/// of them. The parent job completes immediately; its source blob stays in
/// place and each child gets its own per-city blob.
#[tracing::instrument(skip(pool, storage, pipeline))]
pub async fn handle(
    pool: &PgPool,
    storage: &Storage,
    pipeline: UploadPipeline,
    command: SplitUploadCommand,
) -> Result<SplitUploadResponse, SplitUploadError> {
    let job: UploadJob = sqlx::query_as("SELECT * FROM upload_jobs WHERE id = $1")
        .bind(command.job_id)
        .fetch_optional(pool)
        .await?
        .ok_or(SplitUploadError::NotFound(command.job_id))?;

    if job.status() != JobStatus::Queued {
        return Err(SplitUploadError::InvalidState(job.status));
    }

    let bytes = storage.download(&job.storage_key).await?;
    let text = String::from_utf8_lossy(&bytes);
    let declared = DeclaredLocality::new(job.city.clone(), job.state.clone());
    let outcome = parser::parse_csv(&text, &declared)?;
    let groups = splitter::split_by_locality(&outcome.headers, &outcome.rows)?;

    let mut children = Vec::with_capacity(groups.len());
    for group in &groups {
        let key = storage.build_split_key(job.owner_id, job.id, &group.slug);
        storage
            .upload(&key, group.csv.clone().into_bytes(), Some("text/csv".to_string()))
            .await?;

        let child_filename = format!("{}_{}", group.slug, job.original_filename);
        let child_id: Uuid = sqlx::query_scalar(
            "INSERT INTO upload_jobs
             (owner_id, storage_key, original_filename, file_size, status, city, county, state, parent_job_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
        )
        .bind(job.owner_id)
        .bind(&key)
        .bind(&child_filename)
        .bind(group.csv.len() as i64)
        .bind(JobStatus::Queued.as_str())
        .bind(&group.city)
        .bind(&job.county)
        .bind(&group.state)
        .bind(job.id)
        .fetch_one(pool)
        .await?;

        children.push(SplitChild {
            job_id: child_id,
            city: group.city.clone(),
            state: group.state.clone(),
            rows: group.rows,
            storage_key: key,
        });
    }

    // The parent is bookkeeping only from here on; its rows live in the
    // children.
    let summary = format!("split into {} city jobs", children.len());
    sqlx::query(
        "UPDATE upload_jobs
         SET status = $2, total_rows = $3, warnings = $4, finished_at = now(), updated_at = now()
         WHERE id = $1",
    )
    .bind(job.id)
    .bind(JobStatus::Complete.as_str())
    .bind(outcome.detection.total_rows as i32)
    .bind(vec![summary])
    .execute(pool)
    .await?;

    for child in &children {
        pipeline.clone().spawn(child.job_id);
    }

    tracing::info!(
        parent_job_id = %job.id,
        children = children.len(),
        "multi-city upload split"
    );

    Ok(SplitUploadResponse {
        parent_job_id: job.id,
        children,
    })
}
