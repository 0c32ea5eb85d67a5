use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::ingest::config::DEFAULT_STUCK_FLAG_AFTER_SECS;
use crate::ingest::models::{JobStatus, UploadJob};

use super::get_job::UploadJobView;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct ListJobsQuery {
    pub owner_id: Option<Uuid>,
    pub status: Option<String>,
    pub parent_job_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(skip, default = "default_stuck_flag")]
    pub stuck_flag_after_secs: u64,
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

fn default_stuck_flag() -> u64 {
    DEFAULT_STUCK_FLAG_AFTER_SECS
}

#[derive(Debug, Clone, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<UploadJobView>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ListJobsError {
    #[error("Unknown status filter: {0}")]
    BadStatus(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// List jobs newest-first with optional owner, status, and parent filters.
#[tracing::instrument(skip(pool))]
pub async fn handle(pool: &PgPool, query: ListJobsQuery) -> Result<ListJobsResponse, ListJobsError> {
    if let Some(status) = &query.status {
        status
            .parse::<JobStatus>()
            .map_err(|_| ListJobsError::BadStatus(status.clone()))?;
    }
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.max(0);

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM upload_jobs
         WHERE ($1::uuid IS NULL OR owner_id = $1)
           AND ($2::text IS NULL OR status = $2)
           AND ($3::uuid IS NULL OR parent_job_id = $3)",
    )
    .bind(query.owner_id)
    .bind(&query.status)
    .bind(query.parent_job_id)
    .fetch_one(pool)
    .await?;

    let jobs: Vec<UploadJob> = sqlx::query_as(
        "SELECT * FROM upload_jobs
         WHERE ($1::uuid IS NULL OR owner_id = $1)
           AND ($2::text IS NULL OR status = $2)
           AND ($3::uuid IS NULL OR parent_job_id = $3)
         ORDER BY created_at DESC
         OFFSET $4 LIMIT $5",
    )
    .bind(query.owner_id)
    .bind(&query.status)
    .bind(query.parent_job_id)
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let now = Utc::now();
    let jobs = jobs
        .into_iter()
        .map(|job| UploadJobView::from_job(job, query.stuck_flag_after_secs, now))
        .collect();

    Ok(ListJobsResponse {
        jobs,
        total,
        limit,
        offset,
    })
}
