use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::ingest::config::DEFAULT_STUCK_FLAG_AFTER_SECS;
use crate::ingest::models::UploadJob;

#[derive(Debug, Clone)]
pub struct GetJobQuery {
    pub job_id: Uuid,
    /// Age at which a non-terminal job is flagged stuck in the response.
    pub stuck_flag_after_secs: u64,
}

impl GetJobQuery {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            stuck_flag_after_secs: DEFAULT_STUCK_FLAG_AFTER_SECS,
        }
    }
}

/// Poller-facing view of one upload job.
#[derive(Debug, Clone, Serialize)]
pub struct UploadJobView {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub original_filename: String,
    pub file_size: i64,
    pub status: String,
    pub city: Option<String>,
    pub county: Option<String>,
    pub state: Option<String>,
    pub parent_job_id: Option<Uuid>,
    pub total_rows: i32,
    pub processed_rows: i32,
    pub properties_created: i32,
    pub violations_created: i32,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
    /// True when the job has sat in a working state for so long that an
    /// operator should look at it. Purely advisory; the monitor acts on a
    /// much shorter threshold.
    pub stuck: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadJobView {
    pub fn from_job(job: UploadJob, stuck_flag_after_secs: u64, now: DateTime<Utc>) -> Self {
        let stuck = !job.status().is_terminal()
            && job
                .started_at
                .is_some_and(|started| {
                    (now - started).num_seconds() >= stuck_flag_after_secs as i64
                });
        Self {
            id: job.id,
            owner_id: job.owner_id,
            original_filename: job.original_filename,
            file_size: job.file_size,
            status: job.status,
            city: job.city,
            county: job.county,
            state: job.state,
            parent_job_id: job.parent_job_id,
            total_rows: job.total_rows,
            processed_rows: job.processed_rows,
            properties_created: job.properties_created,
            violations_created: job.violations_created,
            error_message: job.error_message,
            warnings: job.warnings.unwrap_or_default(),
            stuck,
            started_at: job.started_at,
            finished_at: job.finished_at,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GetJobError {
    #[error("Upload job not found: {0}")]
    NotFound(Uuid),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[tracing::instrument(skip(pool))]
pub async fn handle(pool: &PgPool, query: GetJobQuery) -> Result<UploadJobView, GetJobError> {
    let job: UploadJob = sqlx::query_as("SELECT * FROM upload_jobs WHERE id = $1")
        .bind(query.job_id)
        .fetch_optional(pool)
        .await?
        .ok_or(GetJobError::NotFound(query.job_id))?;

    Ok(UploadJobView::from_job(
        job,
        query.stuck_flag_after_secs,
        Utc::now(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(status: &str, started_secs_ago: Option<i64>, now: DateTime<Utc>) -> UploadJob {
        UploadJob {
            id: Uuid::nil(),
            owner_id: Uuid::nil(),
            storage_key: "uploads/x/file.csv".to_string(),
            original_filename: "file.csv".to_string(),
            file_size: 10,
            status: status.to_string(),
            city: None,
            county: None,
            state: None,
            parent_job_id: None,
            total_rows: 0,
            processed_rows: 0,
            properties_created: 0,
            violations_created: 0,
            error_message: None,
            warnings: None,
            started_at: started_secs_ago.map(|s| now - Duration::seconds(s)),
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_old_working_job_flagged_stuck() {
        let now = Utc::now();
        let view = UploadJobView::from_job(job("deduping", Some(7200), now), 3600, now);
        assert!(view.stuck);
    }

    #[test]
    fn test_fresh_working_job_not_stuck() {
        let now = Utc::now();
        let view = UploadJobView::from_job(job("deduping", Some(60), now), 3600, now);
        assert!(!view.stuck);
    }

    #[test]
    fn test_terminal_job_never_stuck() {
        let now = Utc::now();
        let view = UploadJobView::from_job(job("failed", Some(7200), now), 3600, now);
        assert!(!view.stuck);
        let view = UploadJobView::from_job(job("complete", Some(7200), now), 3600, now);
        assert!(!view.stuck);
    }

    #[test]
    fn test_never_started_job_not_stuck() {
        let now = Utc::now();
        let view = UploadJobView::from_job(job("queued", None, now), 3600, now);
        assert!(!view.stuck);
    }
}
