//! The upload job state machine
//!
//! One pipeline run takes a queued job through parse, stage, dedup,
//! violation creation, and aggregate finalization. Every phase transition
//! and progress counter is persisted before moving on, so a poller watching
//! the job row sees honest progress and a crashed run leaves a resumable
//! trail for the stuck-job monitor.
//!
//! Failure at any phase drops the job to `failed` with a stored error
//! message; it never panics the worker and never leaves the job in a
//! phantom in-flight state.

use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::storage::Storage;

use super::config::IngestConfig;
use super::models::{JobStatus, StagingRow, UploadJob};
use super::parser::{self, DeclaredLocality, RejectReason, RejectedRow};
use super::{aggregate, dedup};

/// Violation type values longer than this are truncated; the full text
/// still lands in the description column.
const VIOLATION_TYPE_MAX: usize = 100;

const ERROR_MESSAGE_MAX: usize = 1000;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("job {0} not found")]
    JobNotFound(Uuid),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("parse failed: {0}")]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Executes upload jobs against the database and blob storage.
#[derive(Clone)]
pub struct UploadPipeline {
    db: PgPool,
    storage: Storage,
    config: IngestConfig,
}

impl UploadPipeline {
    pub fn new(db: PgPool, storage: Storage, config: IngestConfig) -> Self {
        Self { db, storage, config }
    }

    /// Run the job on a background task. The handle is rarely awaited;
    /// callers respond 202 and let the poller watch the job row.
    pub fn spawn(self, job_id: Uuid) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(job_id).await;
        })
    }

    /// Run the job to a terminal state, absorbing all errors into the job
    /// row.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn run(&self, job_id: Uuid) {
        match self.execute(job_id).await {
            Ok(()) => info!("upload job completed"),
            Err(e) => {
                error!(error = %e, "upload job failed");
                if let Err(fail_err) = self.fail_job(job_id, &e.to_string()).await {
                    error!(error = %fail_err, "could not mark job as failed");
                }
            }
        }
    }

    async fn execute(&self, job_id: Uuid) -> Result<(), PipelineError> {
        let job = self.fetch_job(job_id).await?;
        let mut warnings: Vec<String> = Vec::new();

        // Parse phase. The claim is atomic; if a concurrent run already
        // moved the job out of queued, this run backs off.
        if !self.begin_run(job_id).await? {
            info!("job is no longer queued, another run owns it");
            return Ok(());
        }
        let bytes = self.storage.download(&job.storage_key).await?;
        let text = String::from_utf8_lossy(&bytes);
        let declared = DeclaredLocality::new(job.city.clone(), job.state.clone());
        let outcome = parser::parse_csv(&text, &declared)?;

        warnings.extend(summarize_rejections(&outcome.rejected));
        if outcome.detection.is_multi_city() {
            warnings.push(format!(
                "file contains {} localities; consider splitting before processing",
                outcome.detection.localities.len()
            ));
        }
        self.set_total_rows(job_id, outcome.detection.total_rows as i32)
            .await?;

        // Staging phase.
        self.set_status(job_id, JobStatus::Processing).await?;
        let mut processed = 0i32;
        for chunk in outcome.rows.chunks(self.config.staging_batch_size) {
            self.insert_staging_batch(job_id, chunk).await?;
            processed += chunk.len() as i32;
            self.set_processed_rows(job_id, processed).await?;
        }

        if outcome.rows.is_empty() {
            warnings.push("no rows with a usable address and locality".to_string());
            self.complete_job(job_id, &warnings).await?;
            return Ok(());
        }

        // Dedup phase.
        self.set_status(job_id, JobStatus::Deduping).await?;
        let staged = self.fetch_staging_rows(job_id).await?;
        let candidates = dedup::plan_property_candidates(&staged, job.county.as_deref());
        let existing = dedup::resolve_property_ids(&self.db, &candidates).await?;
        let missing: Vec<_> = candidates
            .iter()
            .filter(|c| !existing.contains_key(&c.key))
            .cloned()
            .collect();
        let created = dedup::insert_missing_properties(
            &self.db,
            &missing,
            self.config.staging_batch_size,
        )
        .await?;
        let resolved = dedup::resolve_property_ids(&self.db, &candidates).await?;
        dedup::link_staging_rows(&self.db, job_id, &resolved).await?;
        self.set_properties_created(job_id, created as i32).await?;
        info!(
            candidates = candidates.len(),
            existing = existing.len(),
            created,
            "property dedup finished"
        );

        // Violation phase. Staging rows are re-read so property links come
        // from the database, not from in-memory bookkeeping.
        self.set_status(job_id, JobStatus::CreatingViolations).await?;
        let staged = self.fetch_staging_rows(job_id).await?;
        let mut unlinked = 0usize;
        let linked: Vec<&StagingRow> = staged
            .iter()
            .filter(|row| {
                if row.property_id.is_none() {
                    unlinked += 1;
                }
                row.property_id.is_some()
            })
            .collect();
        if unlinked > 0 {
            warn!(unlinked, "staging rows without a property link were skipped");
            warnings.push(format!(
                "{} rows skipped: could not be matched to a property",
                unlinked
            ));
        }

        let mut violations_created = 0u64;
        for chunk in linked.chunks(self.config.violation_batch_size) {
            violations_created += self.insert_violation_batch(chunk).await?;
            self.set_violations_created(job_id, violations_created as i32)
                .await?;
        }

        // Finalize phase: recompute aggregates for every touched property.
        self.set_status(job_id, JobStatus::Finalizing).await?;
        let mut touched: Vec<Uuid> = staged.iter().filter_map(|r| r.property_id).collect();
        touched.sort();
        touched.dedup();
        let mut aggregate_failures = 0usize;
        for property_id in &touched {
            if let Err(e) = aggregate::refresh_property_aggregates(&self.db, *property_id).await {
                warn!(property_id = %property_id, error = %e, "aggregate refresh failed");
                aggregate_failures += 1;
            }
        }
        if aggregate_failures > 0 {
            warnings.push(format!(
                "{} properties left with stale aggregates; run a backfill",
                aggregate_failures
            ));
        }

        self.complete_job(job_id, &warnings).await?;
        Ok(())
    }

    async fn fetch_job(&self, job_id: Uuid) -> Result<UploadJob, PipelineError> {
        sqlx::query_as::<_, UploadJob>("SELECT * FROM upload_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(PipelineError::JobNotFound(job_id))
    }

    /// Claim a queued job for this run. Returns false when the job is in
    /// any other state, so concurrent triggers cannot double-run it.
    async fn begin_run(&self, job_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE upload_jobs
             SET status = $2, started_at = now(), error_message = NULL, updated_at = now()
             WHERE id = $1 AND status = $3",
        )
        .bind(job_id)
        .bind(JobStatus::Parsing.as_str())
        .bind(JobStatus::Queued.as_str())
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE upload_jobs SET status = $2, updated_at = now() WHERE id = $1")
            .bind(job_id)
            .bind(status.as_str())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn set_total_rows(&self, job_id: Uuid, total: i32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE upload_jobs SET total_rows = $2, updated_at = now() WHERE id = $1")
            .bind(job_id)
            .bind(total)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn set_processed_rows(&self, job_id: Uuid, processed: i32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE upload_jobs SET processed_rows = $2, updated_at = now() WHERE id = $1")
            .bind(job_id)
            .bind(processed)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn set_properties_created(&self, job_id: Uuid, count: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE upload_jobs SET properties_created = $2, updated_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .bind(count)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_violations_created(&self, job_id: Uuid, count: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE upload_jobs SET violations_created = $2, updated_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .bind(count)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn complete_job(&self, job_id: Uuid, warnings: &[String]) -> Result<(), sqlx::Error> {
        let capped: Vec<String> = warnings
            .iter()
            .take(self.config.max_warnings)
            .cloned()
            .collect();
        sqlx::query(
            "UPDATE upload_jobs
             SET status = $2, warnings = $3, finished_at = now(), updated_at = now()
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(JobStatus::Complete.as_str())
        .bind(&capped)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, message: &str) -> Result<(), sqlx::Error> {
        let message: String = message.chars().take(ERROR_MESSAGE_MAX).collect();
        sqlx::query(
            "UPDATE upload_jobs
             SET status = $2, error_message = $3, finished_at = now(), updated_at = now()
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(JobStatus::Failed.as_str())
        .bind(message)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn insert_staging_batch(
        &self,
        job_id: Uuid,
        rows: &[parser::ParsedRow],
    ) -> Result<(), sqlx::Error> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO staging_rows \
             (job_id, row_num, case_id, address, city, state, zip, violation_type, status, opened_date, last_updated_date) ",
        );
        builder.push_values(rows, |mut b, row| {
            b.push_bind(job_id)
                .push_bind(row.row_num)
                .push_bind(&row.case_id)
                .push_bind(&row.address)
                .push_bind(&row.city)
                .push_bind(&row.state)
                .push_bind(&row.zip)
                .push_bind(&row.violation_type)
                .push_bind(&row.status)
                .push_bind(&row.opened_date)
                .push_bind(&row.last_updated_date);
        });
        builder.push(" ON CONFLICT (job_id, row_num) DO NOTHING");
        builder.build().execute(&self.db).await?;
        Ok(())
    }

    async fn fetch_staging_rows(&self, job_id: Uuid) -> Result<Vec<StagingRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM staging_rows WHERE job_id = $1 ORDER BY row_num ASC")
            .bind(job_id)
            .fetch_all(&self.db)
            .await
    }

    async fn insert_violation_batch(&self, rows: &[&StagingRow]) -> Result<u64, sqlx::Error> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO violations \
             (property_id, case_id, violation_type, description, status, opened_date, last_updated_date) ",
        );
        builder.push_values(rows, |mut b, row| {
            let description = row.violation_type.clone();
            let violation_type = row
                .violation_type
                .as_deref()
                .map(|t| t.chars().take(VIOLATION_TYPE_MAX).collect::<String>());
            b.push_bind(row.property_id)
                .push_bind(&row.case_id)
                .push_bind(violation_type)
                .push_bind(description)
                .push_bind(&row.status)
                .push_bind(row.opened_date.as_deref().and_then(parser::parse_flexible_date))
                .push_bind(
                    row.last_updated_date
                        .as_deref()
                        .and_then(parser::parse_flexible_date),
                );
        });
        let result = builder.build().execute(&self.db).await?;
        Ok(result.rows_affected())
    }
}

/// Reset a job so the pipeline can run it again from scratch: staged rows
/// are dropped and counters, errors, and timestamps cleared. The source
/// blob is untouched. Used by manual reprocessing and the stuck-job
/// monitor.
#[instrument(skip(pool))]
pub async fn reset_job(pool: &PgPool, job_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM staging_rows WHERE job_id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;
    sqlx::query(
        "UPDATE upload_jobs
         SET status = $2,
             total_rows = 0,
             processed_rows = 0,
             properties_created = 0,
             violations_created = 0,
             error_message = NULL,
             warnings = NULL,
             started_at = NULL,
             finished_at = NULL,
             updated_at = now()
         WHERE id = $1",
    )
    .bind(job_id)
    .bind(JobStatus::Queued.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// Collapse per-row rejections into a few human-readable warnings.
fn summarize_rejections(rejected: &[RejectedRow]) -> Vec<String> {
    let mut empty = 0usize;
    let mut missing_address = 0usize;
    let mut missing_location = 0usize;
    for row in rejected {
        match row.reason {
            RejectReason::EmptyRow => empty += 1,
            RejectReason::MissingAddress => missing_address += 1,
            RejectReason::MissingLocation => missing_location += 1,
        }
    }
    let mut warnings = Vec::new();
    if empty > 0 {
        warnings.push(format!("{} empty rows skipped", empty));
    }
    if missing_address > 0 {
        warnings.push(format!("{} rows skipped: missing address", missing_address));
    }
    if missing_location > 0 {
        warnings.push(format!(
            "{} rows skipped: no usable city/state",
            missing_location
        ));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_rejections() {
        let rejected = vec![
            RejectedRow { row_num: 1, reason: RejectReason::MissingAddress },
            RejectedRow { row_num: 4, reason: RejectReason::MissingLocation },
            RejectedRow { row_num: 7, reason: RejectReason::MissingLocation },
        ];
        let warnings = summarize_rejections(&rejected);
        assert_eq!(
            warnings,
            vec![
                "1 rows skipped: missing address".to_string(),
                "2 rows skipped: no usable city/state".to_string(),
            ]
        );
    }

    #[test]
    fn test_summarize_no_rejections() {
        assert!(summarize_rejections(&[]).is_empty());
    }

    fn test_pipeline(pool: PgPool) -> UploadPipeline {
        UploadPipeline::new(pool, crate::storage::test_storage(), IngestConfig::default())
    }

    async fn seed_job(pool: &PgPool, status: &str) -> sqlx::Result<Uuid> {
        sqlx::query_scalar(
            "INSERT INTO upload_jobs (owner_id, storage_key, original_filename, status)
             VALUES ($1, 'uploads/test/source.csv', 'source.csv', $2) RETURNING id",
        )
        .bind(Uuid::nil())
        .bind(status)
        .fetch_one(pool)
        .await
    }

    fn parsed_row(row_num: i32, address: &str) -> parser::ParsedRow {
        parser::ParsedRow {
            row_num,
            raw: vec![address.to_string()],
            case_id: None,
            address: address.to_string(),
            city: "Phoenix".to_string(),
            state: "AZ".to_string(),
            zip: Some("85001".to_string()),
            violation_type: Some("Weeds".to_string()),
            status: Some("Open".to_string()),
            opened_date: Some("2024-06-01".to_string()),
            last_updated_date: None,
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_begin_run_claims_only_queued_jobs(pool: PgPool) -> sqlx::Result<()> {
        let pipeline = test_pipeline(pool.clone());
        let job_id = seed_job(&pool, "queued").await?;

        assert!(pipeline.begin_run(job_id).await?);
        let status: String = sqlx::query_scalar("SELECT status FROM upload_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_one(&pool)
            .await?;
        assert_eq!(status, "parsing");

        // A second claim loses: the job already left queued.
        assert!(!pipeline.begin_run(job_id).await?);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_staging_insert_is_idempotent(pool: PgPool) -> sqlx::Result<()> {
        let pipeline = test_pipeline(pool.clone());
        let job_id = seed_job(&pool, "processing").await?;
        let rows = vec![parsed_row(1, "123 Main St"), parsed_row(2, "456 Oak Ave")];

        pipeline.insert_staging_batch(job_id, &rows).await?;
        pipeline.insert_staging_batch(job_id, &rows).await?;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM staging_rows WHERE job_id = $1")
                .bind(job_id)
                .fetch_one(&pool)
                .await?;
        assert_eq!(count, 2);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_reset_job_clears_staging_and_counters(pool: PgPool) -> sqlx::Result<()> {
        let pipeline = test_pipeline(pool.clone());
        let job_id = seed_job(&pool, "failed").await?;
        sqlx::query(
            "UPDATE upload_jobs
             SET total_rows = 5, processed_rows = 5, properties_created = 2,
                 violations_created = 5, error_message = 'boom',
                 warnings = ARRAY['w'], started_at = now(), finished_at = now()
             WHERE id = $1",
        )
        .bind(job_id)
        .execute(&pool)
        .await?;
        pipeline
            .insert_staging_batch(job_id, &[parsed_row(1, "123 Main St")])
            .await?;

        reset_job(&pool, job_id).await?;

        let job: UploadJob = sqlx::query_as("SELECT * FROM upload_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_one(&pool)
            .await?;
        assert_eq!(job.status, "queued");
        assert_eq!(job.total_rows, 0);
        assert_eq!(job.processed_rows, 0);
        assert_eq!(job.properties_created, 0);
        assert_eq!(job.violations_created, 0);
        assert!(job.error_message.is_none());
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());

        let staged: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM staging_rows WHERE job_id = $1")
                .bind(job_id)
                .fetch_one(&pool)
                .await?;
        assert_eq!(staged, 0);
        Ok(())
    }
}
