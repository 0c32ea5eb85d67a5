use sqlx::PgPool;

use crate::ingest::aggregate::{self, BackfillReport, BackfillRequest};
use crate::ingest::locality;

#[derive(Debug, thiserror::Error)]
pub enum BackfillAggregatesError {
    #[error("Unrecognized state code: {0}")]
    InvalidState(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Run one batch of the aggregate backfill. Synchronous by design: batches
/// are small and the response carries `next_offset` for the operator's next
/// call.
#[tracing::instrument(skip(pool))]
pub async fn handle(
    pool: &PgPool,
    request: BackfillRequest,
) -> Result<BackfillReport, BackfillAggregatesError> {
    if let Some(state) = &request.state {
        if !locality::is_valid_state(state) {
            return Err(BackfillAggregatesError::InvalidState(state.clone()));
        }
    }

    let report = aggregate::run_backfill(pool, &request).await?;

    tracing::info!(
        processed = report.processed,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        dry_run = report.dry_run,
        percent_complete = report.percent_complete,
        "aggregate backfill batch finished"
    );

    Ok(report)
}
