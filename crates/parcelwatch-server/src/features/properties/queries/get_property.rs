use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::ingest::aggregate::is_open_status;
use crate::ingest::models::{PropertyRecord, ViolationRecord};

#[derive(Debug, Clone)]
pub struct GetPropertyQuery {
    pub property_id: Uuid,
}

/// One violation as shown to consumers, with `days_open` computed from
/// today's date rather than read from a stored column.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationView {
    pub id: Uuid,
    pub case_id: Option<String>,
    pub violation_type: Option<String>,
    pub status: Option<String>,
    pub is_open: bool,
    pub opened_date: Option<NaiveDate>,
    pub last_updated_date: Option<NaiveDate>,
    pub days_open: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyView {
    #[serde(flatten)]
    pub property: PropertyRecord,
    pub violations: Vec<ViolationView>,
}

/// Whole days since the violation was opened, as of `today`. Future-dated
/// opens clamp to zero rather than going negative.
pub fn days_open(opened_date: Option<NaiveDate>, today: NaiveDate) -> Option<i64> {
    opened_date.map(|opened| (today - opened).num_days().max(0))
}

fn violation_view(v: ViolationRecord, today: NaiveDate) -> ViolationView {
    ViolationView {
        id: v.id,
        case_id: v.case_id,
        is_open: is_open_status(v.status.as_deref()),
        violation_type: v.violation_type,
        status: v.status,
        days_open: days_open(v.opened_date, today),
        opened_date: v.opened_date,
        last_updated_date: v.last_updated_date,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GetPropertyError {
    #[error("Property not found: {0}")]
    NotFound(Uuid),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[tracing::instrument(skip(pool))]
pub async fn handle(
    pool: &PgPool,
    query: GetPropertyQuery,
) -> Result<PropertyView, GetPropertyError> {
    let property: PropertyRecord = sqlx::query_as("SELECT * FROM properties WHERE id = $1")
        .bind(query.property_id)
        .fetch_optional(pool)
        .await?
        .ok_or(GetPropertyError::NotFound(query.property_id))?;

    let violations: Vec<ViolationRecord> = sqlx::query_as(
        "SELECT * FROM violations
         WHERE property_id = $1
         ORDER BY opened_date DESC NULLS LAST, created_at DESC",
    )
    .bind(query.property_id)
    .fetch_all(pool)
    .await?;

    let today = Utc::now().date_naive();
    Ok(PropertyView {
        property,
        violations: violations
            .into_iter()
            .map(|v| violation_view(v, today))
            .collect(),
    })
}
