use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::ingest::models::PropertyRecord;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct ListPropertiesQuery {
    pub city: Option<String>,
    pub state: Option<String>,
    pub repeat_offender: Option<bool>,
    /// Only properties with at least this many open violations.
    pub min_open: Option<i32>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, Serialize)]
pub struct ListPropertiesResponse {
    pub properties: Vec<PropertyRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ListPropertiesError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// List properties worst-first (open violations, then total) with optional
/// locality and lead filters.
#[tracing::instrument(skip(pool))]
pub async fn handle(
    pool: &PgPool,
    query: ListPropertiesQuery,
) -> Result<ListPropertiesResponse, ListPropertiesError> {
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.max(0);

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM properties
         WHERE ($1::text IS NULL OR lower(city) = lower($1))
           AND ($2::text IS NULL OR lower(state) = lower($2))
           AND ($3::bool IS NULL OR repeat_offender = $3)
           AND ($4::int IS NULL OR open_violations >= $4)",
    )
    .bind(&query.city)
    .bind(&query.state)
    .bind(query.repeat_offender)
    .bind(query.min_open)
    .fetch_one(pool)
    .await?;

    let properties: Vec<PropertyRecord> = sqlx::query_as(
        "SELECT * FROM properties
         WHERE ($1::text IS NULL OR lower(city) = lower($1))
           AND ($2::text IS NULL OR lower(state) = lower($2))
           AND ($3::bool IS NULL OR repeat_offender = $3)
           AND ($4::int IS NULL OR open_violations >= $4)
         ORDER BY open_violations DESC, total_violations DESC, created_at ASC
         OFFSET $5 LIMIT $6",
    )
    .bind(&query.city)
    .bind(&query.state)
    .bind(query.repeat_offender)
    .bind(query.min_open)
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(ListPropertiesResponse {
        properties,
        total,
        limit,
        offset,
    })
}
