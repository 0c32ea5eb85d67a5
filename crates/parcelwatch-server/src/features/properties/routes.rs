use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::api::response::{ApiResponse, ErrorResponse};
use crate::ingest::aggregate::BackfillRequest;

use super::commands::{self, BackfillAggregatesError};
use super::queries::{
    self, GetPropertyError, GetPropertyQuery, ListPropertiesError, ListPropertiesQuery,
};

pub fn properties_routes() -> Router<PgPool> {
    Router::new()
        .route("/", get(list_properties))
        .route("/:id", get(get_property))
        .route("/backfill-aggregates", post(backfill_aggregates))
}

#[tracing::instrument(skip(pool, query))]
async fn list_properties(
    State(pool): State<PgPool>,
    Query(query): Query<ListPropertiesQuery>,
) -> Result<Response, PropertyApiError> {
    let response = queries::list_properties::handle(&pool, query).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(response))).into_response())
}

#[tracing::instrument(skip(pool))]
async fn get_property(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<Response, PropertyApiError> {
    let query = GetPropertyQuery { property_id: id };
    let response = queries::get_property::handle(&pool, query).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(response))).into_response())
}

#[tracing::instrument(skip(pool, request))]
async fn backfill_aggregates(
    State(pool): State<PgPool>,
    Json(request): Json<BackfillRequest>,
) -> Result<Response, PropertyApiError> {
    let report = commands::backfill_aggregates::handle(&pool, request).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(report))).into_response())
}

#[derive(Debug)]
enum PropertyApiError {
    Get(GetPropertyError),
    List(ListPropertiesError),
    Backfill(BackfillAggregatesError),
}

impl From<GetPropertyError> for PropertyApiError {
    fn from(err: GetPropertyError) -> Self {
        Self::Get(err)
    }
}

impl From<ListPropertiesError> for PropertyApiError {
    fn from(err: ListPropertiesError) -> Self {
        Self::List(err)
    }
}

impl From<BackfillAggregatesError> for PropertyApiError {
    fn from(err: BackfillAggregatesError) -> Self {
        Self::Backfill(err)
    }
}

impl IntoResponse for PropertyApiError {
    fn into_response(self) -> Response {
        match self {
            PropertyApiError::Get(GetPropertyError::NotFound(id)) => {
                let error =
                    ErrorResponse::new("NOT_FOUND", format!("Property not found: {}", id));
                (StatusCode::NOT_FOUND, Json(error)).into_response()
            }
            PropertyApiError::Backfill(e @ BackfillAggregatesError::InvalidState(_)) => {
                let error = ErrorResponse::new("VALIDATION_ERROR", e.to_string());
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            }
            PropertyApiError::Get(GetPropertyError::Database(e))
            | PropertyApiError::List(ListPropertiesError::Database(e))
            | PropertyApiError::Backfill(BackfillAggregatesError::Database(e)) => {
                tracing::error!("Database error in properties API: {:?}", e);
                let error = ErrorResponse::new("DATABASE_ERROR", "A database error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_structure() {
        let router = properties_routes();
        assert!(format!("{:?}", router).contains("Router"));
    }
}
