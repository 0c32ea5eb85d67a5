use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::api::response::{ApiResponse, ErrorResponse};
use crate::features::FeatureState;
use crate::ingest::UploadPipeline;

use super::commands::{
    self, CreateUploadCommand, CreateUploadError, DeleteUploadCommand, DeleteUploadError,
    ProcessUploadCommand, ProcessUploadError, ReprocessUploadCommand, ReprocessUploadError,
    SplitUploadCommand, SplitUploadError,
};
use super::queries::{
    self, GetJobError, GetJobQuery, ListJobsError, ListJobsQuery,
};

pub fn uploads_routes() -> Router<FeatureState> {
    Router::new()
        .route("/", post(create_upload).get(list_jobs))
        .route("/:id", get(get_job).delete(delete_upload))
        .route("/:id/process", post(process_upload))
        .route("/:id/split", post(split_upload))
        .route("/:id/reprocess", post(reprocess_upload))
}

/// Owner identity comes from the `x-user-id` header; absent or malformed
/// values fall back to the nil UUID (anonymous uploads share one bucket).
fn owner_from_headers(headers: &HeaderMap) -> Uuid {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(Uuid::nil())
}

fn pipeline_for(state: &FeatureState) -> UploadPipeline {
    UploadPipeline::new(state.db.clone(), state.storage.clone(), state.ingest.clone())
}

#[tracing::instrument(skip(state, headers, multipart))]
async fn create_upload(
    State(state): State<FeatureState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, UploadApiError> {
    let owner_id = owner_from_headers(&headers);
    let mut filename: Option<String> = None;
    let mut content: Option<Vec<u8>> = None;
    let mut city: Option<String> = None;
    let mut county: Option<String> = None;
    let mut declared_state: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadApiError::Multipart(format!("Failed to read multipart field: {}", e)))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                let data = field.bytes().await.map_err(|e| {
                    UploadApiError::Multipart(format!("Failed to read file bytes: {}", e))
                })?;
                content = Some(data.to_vec());
            }
            "city" => {
                city = Some(field.text().await.map_err(|e| {
                    UploadApiError::Multipart(format!("Failed to read city field: {}", e))
                })?);
            }
            "county" => {
                county = Some(field.text().await.map_err(|e| {
                    UploadApiError::Multipart(format!("Failed to read county field: {}", e))
                })?);
            }
            "state" => {
                declared_state = Some(field.text().await.map_err(|e| {
                    UploadApiError::Multipart(format!("Failed to read state field: {}", e))
                })?);
            }
            _ => {}
        }
    }

    let content = content
        .ok_or_else(|| UploadApiError::Multipart("No file field found in multipart data".to_string()))?;

    let command = CreateUploadCommand {
        owner_id,
        filename: filename.unwrap_or_else(|| "upload.csv".to_string()),
        content,
        city: city.filter(|s| !s.trim().is_empty()),
        county: county.filter(|s| !s.trim().is_empty()),
        state: declared_state.filter(|s| !s.trim().is_empty()),
    };

    let response = commands::create::handle(&state.db, &state.storage, command).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))).into_response())
}

#[tracing::instrument(skip(state))]
async fn process_upload(
    State(state): State<FeatureState>,
    Path(id): Path<Uuid>,
) -> Result<Response, UploadApiError> {
    let command = ProcessUploadCommand { job_id: id };
    let response = commands::process::handle(&state.db, pipeline_for(&state), command).await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(response))).into_response())
}

#[tracing::instrument(skip(state))]
async fn split_upload(
    State(state): State<FeatureState>,
    Path(id): Path<Uuid>,
) -> Result<Response, UploadApiError> {
    let command = SplitUploadCommand { job_id: id };
    let response =
        commands::split::handle(&state.db, &state.storage, pipeline_for(&state), command).await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(response))).into_response())
}

#[tracing::instrument(skip(state))]
async fn reprocess_upload(
    State(state): State<FeatureState>,
    Path(id): Path<Uuid>,
) -> Result<Response, UploadApiError> {
    let command = ReprocessUploadCommand { job_id: id };
    let response =
        commands::reprocess::handle(&state.db, &state.storage, pipeline_for(&state), command)
            .await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(response))).into_response())
}

#[tracing::instrument(skip(state))]
async fn delete_upload(
    State(state): State<FeatureState>,
    Path(id): Path<Uuid>,
) -> Result<Response, UploadApiError> {
    let command = DeleteUploadCommand { job_id: id };
    let response = commands::delete::handle(&state.db, &state.storage, command).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(response))).into_response())
}

#[tracing::instrument(skip(state))]
async fn get_job(
    State(state): State<FeatureState>,
    Path(id): Path<Uuid>,
) -> Result<Response, UploadApiError> {
    let query = GetJobQuery {
        job_id: id,
        stuck_flag_after_secs: state.ingest.stuck_flag_after_secs,
    };
    let response = queries::get_job::handle(&state.db, query).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(response))).into_response())
}

#[tracing::instrument(skip(state, query))]
async fn list_jobs(
    State(state): State<FeatureState>,
    Query(mut query): Query<ListJobsQuery>,
) -> Result<Response, UploadApiError> {
    query.stuck_flag_after_secs = state.ingest.stuck_flag_after_secs;
    let response = queries::list_jobs::handle(&state.db, query).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(response))).into_response())
}

#[derive(Debug)]
enum UploadApiError {
    Multipart(String),
    Create(CreateUploadError),
    Process(ProcessUploadError),
    Split(SplitUploadError),
    Reprocess(ReprocessUploadError),
    Delete(DeleteUploadError),
    GetJob(GetJobError),
    ListJobs(ListJobsError),
}

impl From<CreateUploadError> for UploadApiError {
    fn from(err: CreateUploadError) -> Self {
        Self::Create(err)
    }
}

impl From<ProcessUploadError> for UploadApiError {
    fn from(err: ProcessUploadError) -> Self {
        Self::Process(err)
    }
}

impl From<SplitUploadError> for UploadApiError {
    fn from(err: SplitUploadError) -> Self {
        Self::Split(err)
    }
}

impl From<ReprocessUploadError> for UploadApiError {
    fn from(err: ReprocessUploadError) -> Self {
        Self::Reprocess(err)
    }
}

impl From<DeleteUploadError> for UploadApiError {
    fn from(err: DeleteUploadError) -> Self {
        Self::Delete(err)
    }
}

impl From<GetJobError> for UploadApiError {
    fn from(err: GetJobError) -> Self {
        Self::GetJob(err)
    }
}

impl From<ListJobsError> for UploadApiError {
    fn from(err: ListJobsError) -> Self {
        Self::ListJobs(err)
    }
}

impl IntoResponse for UploadApiError {
    fn into_response(self) -> Response {
        match self {
            UploadApiError::Multipart(message) => {
                let error = ErrorResponse::new("MULTIPART_ERROR", message);
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            }

            UploadApiError::Create(CreateUploadError::InvalidCsv(problems)) => {
                let error = ErrorResponse::with_details(
                    "VALIDATION_ERROR",
                    "CSV validation failed",
                    serde_json::json!({ "problems": problems }),
                );
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            }
            UploadApiError::Create(
                e @ (CreateUploadError::FilenameRequired
                | CreateUploadError::FilenameLength
                | CreateUploadError::ContentRequired
                | CreateUploadError::InvalidState(_)
                | CreateUploadError::Parse(_)),
            ) => {
                let error = ErrorResponse::new("VALIDATION_ERROR", e.to_string());
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            }
            UploadApiError::Create(CreateUploadError::Storage(e)) => {
                tracing::error!("Storage error during upload create: {}", e);
                let error = ErrorResponse::new("STORAGE_ERROR", "A storage error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            }
            UploadApiError::Create(CreateUploadError::Database(e)) => database_error(e),

            UploadApiError::Process(ProcessUploadError::NotFound(id)) => not_found(id),
            UploadApiError::Process(e @ ProcessUploadError::InvalidState(_)) => {
                let error = ErrorResponse::new("INVALID_STATE", e.to_string());
                (StatusCode::CONFLICT, Json(error)).into_response()
            }
            UploadApiError::Process(ProcessUploadError::Database(e)) => database_error(e),

            UploadApiError::Split(SplitUploadError::NotFound(id)) => not_found(id),
            UploadApiError::Split(e @ SplitUploadError::InvalidState(_)) => {
                let error = ErrorResponse::new("INVALID_STATE", e.to_string());
                (StatusCode::CONFLICT, Json(error)).into_response()
            }
            UploadApiError::Split(e @ (SplitUploadError::Parse(_) | SplitUploadError::Split(_))) => {
                let error = ErrorResponse::new("VALIDATION_ERROR", e.to_string());
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            }
            UploadApiError::Split(SplitUploadError::Storage(e)) => {
                tracing::error!("Storage error during split: {}", e);
                let error = ErrorResponse::new("STORAGE_ERROR", "A storage error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            }
            UploadApiError::Split(SplitUploadError::Database(e)) => database_error(e),

            UploadApiError::Reprocess(ReprocessUploadError::NotFound(id)) => not_found(id),
            UploadApiError::Reprocess(e @ ReprocessUploadError::SourceFileMissing) => {
                let error = ErrorResponse::new("SOURCE_FILE_MISSING", e.to_string());
                (StatusCode::GONE, Json(error)).into_response()
            }
            UploadApiError::Reprocess(ReprocessUploadError::Storage(e)) => {
                tracing::error!("Storage error during reprocess: {}", e);
                let error = ErrorResponse::new("STORAGE_ERROR", "A storage error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            }
            UploadApiError::Reprocess(ReprocessUploadError::Database(e)) => database_error(e),

            UploadApiError::Delete(DeleteUploadError::NotFound(id)) => not_found(id),
            UploadApiError::Delete(DeleteUploadError::Database(e)) => database_error(e),

            UploadApiError::GetJob(GetJobError::NotFound(id)) => not_found(id),
            UploadApiError::GetJob(GetJobError::Database(e)) => database_error(e),

            UploadApiError::ListJobs(e @ ListJobsError::BadStatus(_)) => {
                let error = ErrorResponse::new("VALIDATION_ERROR", e.to_string());
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            }
            UploadApiError::ListJobs(ListJobsError::Database(e)) => database_error(e),
        }
    }
}

fn not_found(id: Uuid) -> Response {
    let error = ErrorResponse::new("NOT_FOUND", format!("Upload job not found: {}", id));
    (StatusCode::NOT_FOUND, Json(error)).into_response()
}

fn database_error(e: sqlx::Error) -> Response {
    tracing::error!("Database error in uploads API: {:?}", e);
    let error = ErrorResponse::new("DATABASE_ERROR", "A database error occurred");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(owner_from_headers(&headers), Uuid::nil());

        headers.insert(
            "x-user-id",
            "5f0c3a52-0f48-43b1-b8f1-8f0f4d1e1a2b".parse().unwrap(),
        );
        assert_eq!(
            owner_from_headers(&headers),
            "5f0c3a52-0f48-43b1-b8f1-8f0f4d1e1a2b".parse::<Uuid>().unwrap()
        );

        headers.insert("x-user-id", "not-a-uuid".parse().unwrap());
        assert_eq!(owner_from_headers(&headers), Uuid::nil());
    }

    #[test]
    fn test_routes_structure() {
        let router = uploads_routes();
        assert!(format!("{:?}", router).contains("Router"));
    }
}
