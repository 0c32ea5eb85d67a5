use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::ingest::models::JobStatus;
use crate::ingest::parser::{self, DeclaredLocality, LocalityDetection, ParseError};
use crate::ingest::locality;
use crate::storage::Storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUploadCommand {
    pub owner_id: Uuid,
    pub filename: String,
    #[serde(skip)]
    pub content: Vec<u8>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub state: Option<String>,
}

/// The job id plus a locality preview so the client can decide up front
/// whether to process the file as-is or split it by city.
#[derive(Debug, Clone, Serialize)]
pub struct CreateUploadResponse {
    pub job_id: Uuid,
    pub storage_key: String,
    pub file_size: i64,
    pub status: String,
    pub detection: LocalityDetection,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateUploadError {
    #[error("Filename is required and cannot be empty")]
    FilenameRequired,
    #[error("Filename must not exceed 255 characters")]
    FilenameLength,
    #[error("File content is required and cannot be empty")]
    ContentRequired,
    #[error("Unrecognized state code: {0}")]
    InvalidState(String),
    #[error("CSV validation failed: {}", .0.join("; "))]
    InvalidCsv(Vec<String>),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CreateUploadCommand {
    pub fn validate(&self) -> Result<(), CreateUploadError> {
        if self.filename.trim().is_empty() {
            return Err(CreateUploadError::FilenameRequired);
        }
        if self.filename.len() > 255 {
            return Err(CreateUploadError::FilenameLength);
        }
        if self.content.is_empty() {
            return Err(CreateUploadError::ContentRequired);
        }
        if let Some(state) = &self.state {
            if !state.trim().is_empty() && !locality::is_valid_state(state) {
                return Err(CreateUploadError::InvalidState(state.clone()));
            }
        }
        Ok(())
    }
}

/// Validate the CSV, store the source blob, and create a queued job.
///
/// Nothing is persisted for a structurally invalid file; the caller gets
/// the full problem list in one response instead of a dead job row.
#[tracing::instrument(skip(pool, storage, command), fields(filename = %command.filename))]
pub async fn handle(
    pool: &PgPool,
    storage: &Storage,
    command: CreateUploadCommand,
) -> Result<CreateUploadResponse, CreateUploadError> {
    command.validate()?;

    let text = String::from_utf8_lossy(&command.content);
    let problems = parser::validate_structure(&text);
    if !problems.is_empty() {
        return Err(CreateUploadError::InvalidCsv(problems));
    }

    let declared = DeclaredLocality::new(command.city.clone(), command.state.clone());
    let detection = parser::parse_csv(&text, &declared)?.detection;

    let key = storage.build_upload_key(command.owner_id, &command.filename);
    let file_size = command.content.len() as i64;
    storage
        .upload(&key, command.content, Some("text/csv".to_string()))
        .await?;

    let state = command.state.as_deref().and_then(locality::normalize_state);
    let job_id: Uuid = sqlx::query_scalar(
        "INSERT INTO upload_jobs
         (owner_id, storage_key, original_filename, file_size, status, city, county, state)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING id",
    )
    .bind(command.owner_id)
    .bind(&key)
    .bind(command.filename.trim())
    .bind(file_size)
    .bind(JobStatus::Queued.as_str())
    .bind(&command.city)
    .bind(&command.county)
    .bind(&state)
    .fetch_one(pool)
    .await?;

    tracing::info!(
        job_id = %job_id,
        localities = detection.localities.len(),
        total_rows = detection.total_rows,
        "upload job created"
    );

    Ok(CreateUploadResponse {
        job_id,
        storage_key: key,
        file_size,
        status: JobStatus::Queued.as_str().to_string(),
        detection,
    })
}
