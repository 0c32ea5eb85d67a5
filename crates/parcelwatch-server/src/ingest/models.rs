//! Database row types for the ingestion pipeline

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle states of an upload job.
///
/// Forward path: `Queued -> Parsing -> Processing -> Deduping ->
/// CreatingViolations -> Finalizing -> Complete`. Any state can drop to
/// `Failed`. `Complete` and `Failed` are terminal; the stuck-job monitor
/// only ever resets non-terminal jobs back to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Parsing,
    Processing,
    Deduping,
    CreatingViolations,
    Finalizing,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Parsing => "parsing",
            JobStatus::Processing => "processing",
            JobStatus::Deduping => "deduping",
            JobStatus::CreatingViolations => "creating_violations",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "parsing" => Ok(JobStatus::Parsing),
            "processing" => Ok(JobStatus::Processing),
            "deduping" => Ok(JobStatus::Deduping),
            "creating_violations" => Ok(JobStatus::CreatingViolations),
            "finalizing" => Ok(JobStatus::Finalizing),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// A row from `upload_jobs`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UploadJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub storage_key: String,
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
    pub warnings: Option<Vec<String>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadJob {
    /// Parsed status, falling back to `Failed` for unrecognized values so a
    /// corrupted row is never mistaken for in-flight work.
    pub fn status(&self) -> JobStatus {
        self.status.parse().unwrap_or(JobStatus::Failed)
    }
}

/// A row from `staging_rows`: the parsed, validated copy of one source CSV
/// line, with its stamped locality and (after dedup) property link.
#[derive(Debug, Clone, FromRow)]
pub struct StagingRow {
    pub id: i64,
    pub job_id: Uuid,
    pub row_num: i32,
    pub case_id: Option<String>,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: Option<String>,
    pub violation_type: Option<String>,
    pub status: Option<String>,
    pub opened_date: Option<String>,
    pub last_updated_date: Option<String>,
    pub property_id: Option<Uuid>,
}

/// A row from `properties`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PropertyRecord {
    pub id: Uuid,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub county: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub total_violations: i32,
    pub open_violations: i32,
    pub violation_types: Vec<String>,
    pub repeat_offender: bool,
    pub last_enforcement_date: Option<NaiveDate>,
    pub lead_score: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from `violations`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ViolationRecord {
    pub id: Uuid,
    pub property_id: Uuid,
    pub case_id: Option<String>,
    pub violation_type: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub opened_date: Option<NaiveDate>,
    pub last_updated_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The subset of violation columns the aggregation engine reads.
#[derive(Debug, Clone, FromRow)]
pub struct ViolationFacts {
    pub case_id: Option<String>,
    pub violation_type: Option<String>,
    pub status: Option<String>,
    pub opened_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        let all = [
            JobStatus::Queued,
            JobStatus::Parsing,
            JobStatus::Processing,
            JobStatus::Deduping,
            JobStatus::CreatingViolations,
            JobStatus::Finalizing,
            JobStatus::Complete,
            JobStatus::Failed,
        ];
        for status in all {
            let parsed: JobStatus = status
                .as_str()
                .parse()
                .unwrap_or_else(|e| panic!("{}", e));
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Deduping.is_terminal());
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("bogus".parse::<JobStatus>().is_err());
    }
}
