//! Per-property violation aggregates
//!
//! Aggregates are always recomputed in full from the property's violation
//! rows, never incremented, so a recomputation is also a repair. Days-open
//! is deliberately absent here; it is derived from `opened_date` at read
//! time and would go stale the moment it was stored.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::models::{PropertyRecord, ViolationFacts};

/// True if a raw status value means the case is still open.
pub fn is_open_status(status: Option<&str>) -> bool {
    status
        .map(|s| s.trim().eq_ignore_ascii_case("open"))
        .unwrap_or(false)
}

/// The derived rollup columns stored on a property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyAggregates {
    pub total_violations: i32,
    pub open_violations: i32,
    pub violation_types: Vec<String>,
    pub repeat_offender: bool,
    pub last_enforcement_date: Option<NaiveDate>,
}

/// Compute aggregates from the full violation set of one property.
///
/// Types are deduplicated case-insensitively (first-seen casing kept) and
/// sorted so repeated recomputation is byte-stable.
pub fn compute_aggregates(facts: &[ViolationFacts]) -> PropertyAggregates {
    let total = facts.len() as i32;
    let open = facts
        .iter()
        .filter(|f| is_open_status(f.status.as_deref()))
        .count() as i32;

    let mut types: Vec<String> = Vec::new();
    for fact in facts {
        if let Some(t) = fact.violation_type.as_deref() {
            let t = t.trim();
            if !t.is_empty() && !types.iter().any(|k| k.eq_ignore_ascii_case(t)) {
                types.push(t.to_string());
            }
        }
    }
    types.sort();

    // Repeat offender means more than one distinct enforcement case on
    // record, not more than one violation row.
    let mut case_ids: Vec<&str> = facts
        .iter()
        .filter_map(|f| f.case_id.as_deref())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    case_ids.sort_unstable();
    case_ids.dedup();

    PropertyAggregates {
        total_violations: total,
        open_violations: open,
        violation_types: types,
        repeat_offender: case_ids.len() > 1,
        last_enforcement_date: facts.iter().filter_map(|f| f.opened_date).max(),
    }
}

impl PropertyAggregates {
    /// True if `property` already carries exactly these values. Stored type
    /// arrays are compared as sets.
    pub fn matches(&self, property: &PropertyRecord) -> bool {
        let mut stored = property.violation_types.clone();
        stored.sort();
        property.total_violations == self.total_violations
            && property.open_violations == self.open_violations
            && property.repeat_offender == self.repeat_offender
            && property.last_enforcement_date == self.last_enforcement_date
            && stored == self.violation_types
    }
}

async fn fetch_violation_facts(
    pool: &PgPool,
    property_id: Uuid,
) -> Result<Vec<ViolationFacts>, sqlx::Error> {
    sqlx::query_as(
        "SELECT case_id, violation_type, status, opened_date
         FROM violations
         WHERE property_id = $1",
    )
    .bind(property_id)
    .fetch_all(pool)
    .await
}

/// Recompute and persist the aggregates for one property.
#[instrument(skip(pool))]
pub async fn refresh_property_aggregates(
    pool: &PgPool,
    property_id: Uuid,
) -> Result<PropertyAggregates, sqlx::Error> {
    let facts = fetch_violation_facts(pool, property_id).await?;
    let aggregates = compute_aggregates(&facts);
    write_aggregates(pool, property_id, &aggregates).await?;
    Ok(aggregates)
}

async fn write_aggregates(
    pool: &PgPool,
    property_id: Uuid,
    aggregates: &PropertyAggregates,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE properties
         SET total_violations = $2,
             open_violations = $3,
             violation_types = $4,
             repeat_offender = $5,
             last_enforcement_date = $6,
             updated_at = now()
         WHERE id = $1",
    )
    .bind(property_id)
    .bind(aggregates.total_violations)
    .bind(aggregates.open_violations)
    .bind(&aggregates.violation_types)
    .bind(aggregates.repeat_offender)
    .bind(aggregates.last_enforcement_date)
    .execute(pool)
    .await?;
    Ok(())
}

/// One batch of an administrative aggregate backfill.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BackfillRequest {
    pub city: Option<String>,
    pub state: Option<String>,
    #[serde(default = "default_backfill_batch")]
    pub batch_size: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_backfill_batch() -> i64 {
    200
}

/// Before/after pair reported for dry runs.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillSample {
    pub property_id: Uuid,
    pub address: String,
    pub before: PropertyAggregates,
    pub after: PropertyAggregates,
}

/// Result of one backfill batch, with enough bookkeeping for the caller to
/// resume at `next_offset`.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub total_matching: i64,
    pub processed: i64,
    pub updated: i64,
    pub skipped: i64,
    pub failed: i64,
    pub percent_complete: f64,
    pub next_offset: Option<i64>,
    pub dry_run: bool,
    pub samples: Vec<BackfillSample>,
}

const MAX_BACKFILL_SAMPLES: usize = 5;

/// Recompute aggregates for one batch of properties.
///
/// Failures are isolated per property: a bad row is counted and logged and
/// the batch moves on. Dry runs compute and report but write nothing.
#[instrument(skip(pool), fields(dry_run = request.dry_run))]
pub async fn run_backfill(
    pool: &PgPool,
    request: &BackfillRequest,
) -> Result<BackfillReport, sqlx::Error> {
    let batch_size = request.batch_size.clamp(1, 1000);
    let offset = request.offset.max(0);

    let total_matching: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM properties
         WHERE ($1::text IS NULL OR lower(city) = lower($1))
           AND ($2::text IS NULL OR lower(state) = lower($2))",
    )
    .bind(&request.city)
    .bind(&request.state)
    .fetch_one(pool)
    .await?;

    let properties: Vec<PropertyRecord> = sqlx::query_as(
        "SELECT * FROM properties
         WHERE ($1::text IS NULL OR lower(city) = lower($1))
           AND ($2::text IS NULL OR lower(state) = lower($2))
         ORDER BY created_at ASC
         OFFSET $3 LIMIT $4",
    )
    .bind(&request.city)
    .bind(&request.state)
    .bind(offset)
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    let mut report = BackfillReport {
        total_matching,
        processed: 0,
        updated: 0,
        skipped: 0,
        failed: 0,
        percent_complete: 0.0,
        next_offset: None,
        dry_run: request.dry_run,
        samples: Vec::new(),
    };

    for property in &properties {
        report.processed += 1;
        let facts = match fetch_violation_facts(pool, property.id).await {
            Ok(f) => f,
            Err(e) => {
                warn!(property_id = %property.id, error = %e, "backfill: failed to load violations");
                report.failed += 1;
                continue;
            }
        };
        let fresh = compute_aggregates(&facts);

        if fresh.matches(property) {
            report.skipped += 1;
            continue;
        }

        // Samples are a dry-run preview; live runs stay lean.
        if request.dry_run && report.samples.len() < MAX_BACKFILL_SAMPLES {
            report.samples.push(BackfillSample {
                property_id: property.id,
                address: property.address.clone(),
                before: PropertyAggregates {
                    total_violations: property.total_violations,
                    open_violations: property.open_violations,
                    violation_types: property.violation_types.clone(),
                    repeat_offender: property.repeat_offender,
                    last_enforcement_date: property.last_enforcement_date,
                },
                after: fresh.clone(),
            });
        }

        if request.dry_run {
            report.updated += 1;
            continue;
        }

        match write_aggregates(pool, property.id, &fresh).await {
            Ok(()) => report.updated += 1,
            Err(e) => {
                warn!(property_id = %property.id, error = %e, "backfill: failed to write aggregates");
                report.failed += 1;
            }
        }
    }

    let done_through = offset + report.processed;
    report.percent_complete = if total_matching == 0 {
        100.0
    } else {
        (done_through.min(total_matching) as f64 / total_matching as f64) * 100.0
    };
    report.next_offset = if done_through < total_matching {
        Some(done_through)
    } else {
        None
    };

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(vtype: Option<&str>, status: Option<&str>, opened: Option<&str>) -> ViolationFacts {
        fact_with_case(None, vtype, status, opened)
    }

    fn fact_with_case(
        case_id: Option<&str>,
        vtype: Option<&str>,
        status: Option<&str>,
        opened: Option<&str>,
    ) -> ViolationFacts {
        ViolationFacts {
            case_id: case_id.map(String::from),
            violation_type: vtype.map(String::from),
            status: status.map(String::from),
            opened_date: opened.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        }
    }

    #[test]
    fn test_is_open_status() {
        assert!(is_open_status(Some("Open")));
        assert!(is_open_status(Some(" open ")));
        assert!(is_open_status(Some("OPEN")));
        assert!(!is_open_status(Some("Closed")));
        assert!(!is_open_status(Some("Resolved")));
        assert!(!is_open_status(None));
    }

    #[test]
    fn test_two_violations_one_open() {
        let facts = vec![
            fact(Some("Exterior"), Some("Open"), Some("2024-06-01")),
            fact(Some("Structural"), Some("Closed"), Some("2024-03-15")),
        ];
        let agg = compute_aggregates(&facts);

        assert_eq!(agg.total_violations, 2);
        assert_eq!(agg.open_violations, 1);
        assert_eq!(agg.violation_types, vec!["Exterior", "Structural"]);
        assert!(!agg.repeat_offender);
        assert_eq!(
            agg.last_enforcement_date,
            NaiveDate::from_ymd_opt(2024, 6, 1)
        );
    }

    #[test]
    fn test_repeat_offender_needs_distinct_case_ids() {
        // Many rows under the same case are one offense.
        let same_case: Vec<ViolationFacts> = (0..4)
            .map(|_| fact_with_case(Some("CE-100"), Some("Weeds"), Some("Open"), None))
            .collect();
        assert!(!compute_aggregates(&same_case).repeat_offender);

        let two_cases = vec![
            fact_with_case(Some("CE-100"), Some("Weeds"), Some("Open"), None),
            fact_with_case(Some("CE-101"), Some("Debris"), Some("Closed"), None),
        ];
        assert!(compute_aggregates(&two_cases).repeat_offender);
    }

    #[test]
    fn test_blank_case_ids_never_count() {
        let facts = vec![
            fact_with_case(Some(""), Some("Weeds"), Some("Open"), None),
            fact_with_case(Some("  "), Some("Debris"), Some("Open"), None),
            fact(Some("Trash"), Some("Open"), None),
        ];
        assert!(!compute_aggregates(&facts).repeat_offender);
    }

    #[test]
    fn test_types_dedupe_case_insensitively() {
        let facts = vec![
            fact(Some("weeds"), None, None),
            fact(Some("Weeds"), None, None),
            fact(Some("Debris"), None, None),
            fact(Some(""), None, None),
            fact(None, None, None),
        ];
        let agg = compute_aggregates(&facts);
        assert_eq!(agg.violation_types, vec!["Debris", "weeds"]);
        assert_eq!(agg.total_violations, 5);
    }

    #[test]
    fn test_empty_violation_set() {
        let agg = compute_aggregates(&[]);
        assert_eq!(agg.total_violations, 0);
        assert_eq!(agg.open_violations, 0);
        assert!(agg.violation_types.is_empty());
        assert!(!agg.repeat_offender);
        assert_eq!(agg.last_enforcement_date, None);
    }

    #[test]
    fn test_recompute_is_stable() {
        let facts = vec![
            fact(Some("Structural"), Some("Open"), Some("2024-01-01")),
            fact(Some("Exterior"), Some("Closed"), Some("2024-02-01")),
        ];
        assert_eq!(compute_aggregates(&facts), compute_aggregates(&facts));
    }

    async fn seed_property_with_violation(pool: &PgPool) -> sqlx::Result<Uuid> {
        let property_id: Uuid = sqlx::query_scalar(
            "INSERT INTO properties (address, city, state, zip)
             VALUES ('123 Main St', 'Phoenix', 'AZ', '85001') RETURNING id",
        )
        .fetch_one(pool)
        .await?;
        sqlx::query(
            "INSERT INTO violations (property_id, case_id, violation_type, status, opened_date)
             VALUES ($1, 'C-1', 'Weeds', 'Open', '2024-06-01')",
        )
        .bind(property_id)
        .execute(pool)
        .await?;
        Ok(property_id)
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_backfill_dry_run_reports_but_writes_nothing(pool: PgPool) -> sqlx::Result<()> {
        let property_id = seed_property_with_violation(&pool).await?;

        let request = BackfillRequest {
            city: None,
            state: None,
            batch_size: 100,
            offset: 0,
            dry_run: true,
        };
        let report = run_backfill(&pool, &request).await?;

        assert_eq!(report.processed, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.samples[0].after.total_violations, 1);

        // Nothing written: the stored aggregates are still the defaults.
        let total: i32 =
            sqlx::query_scalar("SELECT total_violations FROM properties WHERE id = $1")
                .bind(property_id)
                .fetch_one(&pool)
                .await?;
        assert_eq!(total, 0);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_backfill_live_run_writes_and_skips_samples(pool: PgPool) -> sqlx::Result<()> {
        let property_id = seed_property_with_violation(&pool).await?;

        let request = BackfillRequest {
            city: Some("Phoenix".to_string()),
            state: Some("AZ".to_string()),
            batch_size: 100,
            offset: 0,
            dry_run: false,
        };
        let report = run_backfill(&pool, &request).await?;

        assert_eq!(report.updated, 1);
        assert!(report.samples.is_empty());

        let (total, open): (i32, i32) = sqlx::query_as(
            "SELECT total_violations, open_violations FROM properties WHERE id = $1",
        )
        .bind(property_id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(total, 1);
        assert_eq!(open, 1);
        Ok(())
    }
}
