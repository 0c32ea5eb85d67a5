//! Property deduplication and upsert
//!
//! Properties are durable entities keyed by normalized address. Staged rows
//! collapse onto existing properties where the key matches and create new
//! ones where it does not. Creation goes through `ON CONFLICT DO NOTHING`
//! against the unique address-key index and then re-selects, so two jobs
//! racing on the same address both resolve to the single surviving row.

use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::{HashMap, HashSet};
use tracing::instrument;
use uuid::Uuid;

use super::models::StagingRow;

/// Canonical dedup key: `lower(address)|lower(city)|lower(state)|zip`,
/// with a missing ZIP contributing an empty segment.
pub fn address_key(address: &str, city: &str, state: &str, zip: &str) -> String {
    format!(
        "{}|{}|{}|{}",
        address.trim().to_lowercase(),
        city.trim().to_lowercase(),
        state.trim().to_lowercase(),
        zip.trim()
    )
}

fn staging_key(row: &StagingRow) -> String {
    address_key(
        &row.address,
        &row.city,
        &row.state,
        row.zip.as_deref().unwrap_or(""),
    )
}

/// A property this job may need to create.
#[derive(Debug, Clone)]
pub struct PropertyCandidate {
    pub key: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub county: Option<String>,
}

/// Collapse staged rows to one candidate per address key, in row order.
/// The first row seen for a key supplies the display casing.
pub fn plan_property_candidates(
    rows: &[StagingRow],
    county: Option<&str>,
) -> Vec<PropertyCandidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for row in rows {
        let key = staging_key(row);
        if seen.insert(key.clone()) {
            candidates.push(PropertyCandidate {
                key,
                address: row.address.trim().to_string(),
                city: row.city.trim().to_string(),
                state: row.state.trim().to_string(),
                zip: row.zip.as_deref().unwrap_or("").trim().to_string(),
                county: county.map(String::from),
            });
        }
    }
    candidates
}

#[derive(sqlx::FromRow)]
struct PropertyKeyRow {
    id: Uuid,
    address: String,
    city: String,
    state: String,
    zip: String,
}

/// Resolve candidate keys to existing property ids.
///
/// The lookup is scoped by lowered address and refined to the full key in
/// memory. Rows come back oldest-first, so if legacy duplicates exist for a
/// key every staged row resolves to the oldest one.
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub async fn resolve_property_ids(
    pool: &PgPool,
    candidates: &[PropertyCandidate],
) -> Result<HashMap<String, Uuid>, sqlx::Error> {
    if candidates.is_empty() {
        return Ok(HashMap::new());
    }

    let mut addresses: Vec<String> = candidates
        .iter()
        .map(|c| c.address.to_lowercase())
        .collect();
    addresses.sort();
    addresses.dedup();

    let rows: Vec<PropertyKeyRow> = sqlx::query_as(
        "SELECT id, address, city, state, zip
         FROM properties
         WHERE lower(address) = ANY($1)
         ORDER BY created_at ASC",
    )
    .bind(&addresses)
    .fetch_all(pool)
    .await?;

    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        let key = address_key(&row.address, &row.city, &row.state, &row.zip);
        map.entry(key).or_insert(row.id);
    }
    Ok(map)
}

/// Bulk-insert candidates, skipping any that already exist. Returns the
/// number actually created.
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub async fn insert_missing_properties(
    pool: &PgPool,
    candidates: &[PropertyCandidate],
    batch_size: usize,
) -> Result<u64, sqlx::Error> {
    let mut created = 0u64;
    for chunk in candidates.chunks(batch_size.max(1)) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO properties (address, city, state, zip, county) ");
        builder.push_values(chunk, |mut b, c| {
            b.push_bind(&c.address)
                .push_bind(&c.city)
                .push_bind(&c.state)
                .push_bind(&c.zip)
                .push_bind(&c.county);
        });
        builder.push(
            " ON CONFLICT (lower(address), lower(city), lower(state), zip) DO NOTHING",
        );
        let result = builder.build().execute(pool).await?;
        created += result.rows_affected();
    }
    Ok(created)
}

/// Stamp each staging row of a job with its resolved property id.
///
/// One statement over unnested (key, id) pairs; the join recomputes the
/// address key in SQL so it matches [`address_key`] exactly.
#[instrument(skip_all, fields(job_id = %job_id, keys = resolved.len()))]
pub async fn link_staging_rows(
    pool: &PgPool,
    job_id: Uuid,
    resolved: &HashMap<String, Uuid>,
) -> Result<u64, sqlx::Error> {
    if resolved.is_empty() {
        return Ok(0);
    }

    let mut keys = Vec::with_capacity(resolved.len());
    let mut ids = Vec::with_capacity(resolved.len());
    for (key, id) in resolved {
        keys.push(key.clone());
        ids.push(*id);
    }

    let result = sqlx::query(
        "UPDATE staging_rows AS s
         SET property_id = v.property_id
         FROM (SELECT unnest($1::text[]) AS key, unnest($2::uuid[]) AS property_id) AS v
         WHERE s.job_id = $3
           AND lower(s.address) || '|' || lower(s.city) || '|' || lower(s.state) || '|' || COALESCE(s.zip, '') = v.key",
    )
    .bind(&keys)
    .bind(&ids)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging_row(row_num: i32, address: &str, city: &str, state: &str, zip: Option<&str>) -> StagingRow {
        StagingRow {
            id: row_num as i64,
            job_id: Uuid::nil(),
            row_num,
            case_id: None,
            address: address.to_string(),
            city: city.to_string(),
            state: state.to_string(),
            zip: zip.map(String::from),
            violation_type: None,
            status: None,
            opened_date: None,
            last_updated_date: None,
            property_id: None,
        }
    }

    #[test]
    fn test_address_key_normalization() {
        assert_eq!(
            address_key("123 Main St", "Phoenix", "AZ", "85001"),
            "123 main st|phoenix|az|85001"
        );
        assert_eq!(
            address_key(" 123 MAIN ST ", "phoenix", "az", "85001"),
            "123 main st|phoenix|az|85001"
        );
        assert_eq!(address_key("1 A St", "Mesa", "AZ", ""), "1 a st|mesa|az|");
    }

    #[test]
    fn test_plan_collapses_duplicates_first_wins() {
        let rows = vec![
            staging_row(1, "123 Main St", "Phoenix", "AZ", Some("85001")),
            staging_row(2, "123 MAIN ST", "PHOENIX", "AZ", Some("85001")),
            staging_row(3, "456 Oak Ave", "Phoenix", "AZ", Some("85002")),
        ];
        let candidates = plan_property_candidates(&rows, Some("Maricopa"));

        assert_eq!(candidates.len(), 2);
        // First-seen casing is kept.
        assert_eq!(candidates[0].address, "123 Main St");
        assert_eq!(candidates[0].city, "Phoenix");
        assert_eq!(candidates[0].county.as_deref(), Some("Maricopa"));
        assert_eq!(candidates[1].address, "456 Oak Ave");
    }

    #[test]
    fn test_plan_distinguishes_by_zip() {
        let rows = vec![
            staging_row(1, "123 Main St", "Phoenix", "AZ", Some("85001")),
            staging_row(2, "123 Main St", "Phoenix", "AZ", None),
        ];
        let candidates = plan_property_candidates(&rows, None);
        assert_eq!(candidates.len(), 2);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_reingestion_creates_no_duplicate_properties(pool: PgPool) -> sqlx::Result<()> {
        let rows = vec![
            staging_row(1, "123 Main St", "Phoenix", "AZ", Some("85001")),
            staging_row(2, "456 Oak Ave", "Phoenix", "AZ", Some("85002")),
        ];
        let candidates = plan_property_candidates(&rows, Some("Maricopa"));

        let created = insert_missing_properties(&pool, &candidates, 500).await?;
        assert_eq!(created, 2);
        let first = resolve_property_ids(&pool, &candidates).await?;
        assert_eq!(first.len(), 2);

        // Second run over the same addresses: nothing created, identical
        // resolution, one property per key overall.
        let created_again = insert_missing_properties(&pool, &candidates, 500).await?;
        assert_eq!(created_again, 0);
        let second = resolve_property_ids(&pool, &candidates).await?;
        assert_eq!(second, first);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM properties")
            .fetch_one(&pool)
            .await?;
        assert_eq!(total, 2);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_case_variant_addresses_collapse_to_one_property(
        pool: PgPool,
    ) -> sqlx::Result<()> {
        let first = plan_property_candidates(
            &[staging_row(1, "123 Main St", "Phoenix", "AZ", Some("85001"))],
            None,
        );
        insert_missing_properties(&pool, &first, 500).await?;

        let shouted = plan_property_candidates(
            &[staging_row(1, "123 MAIN ST", "PHOENIX", "AZ", Some("85001"))],
            None,
        );
        let created = insert_missing_properties(&pool, &shouted, 500).await?;
        assert_eq!(created, 0);

        let resolved = resolve_property_ids(&pool, &shouted).await?;
        assert_eq!(resolved.len(), 1);
        Ok(())
    }
}
