//! Multi-city CSV splitting
//!
//! A county-level export mixes several municipalities in one file. The
//! splitter re-serializes accepted rows into one CSV per (city, state),
//! each of which becomes its own child upload job. Original header order
//! and field values are preserved; only row grouping changes.

use csv::WriterBuilder;
use std::collections::HashMap;
use thiserror::Error;

use super::locality;
use super::parser::ParsedRow;

#[derive(Error, Debug)]
pub enum SplitError {
    #[error("no rows with a usable locality to split")]
    NoRows,
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV buffer error: {0}")]
    Buffer(String),
}

/// One per-locality CSV produced by a split.
#[derive(Debug, Clone)]
pub struct CityGroup {
    pub city: String,
    pub state: String,
    pub slug: String,
    pub rows: usize,
    pub csv: String,
}

/// Group accepted rows by (city, state), case-insensitively, and write one
/// CSV per group. Display casing comes from the first row of each group,
/// and groups appear in first-seen order.
///
/// Every accepted row lands in exactly one group; the sum of group row
/// counts always equals `rows.len()`.
pub fn split_by_locality(headers: &[String], rows: &[ParsedRow]) -> Result<Vec<CityGroup>, SplitError> {
    if rows.is_empty() {
        return Err(SplitError::NoRows);
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (String, String, Vec<&ParsedRow>)> = HashMap::new();

    for row in rows {
        let key = format!("{}|{}", row.city.to_lowercase(), row.state.to_lowercase());
        match groups.get_mut(&key) {
            Some((_, _, members)) => members.push(row),
            None => {
                order.push(key.clone());
                groups.insert(key, (row.city.clone(), row.state.clone(), vec![row]));
            }
        }
    }

    let mut result = Vec::with_capacity(order.len());
    for key in order {
        let Some((city, state, members)) = groups.remove(&key) else {
            continue;
        };
        let csv = write_group(headers, &members)?;
        result.push(CityGroup {
            slug: locality::locality_slug(&city, &state),
            rows: members.len(),
            city,
            state,
            csv,
        });
    }

    Ok(result)
}

fn write_group(headers: &[String], rows: &[&ParsedRow]) -> Result<String, SplitError> {
    let mut writer = WriterBuilder::new().flexible(true).from_writer(Vec::new());
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(&row.raw)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| SplitError::Buffer(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| SplitError::Buffer(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parser::{parse_csv, DeclaredLocality};

    const COUNTY_CSV: &str = "address,city,state,violation\n\
        1 A St,Phoenix,AZ,Weeds\n\
        2 B St,Mesa,AZ,Debris\n\
        3 C St,phoenix,az,Graffiti\n\
        4 D St,Tempe,AZ,Weeds\n";

    fn parsed_rows() -> (Vec<String>, Vec<ParsedRow>) {
        let outcome = parse_csv(COUNTY_CSV, &DeclaredLocality::default()).unwrap();
        (outcome.headers, outcome.rows)
    }

    #[test]
    fn test_split_groups_case_insensitively() {
        let (headers, rows) = parsed_rows();
        let groups = split_by_locality(&headers, &rows).unwrap();

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].city, "Phoenix");
        assert_eq!(groups[0].rows, 2);
        assert_eq!(groups[1].city, "Mesa");
        assert_eq!(groups[2].city, "Tempe");
        assert_eq!(groups[0].slug, "phoenix_az");
    }

    #[test]
    fn test_split_loses_no_rows() {
        let (headers, rows) = parsed_rows();
        let groups = split_by_locality(&headers, &rows).unwrap();
        let total: usize = groups.iter().map(|g| g.rows).sum();
        assert_eq!(total, rows.len());
    }

    #[test]
    fn test_split_output_reparses() {
        let (headers, rows) = parsed_rows();
        let groups = split_by_locality(&headers, &rows).unwrap();

        let phoenix = &groups[0];
        let outcome = parse_csv(&phoenix.csv, &DeclaredLocality::default()).unwrap();
        assert_eq!(outcome.rows.len(), 2);
        assert!(outcome.rows.iter().all(|r| r.city.eq_ignore_ascii_case("phoenix")));
        assert_eq!(outcome.headers, headers);
    }

    #[test]
    fn test_split_preserves_embedded_commas() {
        let csv = "address,city,state,violation\n\
                   \"1 A St, Unit 2\",Phoenix,AZ,\"Weeds, debris\"\n";
        let outcome = parse_csv(csv, &DeclaredLocality::default()).unwrap();
        let groups = split_by_locality(&outcome.headers, &outcome.rows).unwrap();
        let reparsed = parse_csv(&groups[0].csv, &DeclaredLocality::default()).unwrap();
        assert_eq!(reparsed.rows[0].address, "1 A St, Unit 2");
        assert_eq!(reparsed.rows[0].violation_type.as_deref(), Some("Weeds, debris"));
    }

    #[test]
    fn test_split_empty_input_errors() {
        let headers = vec!["address".to_string()];
        assert!(matches!(
            split_by_locality(&headers, &[]),
            Err(SplitError::NoRows)
        ));
    }
}
