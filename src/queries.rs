use std::path::Path;

use tracing::warn;

use crate::domain::{Label, Query};
use crate::error::FetchError;

#[derive(Debug)]
pub struct QueryFile {
    pub queries: Vec<Query>,
    pub malformed_rows: usize,
}

pub fn read_queries(path: &Path) -> Result<QueryFile, FetchError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|err| FetchError::QueryFile {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

    let mut queries = Vec::new();
    let mut malformed_rows = 0usize;

    for (index, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                warn!(row = index + 1, error = %err, "skipping unreadable CSV row");
                malformed_rows += 1;
                continue;
            }
        };

        if index == 0 && is_header(&record) {
            continue;
        }

        let label = record.get(0).unwrap_or_default();
        let url = record.get(1).unwrap_or_default();
        if label.is_empty() || url.is_empty() {
            warn!(row = index + 1, "skipping malformed CSV row (expected: label,search_url)");
            malformed_rows += 1;
            continue;
        }

        let label = match label.parse::<Label>() {
            Ok(label) => label,
            Err(err) => {
                warn!(row = index + 1, error = %err, "skipping row with invalid label");
                malformed_rows += 1;
                continue;
            }
        };

        queries.push(Query {
            label,
            search_url: url.to_string(),
        });
    }

    if queries.is_empty() {
        return Err(FetchError::EmptyQueryFile);
    }

    Ok(QueryFile {
        queries,
        malformed_rows,
    })
}

fn is_header(record: &csv::StringRecord) -> bool {
    let first = record.get(0).unwrap_or_default().to_lowercase();
    let second = record.get(1).unwrap_or_default().to_lowercase();
    matches!(first.as_str(), "name" | "label")
        && matches!(second.as_str(), "search_url" | "url")
}
