use crate::models::DataSource;
use std::collections::HashSet;

/// Split raw form input into identifiers.
///
/// Lines are trimmed and blank lines dropped. Page runs keep the first
/// occurrence of each identifier; aggregation runs keep the list verbatim,
/// duplicates included, because the batch call echoes every position.
pub fn parse_identifiers(raw: &str, source: DataSource) -> Vec<String> {
    let tokens = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string);

    match source {
        DataSource::Page => deduplicate(tokens),
        DataSource::Aggregation => tokens.collect(),
    }
}

fn deduplicate(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for value in values {
        if seen.insert(value.clone()) {
            result.push(value);
        }
    }
    result
}
