use super::{MAX_IMAGES, SourceStatus, lookup, lookup_f64, lookup_str, lookup_u64};
use crate::models::{NO_DATA_FOR_TCIN, ProductRecord};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Array keys under `data` that hold per-product summaries.
const SUMMARY_KEYS: [&str; 2] = ["product_summary", "product_summaries"];

/// Per-identifier entries of one batched response, keyed by TCIN.
#[derive(Debug, Default)]
pub struct ProductMapping {
    entries: HashMap<String, Value>,
    pub status: SourceStatus,
}

impl ProductMapping {
    pub fn parse(body: &str) -> Self {
        let root: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(err) => {
                warn!(target = "tcin.extract", error = %err, "aggregation_body_malformed");
                return Self {
                    entries: HashMap::new(),
                    status: SourceStatus::Malformed,
                };
            }
        };

        let Some(summaries) = SUMMARY_KEYS
            .iter()
            .find_map(|key| lookup(&root, &["data", *key]).and_then(Value::as_array))
        else {
            return Self::default();
        };

        let mut entries = HashMap::new();
        for entry in summaries {
            let tcin = match entry.get("tcin") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => continue,
            };
            // First entry wins if the endpoint repeats a TCIN.
            entries.entry(tcin).or_insert_with(|| entry.clone());
        }
        Self {
            entries,
            status: SourceStatus::Found,
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&Value> {
        self.entries.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One row per identifier, in input order, duplicates included.
pub fn extract_batch(identifiers: &[String], body: &str) -> Vec<ProductRecord> {
    let mapping = ProductMapping::parse(body);
    debug!(
        target = "tcin.extract",
        requested = identifiers.len(),
        returned = mapping.len(),
        status = ?mapping.status,
        "aggregation_mapping"
    );
    identifiers
        .iter()
        .map(|id| match mapping.get(id) {
            Some(entry) => extract_entry(id, entry),
            None => ProductRecord::failure(id, NO_DATA_FOR_TCIN),
        })
        .collect()
}

pub fn extract_entry(identifier: &str, entry: &Value) -> ProductRecord {
    ProductRecord {
        identifier: identifier.to_string(),
        title: lookup_str(entry, &["item", "product_description", "title"]),
        brand: lookup_str(entry, &["item", "primary_brand", "name"]),
        regular_price: lookup_f64(entry, &["price", "reg_retail"]),
        sale_price: lookup_f64(entry, &["price", "current_retail"]),
        review_count: lookup_u64(
            entry,
            &["ratings_and_reviews", "statistics", "rating", "count"],
        ),
        star_rating: lookup_f64(
            entry,
            &["ratings_and_reviews", "statistics", "rating", "average"],
        ),
        image_urls: image_set(entry),
        error: None,
    }
}

/// Primary image first, then alternates until three are collected.
fn image_set(entry: &Value) -> Vec<String> {
    let Some(images) = lookup(entry, &["item", "enrichment", "images"]) else {
        return Vec::new();
    };
    let mut urls: Vec<String> = lookup_str(images, &["primary_image_url"]).into_iter().collect();
    if let Some(alternates) = lookup(images, &["alternate_image_urls"]).and_then(Value::as_array) {
        urls.extend(
            alternates
                .iter()
                .filter_map(Value::as_str)
                .filter(|url| !url.trim().is_empty())
                .take(2)
                .map(str::to_string),
        );
    }
    urls.truncate(MAX_IMAGES);
    urls
}
