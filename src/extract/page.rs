use super::{MAX_IMAGES, SourceStatus, lookup_f64, lookup_str, lookup_u64};
use crate::models::ProductRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

static LD_JSON: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("ld+json selector")
});
static SCRIPT: Lazy<Selector> = Lazy::new(|| Selector::parse("script").expect("script selector"));
static STATE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"window\.__PRELOADED_STATE__\s*=\s*").expect("preloaded state marker")
});

const STRUCTURED_KEYS: [&str; 3] = ["name", "offers", "image"];

#[derive(Debug, Clone)]
pub struct PageExtraction {
    pub record: ProductRecord,
    pub structured_data: SourceStatus,
    pub state_blob: SourceStatus,
}

/// Pull title, price and images from the JSON-LD block and rating fields
/// from the preloaded state blob. The two sources are independent.
pub fn extract_page(identifier: &str, html: &str) -> PageExtraction {
    let doc = Html::parse_document(html);
    let mut record = ProductRecord::empty(identifier);

    let (structured, structured_data) = structured_block(&doc);
    if let Some(block) = &structured {
        record.title = lookup_str(block, &["name"]);
        record.regular_price = offer_price(block);
        // Pages carry a single offer price, so both price columns get it.
        record.sale_price = record.regular_price;
        record.image_urls = images(block.get("image"));
    }

    let (state, state_blob) = preloaded_state(&doc);
    if let Some(state) = &state {
        record.review_count = lookup_u64(state, &["product", "ratings", "reviewsCount"])
            .or_else(|| lookup_u64(state, &["product", "reviews", "totalReviewCount"]));
        record.star_rating = lookup_f64(state, &["product", "ratings", "averageRating"])
            .or_else(|| lookup_f64(state, &["product", "reviews", "averageRating"]));
    }

    if structured_data == SourceStatus::Malformed || state_blob == SourceStatus::Malformed {
        debug!(
            target = "tcin.extract",
            tcin = identifier,
            structured = ?structured_data,
            state = ?state_blob,
            "page_source_malformed"
        );
    }

    PageExtraction {
        record,
        structured_data,
        state_blob,
    }
}

fn structured_block(doc: &Html) -> (Option<Value>, SourceStatus) {
    let mut status = SourceStatus::Missing;
    for script in doc.select(&LD_JSON) {
        let text = script.text().collect::<String>();
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(value) => {
                if let Some(block) = product_object(value) {
                    return (Some(block), SourceStatus::Found);
                }
            }
            Err(_) => status = SourceStatus::Malformed,
        }
    }
    (None, status)
}

/// First object in the block that has any of the keys we read.
fn product_object(value: Value) -> Option<Value> {
    let recognized = |v: &Value| {
        v.as_object()
            .map(|obj| STRUCTURED_KEYS.iter().any(|k| obj.contains_key(*k)))
            .unwrap_or(false)
    };
    if recognized(&value) {
        return Some(value);
    }
    match value {
        Value::Array(items) => items.into_iter().find(|item| recognized(item)),
        _ => None,
    }
}

fn offer_price(block: &Value) -> Option<f64> {
    match block.get("offers")? {
        offers @ Value::Object(_) => lookup_f64(offers, &["price"]),
        Value::Array(list) => list.iter().find_map(|offer| lookup_f64(offer, &["price"])),
        _ => None,
    }
}

fn images(field: Option<&Value>) -> Vec<String> {
    let as_url = |v: &Value| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(_) => lookup_str(v, &["url"]),
        _ => None,
    };
    match field {
        Some(Value::Array(items)) => items.iter().filter_map(as_url).take(MAX_IMAGES).collect(),
        Some(single) => as_url(single).into_iter().collect(),
        None => Vec::new(),
    }
}

fn preloaded_state(doc: &Html) -> (Option<Value>, SourceStatus) {
    for script in doc.select(&SCRIPT) {
        let text = script.text().collect::<String>();
        let Some(marker) = STATE_MARKER.find(&text) else {
            continue;
        };
        let rest = &text[marker.end()..];
        if !rest.starts_with('{') {
            return (None, SourceStatus::Malformed);
        }
        // Parse exactly one JSON value and ignore whatever script follows it.
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        return match stream.next() {
            Some(Ok(value)) if value.is_object() => (Some(value), SourceStatus::Found),
            _ => (None, SourceStatus::Malformed),
        };
    }
    (None, SourceStatus::Missing)
}
