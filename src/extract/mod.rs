//! Best-effort normalization of upstream bodies into [`ProductRecord`]s.
//!
//! Extraction never fails. A missing or unparseable substructure only nulls
//! the fields it would have supplied; [`SourceStatus`] records which case
//! happened so callers and tests can tell "absent" from "malformed".

pub mod aggregation;
pub mod page;

use serde_json::Value;

pub use aggregation::extract_batch;
pub use page::extract_page;

pub const MAX_IMAGES: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourceStatus {
    Found,
    #[default]
    Missing,
    Malformed,
}

/// Walk `path` through nested objects.
pub(crate) fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.as_object()?.get(*key))
        .filter(|v| !v.is_null())
}

pub(crate) fn lookup_str(value: &Value, path: &[&str]) -> Option<String> {
    lookup(value, path)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Numbers pass through; numeric strings such as `"19.99"` are parsed.
pub(crate) fn lookup_f64(value: &Value, path: &[&str]) -> Option<f64> {
    as_f64(lookup(value, path)?)
}

pub(crate) fn lookup_u64(value: &Value, path: &[&str]) -> Option<u64> {
    match lookup(value, path)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}
