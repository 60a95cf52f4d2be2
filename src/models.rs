use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

pub const NO_DATA_FOR_TCIN: &str = "No data for this TCIN";

/// One normalized row per requested identifier.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub identifier: String,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub regular_price: Option<f64>,
    pub sale_price: Option<f64>,
    pub review_count: Option<u64>,
    pub star_rating: Option<f64>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub error: Option<String>,
}

impl ProductRecord {
    pub fn empty(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    /// A row that only carries the identifier and why nothing could be fetched.
    pub fn failure(identifier: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    pub fn has_data(&self) -> bool {
        self.title.is_some()
            || self.brand.is_some()
            || self.regular_price.is_some()
            || self.sale_price.is_some()
            || self.review_count.is_some()
            || self.star_rating.is_some()
            || !self.image_urls.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// One product page request per identifier, deduplicated.
    #[default]
    Page,
    /// One aggregation endpoint request for the whole list, duplicates kept.
    Aggregation,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Page => "page",
            DataSource::Aggregation => "aggregation",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DataSource::Page => "Product pages",
            DataSource::Aggregation => "Aggregation endpoint",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Csv,
    #[serde(alias = "xlsx")]
    Excel,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "excel",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "target_product_data.csv",
            ExportFormat::Excel => "target_product_data.xlsx",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "CSV",
            ExportFormat::Excel => "Excel",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeRequest {
    /// Newline-delimited identifiers, exactly as typed by the user.
    pub tcins: String,
    #[serde(default)]
    pub source: DataSource,
    #[serde(default)]
    pub format: ExportFormat,
}

#[derive(Debug, Serialize, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub source: DataSource,
    pub generated_at: DateTime<Utc>,
    pub elapsed_ms: u128,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    pub rows: Vec<ProductRecord>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
