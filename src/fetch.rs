use crate::config::ScraperConfig;
use crate::http::build_client;
use reqwest::{Client, Response};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request timed out after {after_ms}ms: {url}")]
    Timeout { url: String, after_ms: u128 },
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("unable to read response body: {0}")]
    Body(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

/// Issues the upstream GETs. Holds one pooled client for both sources.
#[derive(Clone)]
pub struct Fetcher {
    http: Client,
    config: Arc<ScraperConfig>,
}

impl Fetcher {
    pub fn new(config: ScraperConfig) -> Self {
        Self {
            http: build_client(&config),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// GET the product page for one identifier.
    pub async fn fetch_page(&self, identifier: &str) -> Result<String, FetchError> {
        let url = self.config.page_url(identifier);
        debug!(target = "tcin.fetch", tcin = identifier, %url, "page_request");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| self.classify(err, &url))?;
        self.read_body(response, &url).await
    }

    /// GET the aggregation endpoint once for the whole list.
    pub async fn fetch_batch(&self, identifiers: &[String]) -> Result<String, FetchError> {
        let agg = &self.config.aggregation;
        let tcins = identifiers.join(",");
        debug!(
            target = "tcin.fetch",
            count = identifiers.len(),
            url = %agg.url,
            "batch_request"
        );
        let response = self
            .http
            .get(&agg.url)
            .query(&[
                ("key", agg.key.as_str()),
                ("tcins", tcins.as_str()),
                ("store_id", agg.store_id.as_str()),
                ("zip", agg.zip.as_str()),
            ])
            .send()
            .await
            .map_err(|err| self.classify(err, &agg.url))?;
        self.read_body(response, &agg.url).await
    }

    async fn read_body(&self, response: Response, url: &str) -> Result<String, FetchError> {
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            warn!(target = "tcin.fetch", %url, status = status.as_u16(), "upstream_http_error");
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response
            .text()
            .await
            .map_err(|err| self.classify_body(err, url))
    }

    fn classify(&self, err: reqwest::Error, url: &str) -> FetchError {
        warn!(target = "tcin.fetch", %url, error = %err, "upstream_request_failed");
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                after_ms: self.config.timeout.as_millis(),
            }
        } else if err.is_connect() {
            FetchError::Connect(err.to_string())
        } else {
            FetchError::Request(err.to_string())
        }
    }

    fn classify_body(&self, err: reqwest::Error, url: &str) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                after_ms: self.config.timeout.as_millis(),
            }
        } else {
            FetchError::Body(err.to_string())
        }
    }
}
