use std::{env, time::Duration};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";
pub const DEFAULT_PAGE_BASE_URL: &str = "https://www.target.com/p/-/A-";
pub const DEFAULT_REDSKY_URL: &str =
    "https://redsky.target.com/redsky_aggregations/v1/web/product_summary_with_fulfillment_v1";
pub const DEFAULT_REDSKY_KEY: &str = "9f36aeafbe60771e321a7cc95a78140772ab3e96";
pub const DEFAULT_STORE_ID: &str = "3991";
pub const DEFAULT_ZIP: &str = "55403";

/// Everything the fetcher needs to reach both upstreams.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub concurrency: usize,
    /// The identifier is appended verbatim (URL-encoded) to this prefix.
    pub page_base_url: String,
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone)]
pub struct AggregationConfig {
    pub url: String,
    pub key: String,
    pub store_id: String,
    pub zip: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(10),
            concurrency: 4,
            page_base_url: DEFAULT_PAGE_BASE_URL.to_string(),
            aggregation: AggregationConfig::default(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDSKY_URL.to_string(),
            key: DEFAULT_REDSKY_KEY.to_string(),
            store_id: DEFAULT_STORE_ID.to_string(),
            zip: DEFAULT_ZIP.to_string(),
        }
    }
}

impl ScraperConfig {
    /// Defaults overlaid with any `SCRAPER_*` / `REDSKY_*` variables that are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ua) = env_string("SCRAPER_USER_AGENT") {
            config.user_agent = ua;
        }
        if let Some(secs) = env_parse::<u64>("SCRAPER_TIMEOUT_SECS").filter(|v| *v > 0) {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("SCRAPER_CONCURRENCY").filter(|v| *v > 0) {
            config.concurrency = n;
        }
        if let Some(base) = env_string("SCRAPER_PAGE_BASE_URL") {
            config.page_base_url = base;
        }
        if let Some(url) = env_string("REDSKY_URL") {
            config.aggregation.url = url;
        }
        if let Some(key) = env_string("REDSKY_KEY") {
            config.aggregation.key = key;
        }
        if let Some(store) = env_string("REDSKY_STORE_ID") {
            config.aggregation.store_id = store;
        }
        if let Some(zip) = env_string("REDSKY_ZIP") {
            config.aggregation.zip = zip;
        }
        config
    }

    pub fn page_url(&self, identifier: &str) -> String {
        format!("{}{}", self.page_base_url, urlencoding::encode(identifier))
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_appends_identifier() {
        let config = ScraperConfig::default();
        assert_eq!(
            config.page_url("12345"),
            "https://www.target.com/p/-/A-12345"
        );
    }

    #[test]
    fn page_url_encodes_unsafe_characters() {
        let config = ScraperConfig::default();
        assert_eq!(
            config.page_url("12 34/5"),
            "https://www.target.com/p/-/A-12%2034%2F5"
        );
    }

    #[test]
    fn defaults_match_upstream_contract() {
        let config = ScraperConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.concurrency >= 1);
        assert_eq!(config.aggregation.store_id, DEFAULT_STORE_ID);
        assert_eq!(config.aggregation.zip, DEFAULT_ZIP);
    }
}
