use crate::config::ScraperConfig;
use reqwest::{
    Client,
    header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue},
};
use std::time::Duration;
use tracing::warn;

pub fn build_client(config: &ScraperConfig) -> Client {
    let connect = crate::config::env_parse::<u64>("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5);
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    let connect = Duration::from_secs(connect).min(config.timeout);
    Client::builder()
        .timeout(config.timeout)
        .connect_timeout(connect)
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .build()
        .unwrap_or_else(|err| {
            warn!(
                target = "tcin.fetch",
                error = %err,
                "http client rejected configured headers; using defaults with the same timeouts"
            );
            Client::builder()
                .timeout(config.timeout)
                .connect_timeout(connect)
                .build()
                .unwrap_or_else(|_| Client::new())
        })
}
