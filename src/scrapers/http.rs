use crate::config::FetchConfig;
use crate::error::ScrapeError;
use crate::scrapers::traits::PageFetcher;
use crate::scrapers::types::{FetchRequest, RawResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Lightweight HTTP fetch path
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

/// Seconds form of `Retry-After`; HTTP-date values are ignored
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, ScrapeError> {
        debug!("Fetching URL: {}", request.url);

        let response = self
            .client
            .get(&request.url)
            .header(USER_AGENT, &request.user_agent)
            .header(ACCEPT_LANGUAGE, &request.accept_language)
            .header(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| ScrapeError::TransientNetwork {
                url: request.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(ScrapeError::RateLimited {
                url: request.url.clone(),
                status: status.as_u16(),
                retry_after,
            });
        }

        if status.is_server_error() {
            return Err(ScrapeError::TransientNetwork {
                url: request.url.clone(),
                reason: format!("HTTP {}", status),
            });
        }

        let final_url = response.url().to_string();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();

        let body = response.text().await.map_err(|e| ScrapeError::TransientNetwork {
            url: request.url.clone(),
            reason: format!("Failed to read response body: {}", e),
        })?;

        debug!("Downloaded {} bytes of HTML from {}", body.len(), final_url);

        Ok(RawResponse {
            url: final_url,
            status: status.as_u16(),
            headers,
            body,
            rendered: false,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
