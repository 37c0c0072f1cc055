//! HTTP implementation of the `Fetcher` port.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ma_config::DownloadSettings;
use ma_core::error::{AppError, Result};
use ma_core::traits::Fetcher;
use ma_services::{retry_with_backoff, RetryPolicy};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::debug;

pub struct HttpFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(settings: &DownloadSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            policy: retry_policy(settings),
        })
    }

    async fn attempt(
        &self,
        url: &str,
        number: u32,
    ) -> std::result::Result<Bytes, backoff::Error<String>> {
        debug!(url, attempt = number, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.headers()));
        }
        response
            .bytes()
            .await
            .map_err(|e| backoff::Error::transient(format!("reading body: {e}")))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        retry_with_backoff(&self.policy, |number| self.attempt(url, number))
            .await
            .map_err(|reason| AppError::fetch_failed(url, reason))
    }
}

pub fn retry_policy(settings: &DownloadSettings) -> RetryPolicy {
    RetryPolicy {
        max_attempts: settings.max_attempts,
        base_delay: Duration::from_millis(settings.base_delay_ms),
        max_delay: Duration::from_millis(settings.max_delay_ms),
    }
}

/// Rate limits and server errors are retried; any other status is final.
fn classify_status(status: StatusCode, headers: &HeaderMap) -> backoff::Error<String> {
    let error = format!("HTTP {status}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        match retry_after(headers) {
            Some(delay) => backoff::Error::retry_after(error, delay),
            None => backoff::Error::transient(error),
        }
    } else {
        backoff::Error::permanent(error)
    }
}

fn classify_transport(e: reqwest::Error) -> backoff::Error<String> {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        backoff::Error::transient(e.to_string())
    } else {
        backoff::Error::permanent(e.to_string())
    }
}

/// `Retry-After` in delta-seconds form. HTTP dates fall back to backoff.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
