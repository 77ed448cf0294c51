//! Shared HTTP plumbing for the backend collaborators.
//!
//! Every call goes through [`ApiClient::send`], which retries network failures, rate limits
//! and server errors with exponential backoff. Any other status is handed back to the caller,
//! because collaborators branch on 404/409 rather than treating them as failures.

use anyhow::{anyhow, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Rate limit retry configuration
pub const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const BACKOFF_MULTIPLIER: u32 = 2;
const MAX_RETRY_AFTER_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_backoff: INITIAL_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping; used by tests against local mock servers.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
        }
    }

    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = BACKOFF_MULTIPLIER.saturating_pow(retry_count.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

/// Extract a retry hint from a `Retry-After` header or a "retry after N seconds" body.
fn parse_retry_after(header: Option<&str>, body: &str) -> Option<u64> {
    if let Some(secs) = header.and_then(|value| value.trim().parse::<u64>().ok()) {
        return Some(secs.min(MAX_RETRY_AFTER_SECS));
    }
    let lower = body.to_lowercase();
    let pos = lower.find("retry")?;
    lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_ascii_digit())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < MAX_RETRY_AFTER_SECS)
}

fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Final status and body of a request.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            anyhow!(
                "Failed to parse response ({}): {}. Body: {}",
                self.status,
                e,
                truncate_body(&self.body)
            )
        })
    }

    /// Body as JSON, or `Value::Null` when empty or not JSON.
    pub fn json_or_null(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }

    /// Turn a non-success response into an error mentioning `what`.
    pub fn error_for(&self, what: &str) -> anyhow::Error {
        anyhow!("{} failed ({}): {}", what, self.status, truncate_body(&self.body))
    }
}

fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 300;
    let trimmed = body.trim();
    if trimmed.chars().count() <= LIMIT {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(LIMIT).collect();
    format!("{}...", head)
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let base = Url::parse(base_url.trim())
            .map_err(|e| anyhow!("Invalid API base URL {:?}: {}", base_url, e))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("API base URL {:?} cannot be a base", base_url));
        }
        Ok(Self {
            http: create_http_client(timeout_secs)?,
            base,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Join path segments onto the base URL, percent-encoding each segment.
    pub fn endpoint<I, S>(&self, segments: I) -> Result<Url>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("API base URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `prefix` segments followed by each component of a repo-relative path.
    pub fn path_endpoint(&self, prefix: &[&str], repo_path: &str) -> Result<Url> {
        let components = repo_path.split('/').filter(|part| !part.is_empty());
        self.endpoint(prefix.iter().copied().chain(components))
    }

    pub async fn get(&self, url: Url) -> Result<ApiResponse> {
        self.send(Method::GET, url, None).await
    }

    pub async fn post(&self, url: Url, body: &Value) -> Result<ApiResponse> {
        self.send(Method::POST, url, Some(body)).await
    }

    pub async fn put(&self, url: Url, body: &Value) -> Result<ApiResponse> {
        self.send(Method::PUT, url, Some(body)).await
    }

    /// Send a request, retrying network errors, 429 and 5xx up to the policy limit.
    ///
    /// Returns the last response for any status; errors only when the request never got one.
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let mut retry_count = 0;

        loop {
            let mut request = self.http.request(method.clone(), url.clone());
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < self.retry.max_retries {
                        retry_count += 1;
                        let delay = self.retry.backoff(retry_count);
                        tracing::warn!(
                            %method,
                            %url,
                            retry_count,
                            error = %err,
                            "request failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(anyhow!("{} {} failed: {}", method, url, err));
                }
            };

            let status = response.status();
            let retry_after_header = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < self.retry.max_retries {
                        retry_count += 1;
                        tokio::time::sleep(self.retry.backoff(retry_count)).await;
                        continue;
                    }
                    return Err(anyhow!("{} {} failed reading body: {}", method, url, err));
                }
            };

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && retry_count < self.retry.max_retries {
                retry_count += 1;
                let rate_limited = status == StatusCode::TOO_MANY_REQUESTS;
                let honor_retry_after = rate_limited && !self.retry.initial_backoff.is_zero();
                let delay = if honor_retry_after {
                    parse_retry_after(retry_after_header.as_deref(), &text)
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.retry.backoff(retry_count))
                } else {
                    self.retry.backoff(retry_count)
                };
                tracing::warn!(
                    %method,
                    %url,
                    %status,
                    retry_count,
                    "retryable status; backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Ok(ApiResponse { status, body: text });
        }
    }
}

/// Create a configured HTTP client for backend requests
pub fn create_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))
}
