pub mod auth;
pub mod conditional_access;

use crate::config::ConfigManager;
use crate::error::{RemoteFailure, Result};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Outcome of a Graph call once retries are exhausted.
pub type GraphResult<T> = std::result::Result<T, RemoteFailure>;

/// Retry configuration shared by every verb.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Used when a 429 carries no usable `Retry-After`.
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30000),
            default_retry_after: Duration::from_secs(1),
        }
    }
}

const JITTER_FACTOR: f64 = 0.3; // +/- 30% jitter

impl RetryPolicy {
    /// Exponential backoff for `attempt` (0-based) with jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let initial = self.initial_backoff.as_millis() as u64;
        let capped = initial
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.max_backoff.as_millis() as u64);

        let jitter_range = (capped as f64 * JITTER_FACTOR) as u64;
        let jitter = if jitter_range > 0 {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            std::time::SystemTime::now().hash(&mut hasher);
            (hasher.finish() % (jitter_range * 2)) as i64 - jitter_range as i64
        } else {
            0
        };

        Duration::from_millis((capped as i64 + jitter).max(0) as u64)
    }
}

/// Graph API client with retry support
pub struct GraphClient {
    client: Client,
    access_token: String,
    base_url: String,
    retry: RetryPolicy,
}

impl GraphClient {
    pub fn new(access_token: String) -> Self {
        Self::with_base_url(access_token, GRAPH_API_BASE)
    }

    /// Client against another endpoint (national clouds, mock servers).
    pub fn with_base_url(access_token: String, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            access_token,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Point an existing client at another endpoint.
    pub fn with_endpoint(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create a GraphClient for the named tenant, loading or acquiring a token.
    pub async fn from_config(config: &ConfigManager, tenant_name: &str) -> Result<Self> {
        let graph_auth = auth::GraphAuth::new(config.clone());
        let access_token = graph_auth.get_access_token(tenant_name).await?;
        Ok(Self::new(access_token))
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }

    /// Send one request, retrying 429 (honouring `Retry-After`), 5xx and
    /// connection errors. Any other non-success status is classified and
    /// returned immediately.
    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> GraphResult<reqwest::Response> {
        let url = self.url(endpoint);
        let attempts = self.retry.max_attempts.max(1);
        let mut last_failure = None;

        for attempt in 0..attempts {
            let is_last = attempt + 1 == attempts;
            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&self.access_token);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }

                    let retryable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    let wait_time = if status == StatusCode::TOO_MANY_REQUESTS {
                        resp.headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.trim().parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or(self.retry.default_retry_after)
                    } else {
                        self.retry.backoff(attempt)
                    };

                    let error_text = resp.text().await.unwrap_or_default();
                    let detail = format!(
                        "HTTP {}: {}",
                        status,
                        crate::error::enhance_graph_error(&error_text)
                    );
                    let failure = RemoteFailure::from_status(status.as_u16(), detail);

                    if !retryable || is_last {
                        return Err(failure);
                    }

                    tracing::warn!(
                        %method,
                        %url,
                        %status,
                        wait_ms = wait_time.as_millis() as u64,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        "retrying Graph request"
                    );
                    last_failure = Some(failure);
                    tokio::time::sleep(wait_time).await;
                }
                Err(e) => {
                    let failure = RemoteFailure::Transient(format!("{} {}: {}", method, url, e));
                    if is_last {
                        return Err(failure);
                    }
                    let wait_time = self.retry.backoff(attempt);
                    tracing::warn!(
                        %method,
                        %url,
                        error = %e,
                        wait_ms = wait_time.as_millis() as u64,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        "connection error, retrying"
                    );
                    last_failure = Some(failure);
                    tokio::time::sleep(wait_time).await;
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| {
            RemoteFailure::Transient(format!("{} {} failed after {} attempts", method, url, attempts))
        }))
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> GraphResult<T> {
        resp.json::<T>()
            .await
            .map_err(|e| RemoteFailure::Transient(format!("invalid response body: {}", e)))
    }

    /// GET a single resource.
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> GraphResult<T> {
        let resp = self.execute::<()>(Method::GET, endpoint, None).await?;
        Self::decode(resp).await
    }

    /// POST and decode the created resource.
    pub async fn post<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> GraphResult<R> {
        let resp = self.execute(Method::POST, endpoint, Some(body)).await?;
        Self::decode(resp).await
    }

    /// PATCH; Graph answers with 204 and no body.
    pub async fn patch<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> GraphResult<()> {
        self.execute(Method::PATCH, endpoint, Some(body)).await?;
        Ok(())
    }

    /// Fetch every page, following `@odata.nextLink`.
    pub async fn get_all_pages<T: DeserializeOwned>(&self, endpoint: &str) -> GraphResult<Vec<T>> {
        let mut all_items: Vec<T> = Vec::new();
        let mut current = self.url(endpoint);

        loop {
            let page: PaginatedResponse<T> = self.get(&current).await?;
            all_items.extend(page.value);

            match page.next_link {
                Some(next) => current = next,
                None => break,
            }
        }

        Ok(all_items)
    }
}

/// Standard OData page with `value` and `@odata.nextLink`.
#[derive(Debug, Deserialize)]
pub struct PaginatedResponse<T> {
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped_and_jittered() {
        let policy = RetryPolicy::default();
        for attempt in 0..10 {
            let wait = policy.backoff(attempt).as_millis() as u64;
            assert!(wait <= 39_000, "attempt {attempt} waited {wait}ms");
        }
        let first = policy.backoff(0).as_millis() as u64;
        assert!((700..=1300).contains(&first));
    }

    #[test]
    fn test_url_joining() {
        let client = GraphClient::with_base_url("t".into(), "http://localhost:1234/v1.0/");
        assert_eq!(
            client.url("/identity/conditionalAccess/policies"),
            "http://localhost:1234/v1.0/identity/conditionalAccess/policies"
        );
        assert_eq!(client.url("https://next.example/page2"), "https://next.example/page2");
    }
}
