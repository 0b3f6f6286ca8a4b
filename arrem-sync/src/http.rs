//! Shared HTTP plumbing for the source and destination clients
//!
//! Wraps a `reqwest::Client` with:
//! - Credential header installed once at construction (marked sensitive)
//! - Bounded request timeout
//! - Status classification into [`ClientError`]
//! - Retry with exponential backoff ([`retry_with_backoff`])
//! - Optional client-side request rate cap (governor token bucket)

use crate::error::{ClientError, ClientResult};
use crate::retry::{classify_client_error, parse_retry_after, retry_with_backoff, RetryPolicy};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::num::NonZeroU32;
use std::time::Duration;

const USER_AGENT: &str = concat!("arrem-sync/", env!("CARGO_PKG_VERSION"));

/// HTTP transport bound to one service endpoint and credential
pub struct HttpTransport {
    client: Client,
    /// Base URL without trailing slash
    base_url: String,
    /// Service label used in log fields (e.g. "radarr-1", "emby")
    service: String,
    retry: RetryPolicy,
    rate_limiter: Option<DefaultDirectRateLimiter>,
}

impl HttpTransport {
    /// Build a transport that sends `auth_header: api_key` on every request
    pub fn new(
        service: impl Into<String>,
        base_url: &str,
        auth_header: &'static str,
        api_key: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> ClientResult<Self> {
        let mut key = HeaderValue::from_str(api_key).map_err(|_| ClientError::Client {
            status: 0,
            message: "API key contains characters not allowed in an HTTP header".to_string(),
        })?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(auth_header), key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| ClientError::Connection(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service: service.into(),
            retry,
            rate_limiter: None,
        })
    }

    /// Cap outgoing requests to `per_second`
    pub fn with_rate_limit(mut self, per_second: NonZeroU32) -> Self {
        self.rate_limiter = Some(RateLimiter::direct(Quota::per_second(per_second)));
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn wait_for_slot(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }
    }

    /// GET `path` and decode the JSON body
    pub async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> ClientResult<T>
    where
        T: DeserializeOwned + Send,
    {
        let url = self.url(path);
        let operation = format!("{} GET {}", self.service, path);
        let url = &url;

        tracing::debug!(service = %self.service, url = %url, "GET");

        retry_with_backoff(
            &self.retry,
            &operation,
            move || async move {
                self.wait_for_slot().await;
                let response = self.client.get(url).query(query).send().await?;
                let response = check_status(response).await?;
                let bytes = response.bytes().await?;
                serde_json::from_slice::<T>(&bytes).map_err(ClientError::from)
            },
            classify_client_error,
        )
        .await
    }

    /// POST a JSON body to `path`, ignoring any response body
    pub async fn post_json<B>(&self, path: &str, body: &B) -> ClientResult<()>
    where
        B: Serialize + Sync,
    {
        let url = self.url(path);
        let operation = format!("{} POST {}", self.service, path);
        let url = &url;

        tracing::debug!(service = %self.service, url = %url, "POST");

        retry_with_backoff(
            &self.retry,
            &operation,
            move || async move {
                self.wait_for_slot().await;
                let response = self.client.post(url).json(body).send().await?;
                check_status(response).await?;
                Ok(())
            },
            classify_client_error,
        )
        .await
    }
}

/// Turn a non-success response into a classified error
async fn check_status(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();

    Err(ClientError::from_status(status, body, retry_after))
}
