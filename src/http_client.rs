//! HTTP Client Module
//!
//! Provides the upstream HTTP client with:
//! - Semaphore-based concurrency limiting
//! - Exponential backoff with jitter for transient failures
//! - Per-source rate limiting
//!
//! Only transport errors and retryable statuses are handled here. Every
//! other response is handed back so the source can classify it (304,
//! quota errors, rejected keys).

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{clock::DefaultClock, middleware::NoOpMiddleware, state::NotKeyed, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, IF_NONE_MATCH};
use reqwest::{Client, Request, Response, StatusCode};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum concurrent upstream requests
    pub max_concurrent_requests: usize,
    /// Request timeout
    pub request_timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Maximum retries for failed requests
    pub max_retries: u32,
    /// Initial retry delay
    pub initial_retry_delay: Duration,
    /// Maximum retry delay
    pub max_retry_delay: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            max_retries: 2,
            initial_retry_delay: Duration::from_millis(250),
            max_retry_delay: Duration::from_secs(2),
            user_agent: format!("youtube-gateway/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Resilient HTTP client with concurrency limiting and retries
pub struct ResilientHttpClient {
    client: Client,
    semaphore: Arc<Semaphore>,
    config: HttpClientConfig,
}

impl ResilientHttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests));

        Ok(Self {
            client,
            semaphore,
            config,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpClientConfig::default())
    }

    /// Gets the inner reqwest client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Executes a request, retrying transport errors and retryable statuses
    /// with jittered exponential delay. Any other response is returned as-is.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| GatewayError::ConnectionLost("Semaphore closed".to_string()))?;

        let method = request.method().clone();
        let path = request.url().path().to_string();

        debug!(method = %method, path = %path, "Executing HTTP request");

        let mut attempt = 0u32;
        let mut delay = self.config.initial_retry_delay;
        let max_retries = self.config.max_retries;

        loop {
            attempt += 1;

            let req = request.try_clone().ok_or_else(|| {
                GatewayError::ConnectionLost("request body cannot be retried".to_string())
            })?;

            match self.client.execute(req).await {
                Ok(response) => {
                    let status = response.status();

                    if Self::is_retryable_status(status) && attempt <= max_retries {
                        warn!(
                            status = %status,
                            attempt,
                            max_retries,
                            "Retryable status, will retry"
                        );
                    } else {
                        debug!(status = %status, attempt, "Request completed");
                        return Ok(response);
                    }
                }
                Err(e) => {
                    if (e.is_timeout() || e.is_connect()) && attempt <= max_retries {
                        warn!(error = %e, attempt, "Transient error, will retry");
                    } else {
                        return Err(GatewayError::HttpError(e));
                    }
                }
            }

            // Jitter: random factor between 0.5 and 1.5
            let jitter = 0.5 + rand::random::<f64>();
            tokio::time::sleep(Duration::from_secs_f64(delay.as_secs_f64() * jitter)).await;
            delay = std::cmp::min(delay * 2, self.config.max_retry_delay);
        }
    }

    /// Checks if a status code should trigger a retry
    fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
                | StatusCode::BAD_GATEWAY
                | StatusCode::REQUEST_TIMEOUT
        )
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Source-specific HTTP client with rate limiting
pub struct SourceHttpClient {
    client: Arc<ResilientHttpClient>,
    rate_limiter: RateLimiter<NotKeyed, governor::state::InMemoryState, DefaultClock, NoOpMiddleware>,
    source_id: String,
}

impl SourceHttpClient {
    pub fn new(client: Arc<ResilientHttpClient>, source_id: &str, rate_limit_rpm: u32) -> Self {
        let per_minute = NonZeroU32::new(rate_limit_rpm).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        Self {
            client,
            rate_limiter,
            source_id: source_id.to_string(),
        }
    }

    /// Executes a GET request with query parameters and an optional
    /// `If-None-Match` validator.
    pub async fn get_with_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
        if_none_match: Option<&str>,
    ) -> Result<Response> {
        let mut headers = HeaderMap::new();
        if let Some(tag) = if_none_match {
            match HeaderValue::from_str(tag) {
                Ok(value) => {
                    headers.insert(IF_NONE_MATCH, value);
                }
                Err(_) => warn!(source = %self.source_id, "Ignoring change token that is not a valid header"),
            }
        }

        self.rate_limiter.until_ready().await;

        let request = self
            .client
            .inner()
            .get(url)
            .query(query)
            .headers(headers)
            .build()?;

        self.client.execute(request).await
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}
