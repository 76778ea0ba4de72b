//! YouTube Data API v3 source
//!
//! Search: https://developers.google.com/youtube/v3/docs/search/list
//! Keys are probed with a one-field `channels.list` call.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::ETAG;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::{FetchOutcome, SearchPage, SearchRequest, SourceMetadata, VideoSource};
use crate::error::{GatewayError, Result};
use crate::http_client::{ResilientHttpClient, SourceHttpClient};
use crate::metrics;
use crate::schemas::Video;

pub const YOUTUBE_API_URL: &str = "https://www.googleapis.com/youtube/v3";

const ORDER_BY: &str = "date";
const RESULT_TYPE: &str = "video";
const PROBE_USERNAME: &str = "Youtube";

/// Error reasons that mean the key's budget is spent
const QUOTA_REASONS: &[&str] = &["quotaExceeded", "dailyLimitExceeded"];

/// Error reasons that mean the key itself is unusable
const KEY_REASONS: &[&str] = &[
    "keyInvalid",
    "keyExpired",
    "forbidden",
    "accessNotConfigured",
    "ipRefererBlocked",
    "authError",
];

#[derive(Debug, Deserialize)]
struct SearchListResponse {
    etag: Option<String>,
    #[serde(default)]
    items: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: ResultId,
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    published_at: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

impl SearchResult {
    fn into_video(self) -> Option<Video> {
        let unique_id = self.id.video_id?;
        let snippet = self.snippet?;
        Some(Video {
            unique_id,
            title: snippet.title,
            description: snippet.description,
            published_at: snippet.published_at,
        })
    }
}

/// Maps a failed upstream response onto the error taxonomy.
pub fn classify_error(status: StatusCode, body: &str) -> GatewayError {
    let parsed: Option<ErrorEnvelope> = serde_json::from_str(body).ok();
    let reasons: Vec<&str> = parsed
        .as_ref()
        .map(|e| e.error.errors.iter().map(|d| d.reason.as_str()).collect())
        .unwrap_or_default();

    if reasons.iter().any(|r| QUOTA_REASONS.contains(r)) || body.contains("quotaExceeded") {
        return GatewayError::QuotaExceeded;
    }

    let key_rejected = status == StatusCode::UNAUTHORIZED
        || (matches!(status, StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN)
            && reasons.iter().any(|r| KEY_REASONS.contains(r)));
    if key_rejected {
        return GatewayError::Unauthorized;
    }

    let message = parsed
        .map(|e| e.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect());

    GatewayError::UpstreamError {
        status: status.as_u16(),
        message,
    }
}

/// YouTube Data API source
pub struct YouTubeSource {
    client: SourceHttpClient,
    base_url: Url,
    metadata: SourceMetadata,
}

impl YouTubeSource {
    /// Creates a source talking to `base_url` (normally [`YOUTUBE_API_URL`]).
    pub fn new(http_client: Arc<ResilientHttpClient>, base_url: &str, rate_limit_rpm: u32) -> Result<Self> {
        // A trailing slash makes `join` append instead of replacing the
        // last path segment.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| GatewayError::InvalidConfig(format!("invalid YOUTUBE_API_URL: {}", e)))?;

        let metadata = SourceMetadata {
            id: "youtube".to_string(),
            name: "YouTube Data API".to_string(),
            rate_limit_rpm,
        };

        Ok(Self {
            client: SourceHttpClient::new(http_client, "youtube", rate_limit_rpm),
            base_url,
            metadata,
        })
    }

    fn endpoint(&self, name: &str) -> Result<String> {
        self.base_url
            .join(name)
            .map(|u| u.to_string())
            .map_err(|e| GatewayError::InvalidConfig(format!("invalid endpoint {}: {}", name, e)))
    }

    async fn error_from(response: Response) -> GatewayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_error(status, &body)
    }
}

#[async_trait]
impl VideoSource for YouTubeSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn search(&self, api_key: &str, request: &SearchRequest) -> Result<FetchOutcome> {
        let url = self.endpoint("search")?;
        let max_results = request.max_results.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("part", "id,snippet"),
            ("q", request.query.as_str()),
            ("maxResults", max_results.as_str()),
            ("order", ORDER_BY),
            ("type", RESULT_TYPE),
            ("key", api_key),
        ];
        if !request.published_after.is_empty() {
            params.push(("publishedAfter", request.published_after.as_str()));
        }

        debug!(
            source = "youtube",
            query = %request.query,
            max_results = request.max_results,
            has_etag = request.etag.is_some(),
            "Searching videos"
        );

        let started = Instant::now();
        let response = self
            .client
            .get_with_query(&url, &params, request.etag.as_deref())
            .await;
        metrics::record_upstream_latency("search", started.elapsed().as_secs_f64());
        let response = response?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(Self::error_from(response).await);
        }

        let header_etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await?;
        let parsed: SearchListResponse = serde_json::from_str(&text)?;

        let videos: Vec<Video> = parsed
            .items
            .into_iter()
            .filter_map(SearchResult::into_video)
            .collect();

        info!(source = "youtube", videos = videos.len(), "Fetched videos");

        Ok(FetchOutcome::Modified(SearchPage {
            videos,
            etag: parsed.etag.or(header_etag),
        }))
    }

    async fn probe(&self, api_key: &str) -> Result<()> {
        let url = self.endpoint("channels")?;
        let params = [("part", "id"), ("forUsername", PROBE_USERNAME), ("key", api_key)];

        let started = Instant::now();
        let response = self.client.get_with_query(&url, &params, None).await;
        metrics::record_upstream_latency("probe", started.elapsed().as_secs_f64());
        let response = response?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }
}
