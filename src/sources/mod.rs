//! Upstream video catalog sources
//!
//! A source answers search queries with a change token so unchanged result
//! sets can be skipped, and can probe whether an API key is usable.

pub mod youtube;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schemas::Video;

/// Metadata about a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Unique identifier for the source
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Requests per minute the client allows itself
    pub rate_limit_rpm: u32,
}

/// Parameters of one upstream search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search term
    pub query: String,
    /// Maximum number of results
    pub max_results: u32,
    /// Only items published after this instant (ISO 8601)
    pub published_after: String,
    /// Change token from the last successful search
    pub etag: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn published_after(mut self, published_after: impl Into<String>) -> Self {
        self.published_after = published_after.into();
        self
    }

    pub fn etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub videos: Vec<Video>,
    /// Change token identifying this result set
    pub etag: Option<String>,
}

/// Result of a search that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The change token still matches; nothing to store
    NotModified,
    Modified(SearchPage),
}

/// Trait for upstream video catalogs
///
/// Failures are reported through [`GatewayError`](crate::error::GatewayError):
/// `QuotaExceeded` when the key's budget is used up, `Unauthorized` when the
/// key is rejected, and transient variants for everything else.
#[async_trait]
pub trait VideoSource: Send + Sync {
    fn metadata(&self) -> &SourceMetadata;

    /// Searches for videos using `api_key`.
    async fn search(&self, api_key: &str, request: &SearchRequest) -> Result<FetchOutcome>;

    /// Makes the cheapest read call the API offers with `api_key`.
    async fn probe(&self, api_key: &str) -> Result<()>;

    fn id(&self) -> &str {
        &self.metadata().id
    }
}

pub use youtube::YouTubeSource;
