//! Browse and search over the catalog
//!
//! Turns raw request parameters into store calls. Parameter problems come
//! back as [`GatewayError::InvalidInput`] carrying the client-facing message.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{with_timeout, GatewayError, Result};
use crate::schemas::{Page, Video};
use crate::storage::VideoStore;

pub const PAGE_MUST_BE_INTEGER: &str = "page query param must be an integer";
pub const QUERY_REQUIRED: &str = "query param is required";

/// Parses a 1-based page number. Integers below 1 select the first page.
pub fn parse_page(raw: Option<&str>) -> Result<i64> {
    raw.map(str::trim)
        .and_then(|p| p.parse::<i64>().ok())
        .ok_or_else(|| GatewayError::InvalidInput(PAGE_MUST_BE_INTEGER.to_string()))
}

#[derive(Clone)]
pub struct VideoQueryService {
    videos: Arc<dyn VideoStore>,
    page_size: u64,
    call_timeout: Duration,
}

impl VideoQueryService {
    pub fn new(videos: Arc<dyn VideoStore>, page_size: u64, call_timeout: Duration) -> Self {
        Self {
            videos,
            page_size,
            call_timeout,
        }
    }

    /// Stored videos in insertion order.
    pub async fn list(&self, page: Option<&str>) -> Result<Vec<Video>> {
        let page = Page::new(parse_page(page)?, self.page_size);
        with_timeout("list videos", self.call_timeout, self.videos.list_page(page)).await
    }

    /// Videos matching `query`, best match first.
    pub async fn search(&self, query: Option<&str>, page: Option<&str>) -> Result<Vec<Video>> {
        let query = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| GatewayError::InvalidInput(QUERY_REQUIRED.to_string()))?;
        let page = Page::new(parse_page(page)?, self.page_size);

        with_timeout("search videos", self.call_timeout, self.videos.search(query, page)).await
    }
}
