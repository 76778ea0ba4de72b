//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;

use youtube_gateway::error::{GatewayError, Result};
use youtube_gateway::schemas::{ApiKey, KeyCounts, Page, Video};
use youtube_gateway::sources::{FetchOutcome, SearchPage, SearchRequest, SourceMetadata, VideoSource};
use youtube_gateway::storage::{KeyStore, MemoryStore, Stores, VideoStore};

/// One scripted answer to a search call
#[derive(Debug, Clone)]
pub enum Reply {
    Page(Vec<Video>, Option<&'static str>),
    NotModified,
    Quota,
    Upstream(u16),
    /// Never answers within any sensible timeout
    Hang,
}

/// A search call as the source saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub key: String,
    pub etag: Option<String>,
}

/// A source that replays scripted search replies and accepts a fixed set
/// of keys on probe
pub struct ScriptedSource {
    metadata: SourceMetadata,
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Call>>,
    accepted: Mutex<HashSet<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            metadata: SourceMetadata {
                id: "scripted".to_string(),
                name: "Scripted".to_string(),
                rate_limit_rpm: 600,
            },
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            accepted: Mutex::new(HashSet::new()),
        }
    }

    pub fn reply(&self, reply: Reply) -> &Self {
        self.replies.lock().push_back(reply);
        self
    }

    pub fn accept(&self, key: &str) -> &Self {
        self.accepted.lock().insert(key.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl VideoSource for ScriptedSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn search(&self, api_key: &str, request: &SearchRequest) -> Result<FetchOutcome> {
        self.calls.lock().push(Call {
            key: api_key.to_string(),
            etag: request.etag.clone(),
        });

        let reply = self.replies.lock().pop_front().unwrap_or(Reply::NotModified);
        match reply {
            Reply::Page(videos, etag) => Ok(FetchOutcome::Modified(SearchPage {
                videos,
                etag: etag.map(str::to_string),
            })),
            Reply::NotModified => Ok(FetchOutcome::NotModified),
            Reply::Quota => Err(GatewayError::QuotaExceeded),
            Reply::Upstream(status) => Err(GatewayError::UpstreamError {
                status,
                message: "scripted failure".to_string(),
            }),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(FetchOutcome::NotModified)
            }
        }
    }

    async fn probe(&self, api_key: &str) -> Result<()> {
        if self.accepted.lock().contains(api_key) {
            Ok(())
        } else {
            Err(GatewayError::Unauthorized)
        }
    }
}

/// Memory store that counts catalog writes and can fail chosen videos
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    inserts: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_calls(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Makes every insert of `unique_id` fail while the rest of its batch
    /// still lands.
    pub fn fail_on(&self, unique_id: &str) -> &Self {
        self.failing.lock().insert(unique_id.to_string());
        self
    }
}

#[async_trait]
impl KeyStore for CountingStore {
    async fn insert_key(&self, key: &str) -> Result<()> {
        self.inner.insert_key(key).await
    }

    async fn find_valid_key(&self) -> Result<ApiKey> {
        self.inner.find_valid_key().await
    }

    fn exhausted_keys(&self) -> BoxStream<'_, Result<ApiKey>> {
        self.inner.exhausted_keys()
    }

    async fn mark_exhausted(&self, key: &str) -> Result<()> {
        self.inner.mark_exhausted(key).await
    }

    async fn mark_valid(&self, key: &str) -> Result<()> {
        self.inner.mark_valid(key).await
    }

    async fn key_counts(&self) -> Result<KeyCounts> {
        self.inner.key_counts().await
    }
}

#[async_trait]
impl VideoStore for CountingStore {
    async fn insert_missing(&self, videos: &[Video]) -> Result<u64> {
        self.inserts.fetch_add(1, Ordering::SeqCst);

        let (rejected, accepted): (Vec<Video>, Vec<Video>) = {
            let failing = self.failing.lock();
            videos
                .iter()
                .cloned()
                .partition(|v| failing.contains(&v.unique_id))
        };
        let inserted = self.inner.insert_missing(&accepted).await?;

        if rejected.is_empty() {
            Ok(inserted)
        } else {
            Err(GatewayError::PartialBatch {
                inserted,
                failed: rejected.len() as u64,
            })
        }
    }

    async fn list_page(&self, page: Page) -> Result<Vec<Video>> {
        self.inner.list_page(page).await
    }

    async fn search(&self, query: &str, page: Page) -> Result<Vec<Video>> {
        self.inner.search(query, page).await
    }

    async fn video_count(&self) -> Result<u64> {
        self.inner.video_count().await
    }
}

pub fn counting_stores() -> (Arc<CountingStore>, Stores) {
    let store = Arc::new(CountingStore::new());
    (store.clone(), Stores::from_backend(store))
}

pub fn video(id: &str, title: &str, description: &str) -> Video {
    Video::new(id, title, description, "2024-01-15T10:00:00Z")
}
