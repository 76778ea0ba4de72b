//! In-memory store for tests and local runs
//!
//! Keys and videos live in `Vec`s behind `parking_lot` locks; vector order
//! is insertion order.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use tracing::debug;

use super::{KeyStore, VideoStore};
use crate::error::{GatewayError, Result};
use crate::relevance;
use crate::schemas::{ApiKey, KeyCounts, Page, Video};

#[derive(Default)]
struct Catalog {
    videos: Vec<Video>,
    ids: HashSet<String>,
}

/// In-memory key and video store
#[derive(Default)]
pub struct MemoryStore {
    keys: RwLock<Vec<ApiKey>>,
    catalog: RwLock<Catalog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a key record as-is, including its state and timestamp.
    pub fn put_key(&self, record: ApiKey) {
        let mut keys = self.keys.write();
        keys.retain(|k| k.key != record.key);
        keys.push(record);
    }

    /// Looks up a key record.
    pub fn get_key(&self, key: &str) -> Option<ApiKey> {
        self.keys.read().iter().find(|k| k.key == key).cloned()
    }

    /// Every key record in insertion order.
    pub fn all_keys(&self) -> Vec<ApiKey> {
        self.keys.read().clone()
    }

    /// Every stored video in insertion order.
    pub fn all_videos(&self) -> Vec<Video> {
        self.catalog.read().videos.clone()
    }

    fn set_exhausted(&self, key: &str, exhausted: bool) {
        let mut keys = self.keys.write();
        if let Some(record) = keys.iter_mut().find(|k| k.key == key) {
            record.is_exhausted = exhausted;
            record.last_updated = Utc::now();
        }
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn insert_key(&self, key: &str) -> Result<()> {
        self.put_key(ApiKey::new(key));
        Ok(())
    }

    async fn find_valid_key(&self) -> Result<ApiKey> {
        self.keys
            .read()
            .iter()
            .find(|k| !k.is_exhausted)
            .cloned()
            .ok_or(GatewayError::NoKeyAvailable)
    }

    fn exhausted_keys(&self) -> BoxStream<'_, Result<ApiKey>> {
        let snapshot: Vec<ApiKey> = self
            .keys
            .read()
            .iter()
            .filter(|k| k.is_exhausted)
            .cloned()
            .collect();
        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }

    async fn mark_exhausted(&self, key: &str) -> Result<()> {
        self.set_exhausted(key, true);
        Ok(())
    }

    async fn mark_valid(&self, key: &str) -> Result<()> {
        self.set_exhausted(key, false);
        Ok(())
    }

    async fn key_counts(&self) -> Result<KeyCounts> {
        let keys = self.keys.read();
        let exhausted = keys.iter().filter(|k| k.is_exhausted).count() as u64;
        Ok(KeyCounts {
            valid: keys.len() as u64 - exhausted,
            exhausted,
        })
    }
}

#[async_trait]
impl VideoStore for MemoryStore {
    async fn insert_missing(&self, videos: &[Video]) -> Result<u64> {
        let mut catalog = self.catalog.write();
        let mut inserted = 0;

        for video in videos {
            if catalog.ids.insert(video.unique_id.clone()) {
                catalog.videos.push(video.clone());
                inserted += 1;
            }
        }

        debug!(received = videos.len(), inserted, "Inserted videos");
        Ok(inserted)
    }

    async fn list_page(&self, page: Page) -> Result<Vec<Video>> {
        Ok(page.slice(self.catalog.read().videos.clone()))
    }

    async fn search(&self, query: &str, page: Page) -> Result<Vec<Video>> {
        let candidates = self.catalog.read().videos.clone();
        Ok(relevance::rank(query, candidates, page))
    }

    async fn video_count(&self) -> Result<u64> {
        Ok(self.catalog.read().videos.len() as u64)
    }
}
