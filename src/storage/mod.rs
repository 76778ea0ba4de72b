//! Storage layer for keys and ingested videos
//!
//! Two stores sit behind traits so the pipeline, rotator and HTTP handlers
//! never see the driver:
//! - [`KeyStore`]: upstream API keys with their quota state
//! - [`VideoStore`]: the video catalog
//!
//! [`PgStore`] backs production; [`MemoryStore`] backs tests and local runs.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::info;

use crate::config::{Config, StorageKind};
use crate::error::Result;
use crate::schemas::{ApiKey, KeyCounts, Page, Video};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Persistence for upstream API keys
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Stores `key` as valid with a fresh transition time. Re-adding a known
    /// key resets it to valid.
    async fn insert_key(&self, key: &str) -> Result<()>;

    /// Returns any key that is not exhausted, or
    /// [`GatewayError::NoKeyAvailable`](crate::error::GatewayError::NoKeyAvailable).
    async fn find_valid_key(&self) -> Result<ApiKey>;

    /// Lazily yields every exhausted key.
    fn exhausted_keys(&self) -> BoxStream<'_, Result<ApiKey>>;

    /// Flags `key` as exhausted. Unknown keys are ignored.
    async fn mark_exhausted(&self, key: &str) -> Result<()>;

    /// Flags `key` as valid again. Unknown keys are ignored.
    async fn mark_valid(&self, key: &str) -> Result<()>;

    async fn key_counts(&self) -> Result<KeyCounts>;
}

/// Persistence for the video catalog
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Inserts every video whose `unique_id` is not stored yet; existing
    /// rows are left untouched. Each video is attempted even if others fail.
    ///
    /// Returns the number of new rows, or
    /// [`GatewayError::PartialBatch`](crate::error::GatewayError::PartialBatch)
    /// when at least one insert failed.
    async fn insert_missing(&self, videos: &[Video]) -> Result<u64>;

    /// One page of videos in insertion order.
    async fn list_page(&self, page: Page) -> Result<Vec<Video>>;

    /// One page of videos matching `query`, best match first.
    async fn search(&self, query: &str, page: Page) -> Result<Vec<Video>>;

    async fn video_count(&self) -> Result<u64>;
}

/// Both stores, shared across the loops and the HTTP server
#[derive(Clone)]
pub struct Stores {
    pub keys: Arc<dyn KeyStore>,
    pub videos: Arc<dyn VideoStore>,
}

impl Stores {
    /// Uses a single backend for both stores.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: KeyStore + VideoStore + 'static,
    {
        Self {
            keys: backend.clone(),
            videos: backend,
        }
    }

    /// Connects to the configured backend and prepares its schema.
    pub async fn connect(config: &Config) -> Result<Self> {
        match config.storage_kind()? {
            StorageKind::Postgres => {
                let url = config.database_url.as_deref().unwrap_or_default();
                let store = PgStore::connect(url, config.call_timeout()).await?;
                store.prepare_schema().await?;
                Ok(Self::from_backend(Arc::new(store)))
            }
            StorageKind::Memory => {
                info!("Using in-memory storage, data will not survive restarts");
                Ok(Self::from_backend(Arc::new(MemoryStore::new())))
            }
        }
    }
}
