//! Ingestion orchestration
//!
//! One tick resolves an API key, runs a conditional search upstream and
//! stores whatever is new. Every tick ends in a [`TickOutcome`]; nothing
//! here returns an error or panics, so the background loop never dies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use crate::checkpoint::FetchCursor;
use crate::config::Config;
use crate::error::{with_timeout, GatewayError};
use crate::metrics::{self, TRANSITION_EXHAUSTED};
use crate::scheduler::PeriodicJob;
use crate::schemas::mask_key;
use crate::sources::{FetchOutcome, SearchPage, SearchRequest, VideoSource};
use crate::storage::Stores;

/// The fixed search the job keeps polling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSettings {
    pub query: String,
    pub max_results: u32,
    pub published_after: String,
}

impl SearchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            query: config.search_query().to_string(),
            max_results: config.max_results(),
            published_after: config.published_after.clone(),
        }
    }
}

/// Result of looking for a new key after the active one ran out of quota
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyReplacement {
    /// A different valid key was cached for the next tick (masked)
    Acquired(String),
    /// No other valid key exists
    Unavailable,
    /// The lookup itself failed
    Failed(String),
}

/// What a single ingestion tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A changed result set was stored completely
    Stored { fetched: usize, inserted: u64 },
    /// The change token matched; storage was skipped
    NotModified,
    NoKeyAvailable,
    /// The active key was demoted
    QuotaExceeded { replacement: KeyReplacement },
    UpstreamFailed { message: String },
    StoreFailed { message: String },
    TimedOut { operation: &'static str },
}

impl TickOutcome {
    pub fn is_error(&self) -> bool {
        !matches!(self, TickOutcome::Stored { .. } | TickOutcome::NotModified)
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            TickOutcome::Stored { .. } => "stored",
            TickOutcome::NotModified => "not_modified",
            TickOutcome::NoKeyAvailable => "no_key",
            TickOutcome::QuotaExceeded { .. } => "quota_exceeded",
            TickOutcome::UpstreamFailed { .. } => "upstream_failed",
            TickOutcome::StoreFailed { .. } => "store_failed",
            TickOutcome::TimedOut { .. } => "timed_out",
        }
    }
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickOutcome::Stored { fetched, inserted } => {
                write!(f, "stored {} new of {} fetched videos", inserted, fetched)
            }
            TickOutcome::NotModified => write!(f, "result set not modified"),
            TickOutcome::NoKeyAvailable => write!(f, "no valid API key available"),
            TickOutcome::QuotaExceeded { replacement } => match replacement {
                KeyReplacement::Acquired(key) => write!(f, "quota exceeded, switched to key {}", key),
                KeyReplacement::Unavailable => write!(f, "quota exceeded, no replacement key"),
                KeyReplacement::Failed(e) => write!(f, "quota exceeded, replacement lookup failed: {}", e),
            },
            TickOutcome::UpstreamFailed { message } => write!(f, "upstream failed: {}", message),
            TickOutcome::StoreFailed { message } => write!(f, "store failed: {}", message),
            TickOutcome::TimedOut { operation } => write!(f, "timed out: {}", operation),
        }
    }
}

/// Maps a storage failure onto the tick outcome it causes
fn store_failure(e: GatewayError) -> TickOutcome {
    match e {
        GatewayError::Timeout { operation, .. } => TickOutcome::TimedOut { operation },
        GatewayError::NoKeyAvailable => TickOutcome::NoKeyAvailable,
        other => TickOutcome::StoreFailed {
            message: other.to_string(),
        },
    }
}

/// Fetches the configured search and stores new videos
pub struct Harvester {
    source: Arc<dyn VideoSource>,
    stores: Stores,
    settings: SearchSettings,
    call_timeout: Duration,
}

impl Harvester {
    pub fn new(
        source: Arc<dyn VideoSource>,
        stores: Stores,
        settings: SearchSettings,
        call_timeout: Duration,
    ) -> Self {
        Self {
            source,
            stores,
            settings,
            call_timeout,
        }
    }

    /// Runs one ingestion tick against `cursor`.
    #[instrument(skip(self, cursor), fields(source = %self.source.id()))]
    pub async fn tick(&self, cursor: &mut FetchCursor) -> TickOutcome {
        let outcome = self.fetch_and_store(cursor).await;

        metrics::record_tick(outcome.label());
        if outcome.is_error() {
            cursor.record_error(&outcome.to_string());
        }

        match &outcome {
            TickOutcome::Stored { fetched, inserted } => {
                info!(fetched, inserted, total_inserted = cursor.total_inserted, "Ingestion tick stored videos")
            }
            TickOutcome::NotModified => debug!("Result set unchanged, skipping store"),
            TickOutcome::NoKeyAvailable => {
                error!("No valid API key available, add one through POST /add_key")
            }
            other => warn!(outcome = %other, error_count = cursor.error_count, "Ingestion tick failed"),
        }

        outcome
    }

    async fn fetch_and_store(&self, cursor: &mut FetchCursor) -> TickOutcome {
        let key = match self.resolve_key(cursor).await {
            Ok(key) => key,
            Err(outcome) => return outcome,
        };

        let request = SearchRequest::new(self.settings.query.clone())
            .max_results(self.settings.max_results)
            .published_after(self.settings.published_after.clone())
            .etag(cursor.etag.clone());

        let fetched = with_timeout(
            "upstream search",
            self.call_timeout,
            self.source.search(&key, &request),
        )
        .await;

        match fetched {
            Ok(FetchOutcome::NotModified) => {
                cursor.record_success();
                TickOutcome::NotModified
            }
            Ok(FetchOutcome::Modified(page)) => self.store(cursor, page).await,
            Err(GatewayError::QuotaExceeded) => self.demote(cursor, &key).await,
            Err(GatewayError::Timeout { operation, .. }) => TickOutcome::TimedOut { operation },
            Err(e) => {
                if !e.is_transient() {
                    warn!(key = %mask_key(&key), error = %e, "Upstream rejected the search request");
                }
                TickOutcome::UpstreamFailed {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Uses the cached key, or picks a valid one from the store and caches it.
    async fn resolve_key(&self, cursor: &mut FetchCursor) -> Result<String, TickOutcome> {
        if let Some(key) = &cursor.active_key {
            return Ok(key.clone());
        }

        let record = with_timeout("find valid key", self.call_timeout, self.stores.keys.find_valid_key())
            .await
            .map_err(store_failure)?;

        debug!(key = %record.masked(), "Cached API key");
        cursor.set_key(record.key.clone());
        Ok(record.key)
    }

    async fn store(&self, cursor: &mut FetchCursor, page: SearchPage) -> TickOutcome {
        let fetched = page.videos.len();

        let inserted = with_timeout(
            "store videos",
            self.call_timeout,
            self.stores.videos.insert_missing(&page.videos),
        )
        .await;

        match inserted {
            Ok(inserted) => {
                metrics::record_videos_inserted(inserted);
                cursor.record_stored(inserted, page.etag);
                TickOutcome::Stored { fetched, inserted }
            }
            Err(GatewayError::PartialBatch { inserted, failed }) => {
                metrics::record_videos_inserted(inserted);
                cursor.total_inserted += inserted;
                TickOutcome::StoreFailed {
                    message: format!("{} of {} videos failed to insert", failed, fetched),
                }
            }
            Err(e) => store_failure(e),
        }
    }

    /// Marks `key` exhausted, drops it from the cursor and tries to cache a
    /// replacement for the next tick. The search is not retried in this tick.
    async fn demote(&self, cursor: &mut FetchCursor, key: &str) -> TickOutcome {
        warn!(key = %mask_key(key), "Quota exceeded, marking key exhausted");
        cursor.clear_key();

        match with_timeout("mark key exhausted", self.call_timeout, self.stores.keys.mark_exhausted(key)).await {
            Ok(()) => metrics::record_key_transition(TRANSITION_EXHAUSTED),
            Err(e) => warn!(key = %mask_key(key), error = %e, "Failed to mark key exhausted"),
        }

        let replacement = match with_timeout(
            "find replacement key",
            self.call_timeout,
            self.stores.keys.find_valid_key(),
        )
        .await
        {
            Ok(next) if next.key == key => {
                warn!(key = %next.masked(), "Store still reports the exhausted key as valid");
                KeyReplacement::Unavailable
            }
            Ok(next) => {
                info!(key = %next.masked(), "Switched to replacement key");
                let masked = next.masked();
                cursor.set_key(next.key);
                KeyReplacement::Acquired(masked)
            }
            Err(GatewayError::NoKeyAvailable) => KeyReplacement::Unavailable,
            Err(e) => KeyReplacement::Failed(e.to_string()),
        };

        TickOutcome::QuotaExceeded { replacement }
    }
}

/// The ingestion loop's job: a harvester plus the cursor it alone owns
pub struct IngestionJob {
    harvester: Harvester,
    cursor: FetchCursor,
}

impl IngestionJob {
    pub fn new(harvester: Harvester) -> Self {
        Self {
            harvester,
            cursor: FetchCursor::new(),
        }
    }

    pub fn cursor(&self) -> &FetchCursor {
        &self.cursor
    }
}

#[async_trait]
impl PeriodicJob for IngestionJob {
    type Outcome = TickOutcome;

    fn name(&self) -> &'static str {
        "ingestion"
    }

    async fn run_tick(&mut self) -> TickOutcome {
        self.harvester.tick(&mut self.cursor).await
    }
}
