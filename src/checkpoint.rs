//! Fetch Cursor Module
//!
//! State the ingestion job carries from one tick to the next: the change
//! token of the last stored result set, the cached API key, and counters
//! for status reporting. The cursor is owned by the job and lives only as
//! long as the process.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::schemas::mask_key;

/// Per-process ingestion state
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchCursor {
    /// Change token of the last result set that was fully stored
    pub etag: Option<String>,
    /// API key cached for the next search
    #[serde(skip)]
    pub active_key: Option<String>,
    /// Last tick that ended in success or "not modified"
    pub last_success_at: Option<DateTime<Utc>>,
    /// Videos inserted since startup
    pub total_inserted: u64,
    /// Last error message
    pub last_error: Option<String>,
    /// Number of consecutive failed ticks
    pub error_count: u32,
}

impl FetchCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a tick whose result set was stored completely.
    pub fn record_stored(&mut self, inserted: u64, etag: Option<String>) {
        self.total_inserted += inserted;
        self.etag = etag;
        self.record_success();
    }

    /// Records a tick that finished without errors.
    pub fn record_success(&mut self) {
        self.last_success_at = Some(Utc::now());
        self.last_error = None;
        self.error_count = 0;
    }

    /// Records a failed tick. The change token is left untouched so the
    /// next tick fetches the same result set again.
    pub fn record_error(&mut self, error: &str) {
        self.last_error = Some(error.to_string());
        self.error_count += 1;
    }

    pub fn set_key(&mut self, key: impl Into<String>) {
        self.active_key = Some(key.into());
    }

    pub fn clear_key(&mut self) {
        self.active_key = None;
    }

    /// Masked form of the cached key for logs and status output.
    pub fn masked_key(&self) -> Option<String> {
        self.active_key.as_deref().map(mask_key)
    }
}
