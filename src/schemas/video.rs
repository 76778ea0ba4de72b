//! Video Schema
//!
//! A single catalog entry as stored and as served to clients.

use serde::{Deserialize, Serialize};

use super::common::Timestamp;

/// An ingested video. `unique_id` is the upstream video id and the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub unique_id: String,
    pub title: String,
    pub description: String,
    /// Upstream publish time, kept verbatim
    pub published_at: Timestamp,
}

impl Video {
    pub fn new(
        unique_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        published_at: impl Into<String>,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            title: title.into(),
            description: description.into(),
            published_at: published_at.into(),
        }
    }
}
