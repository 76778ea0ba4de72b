//! API Key Schema
//!
//! Upstream credentials and their quota state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Time an exhausted key must rest before it is probed again
pub const KEY_COOLDOWN_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub key: String,
    pub is_exhausted: bool,
    /// Time of the last valid/exhausted transition
    pub last_updated: DateTime<Utc>,
}

impl ApiKey {
    /// A freshly added, usable key
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            is_exhausted: false,
            last_updated: Utc::now(),
        }
    }

    /// An exhausted key whose last transition happened at `at`
    pub fn exhausted_at(key: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            is_exhausted: true,
            last_updated: at,
        }
    }

    /// Whether the cooldown window has fully elapsed at `now`
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        now - self.last_updated > Duration::hours(KEY_COOLDOWN_HOURS)
    }

    pub fn masked(&self) -> String {
        mask_key(&self.key)
    }
}

/// Counts of keys per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyCounts {
    pub valid: u64,
    pub exhausted: u64,
}

/// Renders a key safe for logs: the first four characters and a fixed tail.
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{}****", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_boundary() {
        let marked = Utc::now();
        let key = ApiKey::exhausted_at("AIzaTest", marked);

        assert!(!key.cooldown_elapsed(marked + Duration::hours(23)));
        assert!(!key.cooldown_elapsed(marked + Duration::hours(24)));
        assert!(key.cooldown_elapsed(marked + Duration::hours(24) + Duration::seconds(1)));
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("AIzaSyD-secret"), "AIza****");
        assert_eq!(mask_key("ab"), "ab****");
    }
}
