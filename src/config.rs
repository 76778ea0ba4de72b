//! Configuration for the gateway

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::error::{GatewayError, Result};

/// Backing store for keys and videos
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Postgres,
    Memory,
}

impl std::str::FromStr for StorageKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageKind::Postgres),
            "memory" => Ok(StorageKind::Memory),
            other => Err(GatewayError::InvalidConfig(format!(
                "unknown STORAGE_TYPE '{}', expected postgres or memory",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server
    pub port: Option<u16>,

    // Storage
    pub database_url: Option<String>,
    #[serde(default = "default_storage_type")]
    pub storage_type: String,

    // Upstream search
    pub query: Option<String>,
    #[serde(default = "default_youtube_api_url")]
    pub youtube_api_url: String,
    #[serde(default = "default_published_after")]
    pub published_after: String,
    #[serde(default = "default_max_videos_fetched")]
    pub max_videos_fetched: i64,

    // Pagination
    #[serde(default = "default_per_page_limit")]
    pub per_page_limit: i64,

    // Intervals
    #[serde(default = "default_fetch_latest_videos_seconds")]
    pub fetch_latest_videos_seconds: i64,
    #[serde(default = "default_update_api_keys_expiration_minutes")]
    pub update_api_keys_expiration_minutes: i64,

    // Upstream protection
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: i64,
    #[serde(default = "default_upstream_rate_limit")]
    pub upstream_rate_limit_rpm: u32,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_upstream_max_retries")]
    pub upstream_max_retries: u32,

    // Metrics
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Longest accepted loop period, one week
const MAX_PERIOD_SECS: i64 = 7 * 24 * 60 * 60;
/// Longest accepted per-call timeout
const MAX_CALL_TIMEOUT_SECS: i64 = 60 * 60;

fn default_storage_type() -> String {
    "postgres".to_string()
}

fn default_youtube_api_url() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_published_after() -> String {
    "2022-01-01T00:00:00Z".to_string()
}

fn default_max_videos_fetched() -> i64 {
    5
}

fn default_per_page_limit() -> i64 {
    5
}

fn default_fetch_latest_videos_seconds() -> i64 {
    10
}

fn default_update_api_keys_expiration_minutes() -> i64 {
    120
}

fn default_call_timeout_secs() -> i64 {
    10
}

fn default_upstream_rate_limit() -> u32 {
    60
}

fn default_max_concurrent_requests() -> usize {
    4
}

fn default_upstream_max_retries() -> u32 {
    2
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            database_url: None,
            storage_type: default_storage_type(),
            query: None,
            youtube_api_url: default_youtube_api_url(),
            published_after: default_published_after(),
            max_videos_fetched: default_max_videos_fetched(),
            per_page_limit: default_per_page_limit(),
            fetch_latest_videos_seconds: default_fetch_latest_videos_seconds(),
            update_api_keys_expiration_minutes: default_update_api_keys_expiration_minutes(),
            call_timeout_secs: default_call_timeout_secs(),
            upstream_rate_limit_rpm: default_upstream_rate_limit(),
            max_concurrent_requests: default_max_concurrent_requests(),
            upstream_max_retries: default_upstream_max_retries(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment (and `.env`).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_environment(config::Environment::default())
    }

    /// Loads configuration from an explicit variable map instead of the
    /// process environment.
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        Self::from_environment(config::Environment::default().source(Some(vars)))
    }

    fn from_environment(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(env.separator("__").try_parsing(true))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Validates the configuration.
    ///
    /// Missing required values are an error. Out-of-range tunables are
    /// replaced by their defaults with a warning.
    pub fn validate(&mut self) -> Result<()> {
        if self.port.is_none() {
            return Err(GatewayError::InvalidConfig(
                "environment variable PORT not found".to_string(),
            ));
        }

        if self.query.as_deref().map_or(true, |q| q.trim().is_empty()) {
            return Err(GatewayError::InvalidConfig(
                "environment variable QUERY not found".to_string(),
            ));
        }

        if self.storage_kind()? == StorageKind::Postgres
            && self.database_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(GatewayError::InvalidConfig(
                "environment variable DATABASE_URL not found".to_string(),
            ));
        }

        clamp(
            "MAX_VIDEOS_FETCHED",
            &mut self.max_videos_fetched,
            |v| (1..=50).contains(&v),
            default_max_videos_fetched(),
        );
        clamp(
            "PER_PAGE_LIMIT",
            &mut self.per_page_limit,
            |v| v >= 1,
            default_per_page_limit(),
        );
        clamp(
            "FETCH_LATEST_VIDEOS_SECONDS",
            &mut self.fetch_latest_videos_seconds,
            |v| (1..=MAX_PERIOD_SECS).contains(&v),
            default_fetch_latest_videos_seconds(),
        );
        clamp(
            "UPDATE_API_KEYS_EXPIRATION_MINUTES",
            &mut self.update_api_keys_expiration_minutes,
            |v| (1..=MAX_PERIOD_SECS / 60).contains(&v),
            default_update_api_keys_expiration_minutes(),
        );
        clamp(
            "CALL_TIMEOUT_SECS",
            &mut self.call_timeout_secs,
            |v| (1..=MAX_CALL_TIMEOUT_SECS).contains(&v),
            default_call_timeout_secs(),
        );

        if self.upstream_rate_limit_rpm == 0 {
            warn!(default = default_upstream_rate_limit(), "UPSTREAM_RATE_LIMIT_RPM must be positive, using default");
            self.upstream_rate_limit_rpm = default_upstream_rate_limit();
        }
        if self.max_concurrent_requests == 0 {
            warn!(default = default_max_concurrent_requests(), "MAX_CONCURRENT_REQUESTS must be positive, using default");
            self.max_concurrent_requests = default_max_concurrent_requests();
        }

        Ok(())
    }

    pub fn storage_kind(&self) -> Result<StorageKind> {
        self.storage_type.parse()
    }

    /// The fixed search term; empty until validated
    pub fn search_query(&self) -> &str {
        self.query.as_deref().unwrap_or_default()
    }

    pub fn max_results(&self) -> u32 {
        self.max_videos_fetched as u32
    }

    pub fn page_size(&self) -> u64 {
        self.per_page_limit as u64
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_latest_videos_seconds as u64)
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.update_api_keys_expiration_minutes as u64 * 60)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs as u64)
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port.unwrap_or_default())
    }
}

fn clamp(name: &str, value: &mut i64, valid: impl Fn(i64) -> bool, default: i64) {
    if !valid(*value) {
        warn!(
            variable = name,
            value = *value,
            default,
            "Configuration value out of range, using default"
        );
        *value = default;
    }
}
