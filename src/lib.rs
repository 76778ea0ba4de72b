//! YouTube ingestion and search gateway
//!
//! Polls the YouTube Data API for new videos matching a fixed query, stores
//! them, and serves paginated browse and ranked search over the catalog.
//! A pool of API keys is rotated as their quota runs out.
//!
//! Features:
//! - Conditional fetches with change tokens (`If-None-Match`)
//! - Insert-if-absent storage keyed by the upstream video id
//! - Key demotion on quota errors and cooldown-based re-validation
//! - Semaphore-limited, rate-limited upstream client with jittered retries
//! - Postgres or in-memory storage
//! - Prometheus metrics and structured logging

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod harvester;
pub mod http_client;
pub mod keys;
pub mod metrics;
pub mod query;
pub mod relevance;
pub mod scheduler;
pub mod schemas;
pub mod server;
pub mod sources;
pub mod storage;

pub use error::{GatewayError, Result};
