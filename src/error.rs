//! Error types for the gateway

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Bad or missing request parameters
    #[error("{0}")]
    InvalidInput(String),

    /// The upstream API rejected the key itself
    #[error("API key rejected by upstream")]
    Unauthorized,

    /// The key has used up its call budget for the current period
    #[error("Upstream quota exceeded")]
    QuotaExceeded,

    #[error("Upstream error: {status} - {message}")]
    UpstreamError {
        status: u16,
        message: String,
    },

    #[error("No valid API key available")]
    NoKeyAvailable,

    #[error("Timed out after {secs}s: {operation}")]
    Timeout {
        operation: &'static str,
        secs: u64,
    },

    #[error("Batch insert incomplete: {inserted} inserted, {failed} failed")]
    PartialBatch {
        inserted: u64,
        failed: u64,
    },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

impl GatewayError {
    /// True for failures the next tick may recover from on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::HttpError(_)
                | GatewayError::UpstreamError { .. }
                | GatewayError::Timeout { .. }
                | GatewayError::ConnectionLost(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Awaits `fut`, failing with [`GatewayError::Timeout`] once `limit` elapses.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    limit: std::time::Duration,
    fut: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            operation,
            secs: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout("sleep", Duration::from_secs(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(GatewayError::Timeout { operation: "sleep", secs: 10 })
        ));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout("noop", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::UpstreamError { status: 500, message: String::new() }.is_transient());
        assert!(!GatewayError::QuotaExceeded.is_transient());
        assert!(!GatewayError::NoKeyAvailable.is_transient());
    }
}
