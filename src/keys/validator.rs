//! Probes whether an API key is currently usable

use std::sync::Arc;

use tracing::debug;

use crate::schemas::mask_key;
use crate::sources::VideoSource;

/// Answers "can this key make a read call right now?"
///
/// Every failure mode (network, rejected key, quota, malformed response)
/// collapses to `false`. No timeout is applied here; callers bound the call.
#[derive(Clone)]
pub struct KeyValidator {
    source: Arc<dyn VideoSource>,
}

impl KeyValidator {
    pub fn new(source: Arc<dyn VideoSource>) -> Self {
        Self { source }
    }

    pub async fn validate(&self, key: &str) -> bool {
        match self.source.probe(key).await {
            Ok(()) => {
                debug!(key = %mask_key(key), source = %self.source.id(), "Key passed validation");
                true
            }
            Err(e) => {
                debug!(key = %mask_key(key), error = %e, "Key failed validation");
                false
            }
        }
    }
}
