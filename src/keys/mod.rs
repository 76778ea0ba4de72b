//! API key lifecycle
//!
//! Keys move between two states:
//! - valid: eligible to be picked by the ingestion job
//! - exhausted: demoted after a quota error, reconsidered by the rotator
//!   once the cooldown has passed and a probe succeeds again

pub mod rotator;
pub mod validator;

use std::time::Duration;

use tracing::{info, warn};

use crate::error::{with_timeout, GatewayError, Result};
use crate::metrics::{self, TRANSITION_ADDED};
use crate::schemas::mask_key;
use crate::storage::KeyStore;

pub use rotator::{KeyRotator, RotationReport};
pub use validator::KeyValidator;

/// Probes `key` and stores it as valid if the probe passes.
///
/// Fails with [`GatewayError::Unauthorized`] when the probe fails (nothing is
/// stored), or with the storage error when the insert fails.
pub async fn register_key(
    keys: &dyn KeyStore,
    validator: &KeyValidator,
    key: &str,
    call_timeout: Duration,
) -> Result<()> {
    let valid = tokio::time::timeout(call_timeout, validator.validate(key))
        .await
        .unwrap_or(false);
    if !valid {
        warn!(key = %mask_key(key), "Rejected API key that failed validation");
        return Err(GatewayError::Unauthorized);
    }

    with_timeout("insert key", call_timeout, keys.insert_key(key)).await?;

    metrics::record_key_transition(TRANSITION_ADDED);
    info!(key = %mask_key(key), "API key added");
    Ok(())
}
