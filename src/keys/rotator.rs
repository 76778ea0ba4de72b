//! Periodic re-validation of exhausted keys
//!
//! Each pass walks the exhausted keys lazily. A key is promoted back to
//! valid only when its cooldown has fully elapsed and a fresh probe
//! succeeds; anything else is left for the next pass.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::KeyValidator;
use crate::error::with_timeout;
use crate::metrics::{self, TRANSITION_REVALIDATED};
use crate::scheduler::PeriodicJob;
use crate::storage::KeyStore;

/// Summary of one rotation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    /// Exhausted keys read from the store
    pub examined: u32,
    /// Keys promoted back to valid
    pub revalidated: u32,
    /// Keys still inside the cooldown window
    pub cooling_down: u32,
    /// Keys past cooldown whose probe failed
    pub still_failing: u32,
    /// Store reads or writes that failed or timed out
    pub errors: u32,
}

pub struct KeyRotator {
    keys: Arc<dyn KeyStore>,
    validator: KeyValidator,
    call_timeout: Duration,
}

impl KeyRotator {
    pub fn new(keys: Arc<dyn KeyStore>, validator: KeyValidator, call_timeout: Duration) -> Self {
        Self {
            keys,
            validator,
            call_timeout,
        }
    }

    pub async fn rotate(&self) -> RotationReport {
        self.rotate_at(Utc::now()).await
    }

    /// Runs one pass treating `now` as the current time.
    pub async fn rotate_at(&self, now: DateTime<Utc>) -> RotationReport {
        let mut report = RotationReport::default();
        let mut exhausted = self.keys.exhausted_keys();

        loop {
            let next = match tokio::time::timeout(self.call_timeout, exhausted.next()).await {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(_) => {
                    warn!("Timed out reading exhausted keys, ending pass early");
                    report.errors += 1;
                    break;
                }
            };

            let record = match next {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "Failed to read exhausted key");
                    report.errors += 1;
                    continue;
                }
            };
            report.examined += 1;

            if !record.cooldown_elapsed(now) {
                debug!(key = %record.masked(), since = %record.last_updated, "Key still cooling down");
                report.cooling_down += 1;
                continue;
            }

            let valid = tokio::time::timeout(self.call_timeout, self.validator.validate(&record.key))
                .await
                .unwrap_or(false);
            if !valid {
                debug!(key = %record.masked(), "Key still failing validation");
                report.still_failing += 1;
                continue;
            }

            match with_timeout("mark key valid", self.call_timeout, self.keys.mark_valid(&record.key)).await {
                Ok(()) => {
                    info!(key = %record.masked(), "Key revalidated");
                    metrics::record_key_transition(TRANSITION_REVALIDATED);
                    report.revalidated += 1;
                }
                Err(e) => {
                    warn!(key = %record.masked(), error = %e, "Failed to mark key valid");
                    report.errors += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            revalidated = report.revalidated,
            cooling_down = report.cooling_down,
            still_failing = report.still_failing,
            errors = report.errors,
            "Key rotation finished"
        );
        report
    }
}

#[async_trait]
impl PeriodicJob for KeyRotator {
    type Outcome = RotationReport;

    fn name(&self) -> &'static str {
        "key-rotation"
    }

    async fn run_tick(&mut self) -> RotationReport {
        self.rotate().await
    }
}
