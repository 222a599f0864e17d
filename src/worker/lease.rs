//! Worker lease refresh.

use opentelemetry::KeyValue;
use tracing::{debug, error, warn};

use super::LedgerWorker;
use crate::error::Result;
use crate::telemetry::metrics;

/// What a refresh did to the worker's registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    /// The existing lease was extended.
    Refreshed,
    /// The lease had lapsed or been purged; the worker registered again
    /// under the same id.
    Reregistered,
}

impl LedgerWorker {
    /// Extend this worker's lease by the configured lifetime, re-registering
    /// if the store no longer holds a live registration.
    pub async fn refresh_lease(&self) -> Result<LeaseStatus> {
        let now = self.clock.now();
        let expires_at = now + self.config.expiration();

        let result = match self.store.refresh_worker(self.id, now, expires_at).await {
            Ok(true) => {
                debug!(worker_id = %self.id, %expires_at, "worker lease refreshed");
                Ok(LeaseStatus::Refreshed)
            }
            Ok(false) => {
                warn!(worker_id = %self.id, "worker lease lapsed, registering again");
                self.store
                    .register_worker(&self.registration(now))
                    .await
                    .map(|_| LeaseStatus::Reregistered)
            }
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(LeaseStatus::Refreshed) => "ok",
            Ok(LeaseStatus::Reregistered) => "reregistered",
            Err(e) => {
                error!(worker_id = %self.id, "worker lease refresh failed: {e}");
                "error"
            }
        };
        metrics::lease_refreshes().add(1, &[KeyValue::new("result", outcome)]);

        result
    }
}
