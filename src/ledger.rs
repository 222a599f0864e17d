//! Ledger updater: applies a claimed work item to its user's CPU-hours total.
//!
//! The store does the transactional part. This layer adds timing, metrics,
//! the span record and the post-commit quota notification.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::model::{LedgerUpdate, WorkClaim, WorkItem};
use crate::notify::QuotaNotifier;
use crate::store::Store;
use crate::telemetry::metrics;

#[derive(Clone)]
pub struct LedgerUpdater {
    store: Arc<dyn Store>,
    notifier: Arc<dyn QuotaNotifier>,
    clock: Arc<dyn Clock>,
    new_user_total_interval: i64,
}

impl LedgerUpdater {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn QuotaNotifier>,
        clock: Arc<dyn Clock>,
        new_user_total_interval: i64,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            new_user_total_interval,
        }
    }

    /// Apply `item` under `claim`.
    ///
    /// On error nothing was written: the claim stays in place and the item is
    /// retried by whichever worker claims it after the claim expires.
    pub async fn apply(&self, claim: &WorkClaim, item: &WorkItem) -> Result<LedgerUpdate> {
        let started = Instant::now();
        let result = self
            .store
            .apply_work_item(claim, item, self.clock.now(), self.new_user_total_interval)
            .await;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::operation_duration_ms()
            .record(elapsed_ms, &[KeyValue::new("operation", "ledger.update")]);

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::ledger_updates().add(
            1,
            &[
                KeyValue::new("operation", item.operation.to_string()),
                KeyValue::new("result", outcome),
            ],
        );

        match result {
            Ok(update) => {
                info!(
                    work_id = %update.work_id,
                    user = %update.username,
                    operation = %update.operation,
                    value = %update.value,
                    previous_total = %update.previous_total,
                    new_total = %update.new_total,
                    created_total = update.created_total,
                    elapsed_ms,
                    "ledger updated"
                );
                self.notify(&update).await;
                Ok(update)
            }
            Err(e) => {
                error!(work_id = %item.id, user_id = %item.user_id, "ledger update failed: {e}");
                Err(e)
            }
        }
    }

    async fn notify(&self, update: &LedgerUpdate) {
        let outcome = match self.notifier.notify(update).await {
            Ok(()) => "ok",
            Err(e) => {
                warn!(user = %update.username, work_id = %update.work_id, "quota notification failed: {e}");
                "error"
            }
        };
        metrics::notifications().add(1, &[KeyValue::new("result", outcome)]);
    }
}
