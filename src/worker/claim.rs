//! Seeking and claiming work items.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{debug, warn};

use super::LedgerWorker;
use crate::error::Result;
use crate::model::{ClaimOutcome, WorkClaim, WorkId, WorkItem};
use crate::telemetry::metrics;

/// How a seeking attempt ended.
#[derive(Debug, Clone)]
pub enum SeekOutcome {
    Claimed { claim: WorkClaim, item: WorkItem },
    /// No unprocessed, unclaimed item was left.
    NoWork,
    /// The seeking lifetime ran out before a claim succeeded.
    TimedOut,
    /// The worker's own lease is not live; the next refresh registers it
    /// again.
    LeaseLapsed,
}

impl SeekOutcome {
    fn abandon_reason(&self) -> Option<&'static str> {
        match self {
            SeekOutcome::Claimed { .. } => None,
            SeekOutcome::NoWork => Some("empty"),
            SeekOutcome::TimedOut => Some("timeout"),
            SeekOutcome::LeaseLapsed => Some("lease_lapsed"),
        }
    }
}

impl LedgerWorker {
    /// Look for an item and claim it, bounded by the seeking lifetime.
    ///
    /// The seeking record is removed on every exit path, including errors.
    pub async fn seek(&self) -> Result<SeekOutcome> {
        let now = self.clock.now();
        let deadline = now + self.config.seeking_expiration();

        let outcome = if self.store.start_seeking(self.id, now, deadline).await? {
            let result = self.seek_until(deadline).await;
            if let Err(e) = self.store.stop_seeking(self.id).await {
                warn!(worker_id = %self.id, "failed to clear seeking record: {e}");
            }
            result?
        } else {
            warn!(worker_id = %self.id, "worker lease is not live, skipping seek");
            SeekOutcome::LeaseLapsed
        };

        if let Some(reason) = outcome.abandon_reason() {
            debug!(worker_id = %self.id, reason, "seeking ended without a claim");
            metrics::seeking_abandoned().add(1, &[KeyValue::new("reason", reason)]);
        }
        Ok(outcome)
    }

    async fn seek_until(&self, deadline: DateTime<Utc>) -> Result<SeekOutcome> {
        let mut last_conflict: Option<WorkId> = None;
        loop {
            let now = self.clock.now();
            if now >= deadline {
                return Ok(SeekOutcome::TimedOut);
            }

            let Some(item) = self.store.next_unclaimed_item(now).await? else {
                return Ok(SeekOutcome::NoWork);
            };

            match self.claim(&item).await? {
                ClaimOutcome::Claimed(claim) => return Ok(SeekOutcome::Claimed { claim, item }),
                ClaimOutcome::Conflict => {
                    // Another worker's claim hides the item from the next
                    // read. Seeing it again means the conflict is ours.
                    if last_conflict == Some(item.id) {
                        return Ok(SeekOutcome::LeaseLapsed);
                    }
                    last_conflict = Some(item.id);
                }
            }
        }
    }

    /// Attempt one atomic claim on `item`.
    pub async fn claim(&self, item: &WorkItem) -> Result<ClaimOutcome> {
        let now = self.clock.now();
        let expires_at = now + self.config.claim_expiration();
        let outcome = self
            .store
            .claim_work_item(self.id, item.id, now, expires_at)
            .await?;

        let result = match &outcome {
            ClaimOutcome::Claimed(claim) => {
                debug!(worker_id = %self.id, work_id = %item.id, expires_at = %claim.expires_at, "claimed work item");
                "claimed"
            }
            ClaimOutcome::Conflict => {
                debug!(worker_id = %self.id, work_id = %item.id, "work item claim conflict");
                "conflict"
            }
        };
        metrics::claim_attempts().add(1, &[KeyValue::new("result", result)]);

        Ok(outcome)
    }
}
