//! Periodic purges of expired workers, seeking attempts and claims.
//!
//! Every worker runs all three sweeps. Sweeps are idempotent, so concurrent
//! runs on several workers only race to delete the same rows.

use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::store::Store;
use crate::telemetry::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    Workers,
    Seekers,
    Claims,
}

impl Sweep {
    pub const ALL: [Sweep; 3] = [Sweep::Workers, Sweep::Seekers, Sweep::Claims];

    pub fn name(self) -> &'static str {
        match self {
            Sweep::Workers => "workers",
            Sweep::Seekers => "seekers",
            Sweep::Claims => "claims",
        }
    }

    /// How often this sweep runs.
    pub fn interval(self, config: &WorkerConfig) -> Duration {
        match self {
            Sweep::Workers => config.worker_purge_interval,
            Sweep::Seekers => config.work_seeker_purge_interval,
            Sweep::Claims => config.work_claim_purge_interval,
        }
    }
}

/// Run one sweep against `store`, returning the number of rows removed.
pub async fn run_sweep(store: &dyn Store, sweep: Sweep, now: DateTime<Utc>) -> Result<u64> {
    let removed = match sweep {
        Sweep::Workers => store.purge_expired_workers(now).await?,
        Sweep::Seekers => store.purge_expired_seekers(now).await?,
        Sweep::Claims => store.purge_expired_claims(now).await?,
    };

    if removed > 0 {
        info!(sweep = sweep.name(), removed, "purged expired rows");
    } else {
        debug!(sweep = sweep.name(), "nothing to purge");
    }
    metrics::purged().add(removed, &[KeyValue::new("sweep", sweep.name())]);

    Ok(removed)
}
