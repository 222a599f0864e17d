//! Worker lifecycle: register, run the lease, work and housekeeping loops
//! concurrently, unregister on shutdown.
//!
//! Each loop is its own task so a slow ledger transaction never delays a
//! lease refresh.

pub mod claim;
pub mod housekeeping;
pub mod lease;

pub use claim::SeekOutcome;
pub use housekeeping::{Sweep, run_sweep};
pub use lease::LeaseStatus;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use crate::clock::Clock;
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::ledger::LedgerUpdater;
use crate::model::{Worker, WorkState, WorkerId};
use crate::notify::QuotaNotifier;
use crate::store::Store;
use crate::telemetry::work::{record_new_total, record_state_transition, start_claim_span};

/// A registered worker process.
///
/// Cloning is cheap; clones share the store, clock and shutdown signal.
#[derive(Clone)]
pub struct LedgerWorker {
    id: WorkerId,
    name: String,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: Arc<WorkerConfig>,
    updater: LedgerUpdater,
    shutdown: Arc<watch::Sender<bool>>,
}

impl LedgerWorker {
    /// Validate `config` and register a new worker with a fresh id.
    pub async fn register(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn QuotaNotifier>,
        config: WorkerConfig,
    ) -> Result<Self> {
        for warning in config.validate()? {
            warn!(setting = warning.setting, "{}", warning.message);
        }

        let id = WorkerId::new();
        let name = config.name.clone().unwrap_or_else(|| id.to_string());
        let updater = LedgerUpdater::new(
            Arc::clone(&store),
            notifier,
            Arc::clone(&clock),
            config.new_user_total_interval,
        );
        let (shutdown, _) = watch::channel(false);

        let worker = Self {
            id,
            name,
            store,
            clock,
            config: Arc::new(config),
            updater,
            shutdown: Arc::new(shutdown),
        };

        let registration = worker
            .store
            .register_worker(&worker.registration(worker.clock.now()))
            .await?;
        info!(
            worker_id = %worker.id,
            name = %worker.name,
            expires_at = %registration.expires_at,
            "worker registered"
        );
        Ok(worker)
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal every loop to stop. [`run`](Self::run) returns once they have.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// The registration row for this worker with a lease starting at `now`.
    fn registration(&self, now: DateTime<Utc>) -> Worker {
        Worker {
            id: self.id,
            name: self.name.clone(),
            registered_at: now,
            expires_at: now + self.config.expiration(),
            last_refreshed_at: now,
        }
    }

    /// Run all loops until [`shutdown`](Self::shutdown), then unregister.
    pub async fn run(&self) -> Result<()> {
        let mut tasks = JoinSet::new();

        let worker = self.clone();
        tasks.spawn(async move { worker.refresh_loop().await });
        let worker = self.clone();
        tasks.spawn(async move { worker.work_loop().await });
        for sweep in Sweep::ALL {
            let worker = self.clone();
            tasks.spawn(async move { worker.sweep_loop(sweep).await });
        }

        info!(worker_id = %self.id, "worker started");

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(worker_id = %self.id, "worker task failed: {e}");
            }
        }

        if self.store.unregister_worker(self.id).await? {
            info!(worker_id = %self.id, "worker unregistered");
        }
        Ok(())
    }

    /// One seek-and-process cycle. Returns true if an item was claimed,
    /// whether or not its ledger update committed.
    pub async fn process_next(&self) -> Result<bool> {
        let (claim, item) = match self.seek().await? {
            SeekOutcome::Claimed { claim, item } => (claim, item),
            _ => return Ok(false),
        };

        let span = start_claim_span(self.id, item.id, &item.user_id);
        record_state_transition(&span, WorkState::Pending, WorkState::Claimed);

        async {
            // Failures are logged by the updater; the claim lapses and the
            // item is retried.
            if let Ok(update) = self.updater.apply(&claim, &item).await {
                record_new_total(&span, &update.new_total);
                record_state_transition(&span, WorkState::Claimed, WorkState::Processed);
            }
        }
        .instrument(span.clone())
        .await;

        Ok(true)
    }

    async fn work_loop(&self) {
        let mut shutdown = self.shutdown.subscribe();
        while !self.stopping() {
            while !self.stopping() {
                match self.process_next().await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        error!(worker_id = %self.id, "work cycle failed: {e}");
                        break;
                    }
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        debug!(worker_id = %self.id, "work loop stopped");
    }

    async fn refresh_loop(&self) {
        self.every(self.config.refresh_interval, move || async move {
            // Errors are logged and counted inside refresh_lease; the next
            // tick retries.
            let _ = self.refresh_lease().await;
        })
        .await;
        debug!(worker_id = %self.id, "lease loop stopped");
    }

    async fn sweep_loop(&self, sweep: Sweep) {
        self.every(sweep.interval(&self.config), move || async move {
            if let Err(e) = run_sweep(self.store.as_ref(), sweep, self.clock.now()).await {
                error!(sweep = sweep.name(), "housekeeping sweep failed: {e}");
            }
        })
        .await;
        debug!(sweep = sweep.name(), "housekeeping loop stopped");
    }

    /// Call `tick` every `period` until shutdown. The first call happens one
    /// full period after start.
    async fn every<F, Fut>(&self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.stopping() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => tick().await,
            }
        }
    }
}
