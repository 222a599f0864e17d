//! Database connection pool, migrations, and health check.
//!
//! The Postgres pool is the only resource shared between a worker's tasks.
//! Each submodule adds the queries for one table group; the [`Store`]
//! implementation below routes the protocol onto them.

pub mod ledger;
pub mod work;
pub mod workers;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::error::Result;
use crate::model::*;
use crate::store::Store;

/// Database handle. Owns the connection pool shared across all modules.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, 10).await
    }

    /// Connect with an explicit pool size.
    pub async fn connect_with(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(std::time::Duration::from_secs(60))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for Db {
    async fn register_worker(&self, worker: &Worker) -> Result<Worker> {
        self.upsert_worker(worker).await
    }

    async fn refresh_worker(
        &self,
        id: WorkerId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.extend_worker_lease(id, now, expires_at).await
    }

    async fn unregister_worker(&self, id: WorkerId) -> Result<bool> {
        self.delete_worker(id).await
    }

    async fn list_workers(&self) -> Result<Vec<Worker>> {
        self.all_workers().await
    }

    async fn purge_expired_workers(&self, now: DateTime<Utc>) -> Result<u64> {
        self.delete_expired_workers(now).await
    }

    async fn start_seeking(
        &self,
        worker_id: WorkerId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.insert_seeker(worker_id, now, expires_at).await
    }

    async fn stop_seeking(&self, worker_id: WorkerId) -> Result<()> {
        self.delete_seeker(worker_id).await
    }

    async fn list_seekers(&self) -> Result<Vec<SeekingAttempt>> {
        self.all_seekers().await
    }

    async fn purge_expired_seekers(&self, now: DateTime<Utc>) -> Result<u64> {
        self.delete_expired_seekers(now).await
    }

    async fn enqueue_work_item(&self, new: NewWorkItem, now: DateTime<Utc>) -> Result<WorkItem> {
        self.insert_work_item(new, now).await
    }

    async fn get_work_item(&self, id: WorkId) -> Result<WorkItem> {
        self.work_item(id).await
    }

    async fn next_unclaimed_item(&self, now: DateTime<Utc>) -> Result<Option<WorkItem>> {
        self.oldest_unclaimed_item(now).await
    }

    async fn claim_work_item(
        &self,
        worker_id: WorkerId,
        work_id: WorkId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        self.insert_claim(worker_id, work_id, now, expires_at).await
    }

    async fn get_claim(&self, work_id: WorkId) -> Result<Option<WorkClaim>> {
        self.claim_for_item(work_id).await
    }

    async fn purge_expired_claims(&self, now: DateTime<Utc>) -> Result<u64> {
        self.delete_expired_claims(now).await
    }

    async fn apply_work_item(
        &self,
        claim: &WorkClaim,
        item: &WorkItem,
        now: DateTime<Utc>,
        new_user_interval_days: i64,
    ) -> Result<LedgerUpdate> {
        self.update_cpu_hours_total(claim, item, now, new_user_interval_days)
            .await
    }

    async fn current_total(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<CpuHours>> {
        self.current_cpu_hours(user_id, now).await
    }

    async fn ensure_user(&self, username: &str) -> Result<User> {
        self.upsert_user(username).await
    }

    async fn user_by_name(&self, username: &str) -> Result<User> {
        self.user_named(username).await
    }
}
