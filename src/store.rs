//! The shared store the worker fleet coordinates through.
//!
//! Every method is one logical operation that commits or rolls back before
//! returning. No transaction spans two protocol steps, and all mutual
//! exclusion lives in the store, never in process memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::*;

#[async_trait]
pub trait Store: Send + Sync {
    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    /// Insert a worker registration, or renew it if the id is already known.
    async fn register_worker(&self, worker: &Worker) -> Result<Worker>;

    /// Extend a live worker's lease. Returns false when the registration is
    /// gone or has already lapsed, in which case the worker must re-register.
    async fn refresh_worker(
        &self,
        id: WorkerId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Remove a worker registration. Returns false if it was already gone.
    async fn unregister_worker(&self, id: WorkerId) -> Result<bool>;

    async fn list_workers(&self) -> Result<Vec<Worker>>;

    /// Delete workers whose expiration is before `now`.
    async fn purge_expired_workers(&self, now: DateTime<Utc>) -> Result<u64>;

    // -----------------------------------------------------------------------
    // Seeking attempts
    // -----------------------------------------------------------------------

    /// Record that a live worker started looking for work. Returns false if
    /// the worker is not registered with an unexpired lease.
    async fn start_seeking(
        &self,
        worker_id: WorkerId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn stop_seeking(&self, worker_id: WorkerId) -> Result<()>;

    async fn list_seekers(&self) -> Result<Vec<SeekingAttempt>>;

    /// Delete seeking attempts that outlived the seeking lifetime.
    async fn purge_expired_seekers(&self, now: DateTime<Utc>) -> Result<u64>;

    // -----------------------------------------------------------------------
    // Work items and claims
    // -----------------------------------------------------------------------

    async fn enqueue_work_item(&self, new: NewWorkItem, now: DateTime<Utc>) -> Result<WorkItem>;

    async fn get_work_item(&self, id: WorkId) -> Result<WorkItem>;

    /// The oldest unprocessed item with no unexpired claim.
    async fn next_unclaimed_item(&self, now: DateTime<Utc>) -> Result<Option<WorkItem>>;

    /// Atomically claim an item. One indivisible store operation checks that
    /// the worker is live, the item is unprocessed and no unexpired claim
    /// exists, then creates the claim or takes over an expired one.
    async fn claim_work_item(
        &self,
        worker_id: WorkerId,
        work_id: WorkId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ClaimOutcome>;

    async fn get_claim(&self, work_id: WorkId) -> Result<Option<WorkClaim>>;

    /// Delete claims whose expiration is before `now`.
    async fn purge_expired_claims(&self, now: DateTime<Utc>) -> Result<u64>;

    // -----------------------------------------------------------------------
    // Ledger
    // -----------------------------------------------------------------------

    /// Apply a claimed item to its user's ledger in a single transaction:
    /// resolve the username, lock or create the current total, apply the
    /// operation, persist it, mark the item processed and drop this claim.
    /// Any error leaves every table as it was.
    async fn apply_work_item(
        &self,
        claim: &WorkClaim,
        item: &WorkItem,
        now: DateTime<Utc>,
        new_user_interval_days: i64,
    ) -> Result<LedgerUpdate>;

    /// The ledger row in effect for `user_id` at `now`.
    async fn current_total(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<CpuHours>>;

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Look up a user by username, creating it if missing.
    async fn ensure_user(&self, username: &str) -> Result<User>;

    async fn user_by_name(&self, username: &str) -> Result<User>;
}
