//! In-memory storage backend.
//!
//! Same semantics as the Postgres store, for tests and single-process
//! development. Every operation runs against a snapshot of all tables under
//! one lock and the snapshot replaces the live tables only when the operation
//! returns `Ok`, so a failed ledger update leaves nothing behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::Store;

/// Stored work item. `claimed_by` is derived from the claims table on read.
#[derive(Debug, Clone)]
struct WorkItemRecord {
    seq: u64,
    id: WorkId,
    user_id: Uuid,
    value: rust_decimal::Decimal,
    operation: UsageOperation,
    created_at: DateTime<Utc>,
    processed: bool,
    processed_by: Option<WorkerId>,
    processed_at: Option<DateTime<Utc>>,
}

impl WorkItemRecord {
    fn to_work_item(&self, claimed_by: Option<WorkerId>) -> WorkItem {
        WorkItem {
            id: self.id,
            user_id: self.user_id,
            value: self.value,
            operation: self.operation,
            created_at: self.created_at,
            claimed_by,
            processed: self.processed,
            processed_by: self.processed_by,
            processed_at: self.processed_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    workers: HashMap<WorkerId, Worker>,
    seekers: HashMap<WorkerId, SeekingAttempt>,
    items: Vec<WorkItemRecord>,
    next_seq: u64,
    /// Keyed by work item: at most one claim row per item.
    claims: HashMap<WorkId, WorkClaim>,
    totals: Vec<CpuHours>,
}

impl Tables {
    fn item(&self, id: WorkId) -> Result<&WorkItemRecord> {
        self.items
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))
    }

    fn worker_is_alive(&self, id: WorkerId, now: DateTime<Utc>) -> bool {
        self.workers.get(&id).is_some_and(|w| w.is_alive(now))
    }

    fn current_total_index(&self, user_id: Uuid, now: DateTime<Utc>) -> Option<usize> {
        self.totals
            .iter()
            .enumerate()
            .filter(|(_, t)| t.user_id == user_id && t.is_current(now))
            .max_by_key(|(_, t)| t.effective_start)
            .map(|(idx, _)| idx)
    }
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with a known id.
    pub fn add_user(&self, id: Uuid, username: impl Into<String>) -> Result<User> {
        let user = User {
            id,
            username: username.into(),
        };
        self.with_transaction(|t| {
            t.users.insert(id, user.clone());
            Ok(user)
        })
    }

    /// All ledger rows for a user, oldest first.
    pub fn totals_for_user(&self, user_id: Uuid) -> Result<Vec<CpuHours>> {
        self.read(|t| {
            let mut rows: Vec<CpuHours> = t
                .totals
                .iter()
                .filter(|row| row.user_id == user_id)
                .cloned()
                .collect();
            rows.sort_by_key(|row| row.effective_start);
            Ok(rows)
        })
    }

    /// Execute a closure within a transaction.
    ///
    /// The closure mutates a copy of the tables. The copy is committed if the
    /// closure returns Ok and discarded on Err.
    fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tables) -> Result<T>,
    {
        let mut guard = self
            .tables
            .lock()
            .map_err(|_| Error::Other("memory store lock poisoned".to_string()))?;
        let mut tx = guard.clone();
        let result = f(&mut tx)?;
        *guard = tx;
        Ok(result)
    }

    fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tables) -> Result<T>,
    {
        let guard = self
            .tables
            .lock()
            .map_err(|_| Error::Other("memory store lock poisoned".to_string()))?;
        f(&guard)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn register_worker(&self, worker: &Worker) -> Result<Worker> {
        self.with_transaction(|t| {
            t.workers.insert(worker.id, worker.clone());
            Ok(worker.clone())
        })
    }

    async fn refresh_worker(
        &self,
        id: WorkerId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_transaction(|t| match t.workers.get_mut(&id) {
            Some(worker) if worker.is_alive(now) => {
                worker.expires_at = expires_at;
                worker.last_refreshed_at = now;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn unregister_worker(&self, id: WorkerId) -> Result<bool> {
        self.with_transaction(|t| {
            t.seekers.remove(&id);
            Ok(t.workers.remove(&id).is_some())
        })
    }

    async fn list_workers(&self) -> Result<Vec<Worker>> {
        self.read(|t| {
            let mut workers: Vec<Worker> = t.workers.values().cloned().collect();
            workers.sort_by_key(|w| w.registered_at);
            Ok(workers)
        })
    }

    async fn purge_expired_workers(&self, now: DateTime<Utc>) -> Result<u64> {
        self.with_transaction(|t| {
            let before = t.workers.len();
            t.workers.retain(|_, w| w.is_alive(now));
            let workers = &t.workers;
            t.seekers.retain(|id, _| workers.contains_key(id));
            Ok((before - t.workers.len()) as u64)
        })
    }

    async fn start_seeking(
        &self,
        worker_id: WorkerId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_transaction(|t| {
            if !t.worker_is_alive(worker_id, now) {
                return Ok(false);
            }
            t.seekers.insert(
                worker_id,
                SeekingAttempt {
                    worker_id,
                    started_at: now,
                    expires_at,
                },
            );
            Ok(true)
        })
    }

    async fn stop_seeking(&self, worker_id: WorkerId) -> Result<()> {
        self.with_transaction(|t| {
            t.seekers.remove(&worker_id);
            Ok(())
        })
    }

    async fn list_seekers(&self) -> Result<Vec<SeekingAttempt>> {
        self.read(|t| Ok(t.seekers.values().cloned().collect()))
    }

    async fn purge_expired_seekers(&self, now: DateTime<Utc>) -> Result<u64> {
        self.with_transaction(|t| {
            let before = t.seekers.len();
            t.seekers.retain(|_, s| s.expires_at >= now);
            Ok((before - t.seekers.len()) as u64)
        })
    }

    async fn enqueue_work_item(&self, new: NewWorkItem, now: DateTime<Utc>) -> Result<WorkItem> {
        self.with_transaction(|t| {
            if !t.users.contains_key(&new.user_id) {
                return Err(Error::NotFound(format!("user {}", new.user_id)));
            }
            let record = WorkItemRecord {
                seq: t.next_seq,
                id: WorkId::new(),
                user_id: new.user_id,
                value: new.value,
                operation: new.operation,
                created_at: now,
                processed: false,
                processed_by: None,
                processed_at: None,
            };
            t.next_seq += 1;
            let item = record.to_work_item(None);
            t.items.push(record);
            Ok(item)
        })
    }

    async fn get_work_item(&self, id: WorkId) -> Result<WorkItem> {
        self.read(|t| {
            let claimed_by = t.claims.get(&id).map(|c| c.worker_id);
            Ok(t.item(id)?.to_work_item(claimed_by))
        })
    }

    async fn next_unclaimed_item(&self, now: DateTime<Utc>) -> Result<Option<WorkItem>> {
        self.read(|t| {
            let next = t
                .items
                .iter()
                .filter(|i| !i.processed)
                .filter(|i| t.claims.get(&i.id).is_none_or(|c| c.is_expired(now)))
                .min_by_key(|i| (i.created_at, i.seq));
            Ok(next.map(|i| i.to_work_item(None)))
        })
    }

    async fn claim_work_item(
        &self,
        worker_id: WorkerId,
        work_id: WorkId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        self.with_transaction(|t| {
            if !t.worker_is_alive(worker_id, now) || t.item(work_id)?.processed {
                return Ok(ClaimOutcome::Conflict);
            }
            if t.claims.get(&work_id).is_some_and(|c| !c.is_expired(now)) {
                return Ok(ClaimOutcome::Conflict);
            }
            let claim = WorkClaim {
                id: ClaimId::new(),
                worker_id,
                work_item_id: work_id,
                claimed_at: now,
                expires_at,
            };
            t.claims.insert(work_id, claim.clone());
            Ok(ClaimOutcome::Claimed(claim))
        })
    }

    async fn get_claim(&self, work_id: WorkId) -> Result<Option<WorkClaim>> {
        self.read(|t| Ok(t.claims.get(&work_id).cloned()))
    }

    async fn purge_expired_claims(&self, now: DateTime<Utc>) -> Result<u64> {
        self.with_transaction(|t| {
            let before = t.claims.len();
            t.claims.retain(|_, c| !c.is_expired(now));
            Ok((before - t.claims.len()) as u64)
        })
    }

    async fn apply_work_item(
        &self,
        claim: &WorkClaim,
        item: &WorkItem,
        now: DateTime<Utc>,
        new_user_interval_days: i64,
    ) -> Result<LedgerUpdate> {
        self.with_transaction(|t| {
            let username = t
                .users
                .get(&item.user_id)
                .map(|u| u.username.clone())
                .ok_or_else(|| Error::NotFound(format!("user {}", item.user_id)))?;

            let (idx, created_total) = match t.current_total_index(item.user_id, now) {
                Some(idx) => (idx, false),
                None => {
                    t.totals.push(CpuHours::new_for_user(
                        item.user_id,
                        now,
                        new_user_interval_days,
                    ));
                    (t.totals.len() - 1, true)
                }
            };

            let row = &mut t.totals[idx];
            let previous_total = row.total;
            row.total = item.operation.apply(previous_total, item.value)?;
            row.last_modified = now;
            let row = row.clone();

            let record = t
                .items
                .iter_mut()
                .find(|i| i.id == item.id)
                .ok_or_else(|| Error::NotFound(format!("work item {}", item.id)))?;
            record.processed = true;
            record.processed_by = Some(claim.worker_id);
            record.processed_at = Some(now);
            if t.claims.get(&item.id).is_some_and(|c| c.id == claim.id) {
                t.claims.remove(&item.id);
            }

            Ok(LedgerUpdate {
                work_id: item.id,
                user_id: item.user_id,
                username,
                operation: item.operation,
                value: item.value,
                previous_total,
                new_total: row.total,
                effective_start: row.effective_start,
                effective_end: row.effective_end,
                created_total,
            })
        })
    }

    async fn current_total(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<CpuHours>> {
        self.read(|t| Ok(t.current_total_index(user_id, now).map(|idx| t.totals[idx].clone())))
    }

    async fn ensure_user(&self, username: &str) -> Result<User> {
        self.with_transaction(|t| {
            if let Some(user) = t.users.values().find(|u| u.username == username) {
                return Ok(user.clone());
            }
            let user = User {
                id: Uuid::new_v4(),
                username: username.to_string(),
            };
            t.users.insert(user.id, user.clone());
            Ok(user)
        })
    }

    async fn user_by_name(&self, username: &str) -> Result<User> {
        self.read(|t| {
            t.users
                .values()
                .find(|u| u.username == username)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("user {username}")))
        })
    }
}
