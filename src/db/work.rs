//! Work item queue and the atomic claim protocol.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;

const WORK_ITEM_COLUMNS: &str = "i.id, i.user_id, i.value, i.operation, i.created_at, \
     i.processed, i.processed_by, i.processed_at";

impl super::Db {
    /// Append a work item to the queue.
    pub async fn insert_work_item(&self, new: NewWorkItem, now: DateTime<Utc>) -> Result<WorkItem> {
        let id = WorkId::new();
        sqlx::query(
            "INSERT INTO cpu_usage_work_items (id, user_id, value, operation, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id.0)
        .bind(new.user_id)
        .bind(new.value)
        .bind(new.operation.to_string())
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Error::NotFound(format!("user {}", new.user_id))
            }
            other => Error::from(other),
        })?;

        Ok(WorkItem {
            id,
            user_id: new.user_id,
            value: new.value,
            operation: new.operation,
            created_at: now,
            claimed_by: None,
            processed: false,
            processed_by: None,
            processed_at: None,
        })
    }

    /// Get a work item by ID. `claimed_by` reflects any claim row, live or not.
    pub async fn work_item(&self, id: WorkId) -> Result<WorkItem> {
        let row: Option<WorkItemRow> = sqlx::query_as(&format!(
            "SELECT {WORK_ITEM_COLUMNS}, c.worker_id AS claimed_by
             FROM cpu_usage_work_items i
             LEFT JOIN work_claims c ON c.work_item_id = i.id
             WHERE i.id = $1"
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("work item {id}")))?
            .try_into_work_item()
    }

    /// Oldest unprocessed item without an unexpired claim.
    pub async fn oldest_unclaimed_item(&self, now: DateTime<Utc>) -> Result<Option<WorkItem>> {
        let row: Option<WorkItemRow> = sqlx::query_as(&format!(
            "SELECT {WORK_ITEM_COLUMNS}, NULL::uuid AS claimed_by
             FROM cpu_usage_work_items i
             LEFT JOIN work_claims c ON c.work_item_id = i.id
             WHERE NOT i.processed
             AND (c.id IS NULL OR c.expires_at < $1)
             ORDER BY i.created_at ASC, i.id ASC
             LIMIT 1"
        ))
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        row.map(WorkItemRow::try_into_work_item).transpose()
    }

    /// Claim a work item in one statement.
    ///
    /// The unique index on `work_claims.work_item_id` serializes racing
    /// claimers. A fresh insert wins if no claim row exists; an existing row
    /// is taken over only if it has expired. The SELECT supplies no row when
    /// the worker's lease has lapsed or the item is already processed.
    pub async fn insert_claim(
        &self,
        worker_id: WorkerId,
        work_id: WorkId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let row: Option<ClaimRow> = sqlx::query_as(
            "INSERT INTO work_claims (id, worker_id, work_item_id, claimed_at, expires_at)
             SELECT $1, w.id, i.id, $4, $5
             FROM workers w, cpu_usage_work_items i
             WHERE w.id = $2 AND w.expires_at >= $4
             AND i.id = $3 AND NOT i.processed
             ON CONFLICT (work_item_id) DO UPDATE
             SET id = EXCLUDED.id,
                 worker_id = EXCLUDED.worker_id,
                 claimed_at = EXCLUDED.claimed_at,
                 expires_at = EXCLUDED.expires_at
             WHERE work_claims.expires_at < EXCLUDED.claimed_at
             RETURNING id, worker_id, work_item_id, claimed_at, expires_at",
        )
        .bind(ClaimId::new().0)
        .bind(worker_id.0)
        .bind(work_id.0)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(self.pool())
        .await?;

        Ok(match row {
            Some(row) => ClaimOutcome::Claimed(row.into()),
            None => ClaimOutcome::Conflict,
        })
    }

    pub async fn claim_for_item(&self, work_id: WorkId) -> Result<Option<WorkClaim>> {
        let row: Option<ClaimRow> = sqlx::query_as(
            "SELECT id, worker_id, work_item_id, claimed_at, expires_at
             FROM work_claims WHERE work_item_id = $1",
        )
        .bind(work_id.0)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(WorkClaim::from))
    }

    pub async fn delete_expired_claims(&self, now: DateTime<Utc>) -> Result<u64> {
        let rows_affected = sqlx::query("DELETE FROM work_claims WHERE expires_at < $1")
            .bind(now)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(rows_affected)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: Uuid,
    user_id: Uuid,
    value: Decimal,
    operation: String,
    created_at: DateTime<Utc>,
    processed: bool,
    processed_by: Option<Uuid>,
    processed_at: Option<DateTime<Utc>>,
    claimed_by: Option<Uuid>,
}

impl WorkItemRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            id: WorkId(self.id),
            user_id: self.user_id,
            value: self.value,
            operation: self.operation.parse()?,
            created_at: self.created_at,
            claimed_by: self.claimed_by.map(WorkerId),
            processed: self.processed,
            processed_by: self.processed_by.map(WorkerId),
            processed_at: self.processed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ClaimRow {
    id: Uuid,
    worker_id: Uuid,
    work_item_id: Uuid,
    claimed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<ClaimRow> for WorkClaim {
    fn from(row: ClaimRow) -> Self {
        Self {
            id: ClaimId(row.id),
            worker_id: WorkerId(row.worker_id),
            work_item_id: WorkId(row.work_item_id),
            claimed_at: row.claimed_at,
            expires_at: row.expires_at,
        }
    }
}
