//! CPU-hour totals and the transactional ledger update.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;

const CPU_HOURS_COLUMNS: &str = "id, user_id, total, effective_start, effective_end, last_modified";

impl super::Db {
    /// Apply one claimed work item to its user's total.
    ///
    /// Runs as a single transaction. A transaction-scoped advisory lock on the
    /// user serializes updates to the same user, including the insert of a
    /// first-time user's row. Returning early on any error drops `tx`, which
    /// rolls back every statement issued so far.
    pub async fn update_cpu_hours_total(
        &self,
        claim: &WorkClaim,
        item: &WorkItem,
        now: DateTime<Utc>,
        new_user_interval_days: i64,
    ) -> Result<LedgerUpdate> {
        let mut tx = self.pool().begin().await?;

        let username: Option<(String,)> = sqlx::query_as("SELECT username FROM users WHERE id = $1")
            .bind(item.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        let (username,) = username.ok_or_else(|| Error::NotFound(format!("user {}", item.user_id)))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(item.user_id.to_string())
            .execute(&mut *tx)
            .await?;

        let current: Option<CpuHoursRow> = sqlx::query_as(&format!(
            "SELECT {CPU_HOURS_COLUMNS} FROM cpu_usage_totals
             WHERE user_id = $1 AND effective_start <= $2 AND effective_end > $2
             ORDER BY effective_start DESC
             LIMIT 1
             FOR UPDATE"
        ))
        .bind(item.user_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let (mut hours, created_total) = match current {
            Some(row) => (CpuHours::from(row), false),
            None => {
                let hours = CpuHours::new_for_user(item.user_id, now, new_user_interval_days);
                tracing::info!(user = %username, "adding new total record");
                sqlx::query(
                    "INSERT INTO cpu_usage_totals (id, user_id, total, effective_start, effective_end, last_modified)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(hours.id)
                .bind(hours.user_id)
                .bind(hours.total)
                .bind(hours.effective_start)
                .bind(hours.effective_end)
                .bind(hours.last_modified)
                .execute(&mut *tx)
                .await?;
                (hours, true)
            }
        };

        let previous_total = hours.total;
        hours.total = item.operation.apply(previous_total, item.value)?;
        hours.last_modified = now;

        sqlx::query("UPDATE cpu_usage_totals SET total = $1, last_modified = $2 WHERE id = $3")
            .bind(hours.total)
            .bind(hours.last_modified)
            .bind(hours.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE cpu_usage_work_items
             SET processed = TRUE, processed_by = $1, processed_at = $2
             WHERE id = $3",
        )
        .bind(claim.worker_id.0)
        .bind(now)
        .bind(item.id.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM work_claims WHERE id = $1")
            .bind(claim.id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(LedgerUpdate {
            work_id: item.id,
            user_id: item.user_id,
            username,
            operation: item.operation,
            value: item.value,
            previous_total,
            new_total: hours.total,
            effective_start: hours.effective_start,
            effective_end: hours.effective_end,
            created_total,
        })
    }

    /// The total in effect for a user at `now`.
    pub async fn current_cpu_hours(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<CpuHours>> {
        let row: Option<CpuHoursRow> = sqlx::query_as(&format!(
            "SELECT {CPU_HOURS_COLUMNS} FROM cpu_usage_totals
             WHERE user_id = $1 AND effective_start <= $2 AND effective_end > $2
             ORDER BY effective_start DESC
             LIMIT 1"
        ))
        .bind(user_id)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(CpuHours::from))
    }

    pub async fn upsert_user(&self, username: &str) -> Result<User> {
        let (id, username): (Uuid, String) = sqlx::query_as(
            "INSERT INTO users (id, username) VALUES ($1, $2)
             ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
             RETURNING id, username",
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .fetch_one(self.pool())
        .await?;
        Ok(User { id, username })
    }

    pub async fn user_named(&self, username: &str) -> Result<User> {
        let row: Option<(Uuid, String)> =
            sqlx::query_as("SELECT id, username FROM users WHERE username = $1")
                .bind(username)
                .fetch_optional(self.pool())
                .await?;
        row.map(|(id, username)| User { id, username })
            .ok_or_else(|| Error::NotFound(format!("user {username}")))
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct CpuHoursRow {
    id: Uuid,
    user_id: Uuid,
    total: Decimal,
    effective_start: DateTime<Utc>,
    effective_end: DateTime<Utc>,
    last_modified: DateTime<Utc>,
}

impl From<CpuHoursRow> for CpuHours {
    fn from(row: CpuHoursRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            total: row.total,
            effective_start: row.effective_start,
            effective_end: row.effective_end,
            last_modified: row.last_modified,
        }
    }
}
