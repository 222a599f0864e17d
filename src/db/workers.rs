//! Worker registrations and seeking attempts.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{SeekingAttempt, Worker, WorkerId};

impl super::Db {
    /// Insert or renew a worker registration.
    pub async fn upsert_worker(&self, worker: &Worker) -> Result<Worker> {
        let row: WorkerRow = sqlx::query_as(
            "INSERT INTO workers (id, name, registered_at, expires_at, last_refreshed_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE
             SET registered_at = EXCLUDED.registered_at,
                 expires_at = EXCLUDED.expires_at,
                 last_refreshed_at = EXCLUDED.last_refreshed_at
             RETURNING id, name, registered_at, expires_at, last_refreshed_at",
        )
        .bind(worker.id.0)
        .bind(&worker.name)
        .bind(worker.registered_at)
        .bind(worker.expires_at)
        .bind(worker.last_refreshed_at)
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    /// Extend a worker's lease. A lapsed lease is not extended.
    pub async fn extend_worker_lease(
        &self,
        id: WorkerId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE workers SET expires_at = $2, last_refreshed_at = $3
             WHERE id = $1 AND expires_at >= $3",
        )
        .bind(id.0)
        .bind(expires_at)
        .bind(now)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }

    pub async fn delete_worker(&self, id: WorkerId) -> Result<bool> {
        let rows_affected = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id.0)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(rows_affected == 1)
    }

    pub async fn all_workers(&self) -> Result<Vec<Worker>> {
        let rows: Vec<WorkerRow> = sqlx::query_as(
            "SELECT id, name, registered_at, expires_at, last_refreshed_at
             FROM workers ORDER BY registered_at ASC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Worker::from).collect())
    }

    pub async fn delete_expired_workers(&self, now: DateTime<Utc>) -> Result<u64> {
        let rows_affected = sqlx::query("DELETE FROM workers WHERE expires_at < $1")
            .bind(now)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(rows_affected)
    }

    /// Record a seeking attempt, but only for a worker with a live lease.
    pub async fn insert_seeker(
        &self,
        worker_id: WorkerId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO work_seekers (worker_id, started_at, expires_at)
             SELECT id, $2, $3 FROM workers WHERE id = $1 AND expires_at >= $2
             ON CONFLICT (worker_id) DO UPDATE
             SET started_at = EXCLUDED.started_at, expires_at = EXCLUDED.expires_at
             RETURNING worker_id",
        )
        .bind(worker_id.0)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(self.pool())
        .await?;
        Ok(inserted.is_some())
    }

    pub async fn delete_seeker(&self, worker_id: WorkerId) -> Result<()> {
        sqlx::query("DELETE FROM work_seekers WHERE worker_id = $1")
            .bind(worker_id.0)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn all_seekers(&self) -> Result<Vec<SeekingAttempt>> {
        let rows: Vec<(Uuid, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT worker_id, started_at, expires_at FROM work_seekers ORDER BY started_at ASC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(worker_id, started_at, expires_at)| SeekingAttempt {
                worker_id: WorkerId(worker_id),
                started_at,
                expires_at,
            })
            .collect())
    }

    pub async fn delete_expired_seekers(&self, now: DateTime<Utc>) -> Result<u64> {
        let rows_affected = sqlx::query("DELETE FROM work_seekers WHERE expires_at < $1")
            .bind(now)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(rows_affected)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkerRow {
    id: Uuid,
    name: String,
    registered_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_refreshed_at: DateTime<Utc>,
}

impl From<WorkerRow> for Worker {
    fn from(row: WorkerRow) -> Self {
        Self {
            id: WorkerId(row.id),
            name: row.name,
            registered_at: row.registered_at,
            expires_at: row.expires_at,
            last_refreshed_at: row.last_refreshed_at,
        }
    }
}
