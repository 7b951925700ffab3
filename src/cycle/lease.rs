use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::db::models::CycleLockRow;
use crate::error::Result;

/// Named TTL lease in the `cycle_locks` table.
///
/// Acquisition is a single upsert that only overwrites a row whose lease has
/// expired, so two processes sharing the database cannot both hold it. A
/// holder that dies without releasing blocks others for at most `ttl`.
pub struct CycleLease {
    pool: SqlitePool,
    name: String,
    ttl: Duration,
}

impl CycleLease {
    pub fn new(pool: SqlitePool, name: impl Into<String>, ttl: Duration) -> Self {
        Self { pool, name: name.into(), ttl }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if `holder` now owns the lease.
    pub async fn try_acquire(&self, holder: &str, now: DateTime<Utc>) -> Result<bool> {
        let now_ms = now.timestamp_millis();
        let expires_at = now_ms + self.ttl.as_millis().min(i64::MAX as u128) as i64;

        let result = sqlx::query(
            r#"
            INSERT INTO cycle_locks (name, holder, acquired_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                holder      = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at  = excluded.expires_at
            WHERE cycle_locks.expires_at <= ?
            "#,
        )
        .bind(&self.name)
        .bind(holder)
        .bind(now_ms)
        .bind(expires_at)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() == 1;
        if acquired {
            debug!(lease = %self.name, holder, "[CYCLE] lease acquired");
        } else if let Some(row) = self.current().await? {
            debug!(
                lease = %self.name,
                holder = %row.holder,
                expires_at = row.expires_at,
                "[CYCLE] lease held elsewhere"
            );
        }
        Ok(acquired)
    }

    /// Release only if `holder` still owns the lease.
    pub async fn release(&self, holder: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM cycle_locks WHERE name = ? AND holder = ?")
            .bind(&self.name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            warn!(lease = %self.name, holder, "[CYCLE] lease was taken over before release");
        }
        Ok(())
    }

    /// Allocate the next publish generation, but only while `holder` still
    /// owns a live lease. `None` means the lease expired or was taken over.
    ///
    /// The counter starts past both `floor` and any persisted snapshot, and
    /// the ownership check and the increment are one statement.
    pub async fn claim_generation(&self, holder: &str, floor: u64, now: DateTime<Utc>) -> Result<Option<u64>> {
        let floor = i64::try_from(floor).unwrap_or(i64::MAX);
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO cycle_generations (name, generation)
            SELECT ?, MAX(?, (SELECT COALESCE(MAX(generation), 0) + 1 FROM candidate_snapshots))
            WHERE EXISTS (
                SELECT 1 FROM cycle_locks WHERE name = ? AND holder = ? AND expires_at > ?
            )
            ON CONFLICT(name) DO UPDATE SET
                generation = MAX(cycle_generations.generation + 1, excluded.generation)
            RETURNING generation
            "#,
        )
        .bind(&self.name)
        .bind(floor)
        .bind(&self.name)
        .bind(holder)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((generation,)) => Ok(Some(generation.max(1) as u64)),
            None => {
                warn!(lease = %self.name, holder, "[CYCLE] lease no longer held, generation not claimed");
                Ok(None)
            }
        }
    }

    pub async fn current(&self) -> Result<Option<CycleLockRow>> {
        let row = sqlx::query_as::<_, CycleLockRow>(
            "SELECT name, holder, acquired_at, expires_at FROM cycle_locks WHERE name = ?",
        )
        .bind(&self.name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
