use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::api::health::HealthState;
use crate::db::models::CandidateSnapshotRow;
use crate::error::Result;
use crate::types::PublishedCandidates;

/// Persists each published candidate snapshot to SQLite.
/// Runs as its own task so the discovery cycle never waits on the write.
pub struct DbWriter {
    pool: sqlx::SqlitePool,
    snapshot_rx: mpsc::Receiver<Arc<PublishedCandidates>>,
    health: Arc<HealthState>,
}

impl DbWriter {
    pub fn new(
        pool: sqlx::SqlitePool,
        snapshot_rx: mpsc::Receiver<Arc<PublishedCandidates>>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { pool, snapshot_rx, health }
    }

    pub async fn run(mut self) {
        while let Some(snapshot) = self.snapshot_rx.recv().await {
            self.health.dec_write_queue_pending();
            if let Err(e) = write_snapshot(&self.pool, &snapshot).await {
                error!(generation = snapshot.generation, "DB write error: {e}");
            }
        }
        debug!("Snapshot channel closed, DB writer exiting");
    }
}

/// Persist one generation. Generations are never overwritten; a duplicate is
/// a database error.
pub async fn write_snapshot(pool: &sqlx::SqlitePool, snapshot: &PublishedCandidates) -> Result<()> {
    let payload = serde_json::to_string(snapshot)?;
    sqlx::query(
        r#"
        INSERT INTO candidate_snapshots (generation, generated_at, candidate_count, payload)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(snapshot.generation as i64)
    .bind(snapshot.generated_at.timestamp_millis())
    .bind(snapshot.candidates.len() as i64)
    .bind(payload)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent persisted snapshot, used to warm the result cache on startup.
pub async fn load_latest(pool: &sqlx::SqlitePool) -> Result<Option<PublishedCandidates>> {
    let row = sqlx::query_as::<_, CandidateSnapshotRow>(
        r#"
        SELECT generation, generated_at, candidate_count, payload
        FROM candidate_snapshots
        ORDER BY generation DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    match serde_json::from_str::<PublishedCandidates>(&row.payload) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(e) => {
            warn!(generation = row.generation, "Persisted snapshot unreadable, starting cold: {e}");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::error::AppError;
    use crate::types::{Candidate, Tier};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn snapshot(generation: u64) -> PublishedCandidates {
        PublishedCandidates {
            generation,
            generated_at: Utc::now(),
            universe_size: 10,
            scored_count: 1,
            candidates: vec![Candidate {
                symbol: "ABC".into(),
                composite_score: 76.3,
                tier: Tier::TradeReady,
                subscores: BTreeMap::new(),
                active_weights: BTreeMap::new(),
                missing_components: vec![],
            }],
            prefilter_false_negatives: vec![],
        }
    }

    #[tokio::test]
    async fn latest_generation_is_reloaded() {
        let pool = connect_in_memory().await.unwrap();
        assert!(load_latest(&pool).await.unwrap().is_none());
        write_snapshot(&pool, &snapshot(1)).await.unwrap();
        write_snapshot(&pool, &snapshot(2)).await.unwrap();
        let latest = load_latest(&pool).await.unwrap().unwrap();
        assert_eq!(latest.generation, 2);
        assert_eq!(latest.candidates[0].symbol, "ABC");
    }

    #[tokio::test]
    async fn duplicate_generation_is_rejected_not_replaced() {
        let pool = connect_in_memory().await.unwrap();
        write_snapshot(&pool, &snapshot(4)).await.unwrap();

        let mut other = snapshot(4);
        other.candidates[0].symbol = "XYZ".into();
        assert!(matches!(write_snapshot(&pool, &other).await, Err(AppError::Database(_))));
        assert_eq!(load_latest(&pool).await.unwrap().unwrap().candidates[0].symbol, "ABC");
    }

    #[tokio::test]
    async fn writer_drains_channel() {
        let pool = connect_in_memory().await.unwrap();
        let health = Arc::new(HealthState::new());
        let (tx, rx) = mpsc::channel(4);
        health.inc_write_queue_pending();
        tx.send(Arc::new(snapshot(7))).await.unwrap();
        drop(tx);
        DbWriter::new(pool.clone(), rx, Arc::clone(&health)).run().await;
        assert_eq!(load_latest(&pool).await.unwrap().unwrap().generation, 7);
        assert_eq!(health.report().write_queue_pending, 0);
    }
}
