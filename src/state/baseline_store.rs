use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::models::BaselineRow;
use crate::error::{AppError, Result};
use crate::fetcher::MarketDataSource;
use crate::types::{BaselineRecord, DailyBar};

#[derive(Debug, Clone, Copy)]
pub struct BaselineSettings {
    /// Sessions averaged into a baseline.
    pub window_days: usize,
    /// Positive-volume sessions required before a baseline is written.
    pub min_samples: usize,
    /// Concurrent history requests.
    pub concurrency: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl BaselineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            window_days: cfg.baseline_window_days,
            min_samples: cfg.baseline_min_samples,
            concurrency: cfg.fanout_concurrency,
            timeout: Duration::from_secs(cfg.upstream_timeout_secs),
        }
    }
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            window_days: 20,
            min_samples: 10,
            concurrency: 6,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RefreshReport {
    pub updated: usize,
    /// Too few valid samples; prior baseline (if any) left untouched.
    pub skipped: usize,
    /// Upstream or write failure; prior baseline (if any) left untouched.
    pub failed: usize,
    pub skipped_symbols: Vec<String>,
    pub failed_symbols: Vec<String>,
}

/// Arithmetic mean of the most recent `window_days` positive volumes.
///
/// Bars are expected newest first. Non-positive and non-finite volumes are
/// discarded. Fewer than `min_samples` survivors is `InsufficientBaseline`.
pub fn compute_baseline(
    symbol: &str,
    bars: &[DailyBar],
    window_days: usize,
    min_samples: usize,
) -> Result<(f64, u32)> {
    let samples: Vec<f64> = bars
        .iter()
        .take(window_days)
        .map(|b| b.volume)
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();

    if samples.is_empty() || samples.len() < min_samples {
        return Err(AppError::InsufficientBaseline {
            symbol: symbol.to_string(),
            samples: samples.len(),
            required: min_samples,
        });
    }

    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    if !(mean.is_finite() && mean > 0.0) {
        return Err(AppError::InsufficientBaseline {
            symbol: symbol.to_string(),
            samples: 0,
            required: min_samples,
        });
    }
    Ok((mean, samples.len() as u32))
}

// ---------------------------------------------------------------------------
// VolumeBaselineStore
// ---------------------------------------------------------------------------

/// Rolling average daily volume per symbol.
///
/// Reads are served from an in-memory map mirrored from the `volume_baselines`
/// table. Only `refresh` writes, and only one refresh runs at a time.
pub struct VolumeBaselineStore {
    pool: sqlx::SqlitePool,
    /// symbol → record; only valid (positive average) records are ever inserted
    records: DashMap<String, BaselineRecord>,
    writer: Mutex<()>,
}

impl VolumeBaselineStore {
    /// Open the store and warm the cache from the persisted table.
    pub async fn open(pool: sqlx::SqlitePool) -> Result<Arc<Self>> {
        let store = Arc::new(Self {
            pool,
            records: DashMap::new(),
            writer: Mutex::new(()),
        });
        let loaded = store.load().await?;
        info!("[BASELINE] loaded {loaded} persisted baselines");
        Ok(store)
    }

    async fn load(&self) -> Result<usize> {
        let rows: Vec<BaselineRow> = sqlx::query_as(
            "SELECT symbol, average_daily_volume, sample_count, last_refreshed_at FROM volume_baselines",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut loaded = 0;
        for row in rows {
            if !(row.average_daily_volume.is_finite() && row.average_daily_volume > 0.0) {
                warn!(symbol = %row.symbol, "[BASELINE] ignoring persisted non-positive baseline");
                continue;
            }
            let record = BaselineRecord {
                symbol: row.symbol.clone(),
                average_daily_volume: row.average_daily_volume,
                sample_count: row.sample_count.max(0) as u32,
                last_refreshed_at: ms_to_datetime(row.last_refreshed_at),
            };
            self.records.insert(row.symbol, record);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Baselines for the requested symbols. Symbols without a valid baseline are omitted.
    pub fn get_baselines<'a, I>(&self, symbols: I) -> HashMap<String, f64>
    where
        I: IntoIterator<Item = &'a str>,
    {
        symbols
            .into_iter()
            .filter_map(|s| {
                self.records
                    .get(s)
                    .map(|r| (s.to_string(), r.average_daily_volume))
            })
            .collect()
    }

    pub fn get(&self, symbol: &str) -> Option<BaselineRecord> {
        self.records.get(symbol).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Recompute baselines for `symbols` from provider history.
    ///
    /// Per symbol this either overwrites the record in full or leaves the prior
    /// record untouched. Concurrent refreshes are rejected with `LockHeld`.
    pub async fn refresh(
        &self,
        source: &dyn MarketDataSource,
        symbols: &[String],
        settings: &BaselineSettings,
    ) -> Result<RefreshReport> {
        let Ok(_writer) = self.writer.try_lock() else {
            return Err(AppError::LockHeld("baseline refresh already running".to_string()));
        };

        let window = settings.window_days;
        let timeout = settings.timeout;
        let fetched: Vec<(String, Result<Vec<DailyBar>>)> = stream::iter(symbols.iter().cloned())
            .map(|symbol| async move {
                let bars = match tokio::time::timeout(timeout, source.fetch_daily_bars(&symbol, window)).await {
                    Ok(res) => res,
                    Err(_) => Err(AppError::Timeout(format!("history for {symbol}"))),
                };
                (symbol, bars)
            })
            .buffer_unordered(settings.concurrency.max(1))
            .collect()
            .await;

        let now = Utc::now();
        let mut report = RefreshReport::default();

        for (symbol, bars) in fetched {
            let bars = match bars {
                Ok(b) => b,
                Err(e) => {
                    debug!(symbol = %symbol, "[BASELINE] history fetch failed: {e}");
                    report.failed += 1;
                    report.failed_symbols.push(symbol);
                    continue;
                }
            };

            let (average, samples) = match compute_baseline(&symbol, &bars, window, settings.min_samples) {
                Ok(v) => v,
                Err(e) => {
                    debug!(symbol = %symbol, "[BASELINE] skipped: {e}");
                    report.skipped += 1;
                    report.skipped_symbols.push(symbol);
                    continue;
                }
            };

            let record = BaselineRecord {
                symbol: symbol.clone(),
                average_daily_volume: average,
                sample_count: samples,
                last_refreshed_at: now,
            };
            match self.write(&record).await {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    warn!(symbol = %symbol, "[BASELINE] write failed: {e}");
                    report.failed += 1;
                    report.failed_symbols.push(symbol);
                }
            }
        }

        report.skipped_symbols.sort();
        report.failed_symbols.sort();
        info!(
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "[BASELINE] refresh complete: {} updated, {} skipped, {} failed",
            report.updated,
            report.skipped,
            report.failed,
        );
        Ok(report)
    }

    /// Persist first, then publish to readers. A failed write leaves both untouched.
    async fn write(&self, record: &BaselineRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO volume_baselines (symbol, average_daily_volume, sample_count, last_refreshed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                average_daily_volume = excluded.average_daily_volume,
                sample_count = excluded.sample_count,
                last_refreshed_at = excluded.last_refreshed_at
            "#,
        )
        .bind(&record.symbol)
        .bind(record.average_daily_volume)
        .bind(record.sample_count as i64)
        .bind(record.last_refreshed_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        self.records.insert(record.symbol.clone(), record.clone());
        Ok(())
    }
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
