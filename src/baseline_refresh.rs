use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::fetcher::{fetch_universe_snapshot, MarketDataSource};
use crate::state::{BaselineSettings, RefreshReport, VolumeBaselineStore};

/// Scheduled rebuild of the volume baselines for the current universe.
///
/// The universe comes from one bulk snapshot call; history is then fetched per
/// symbol with the store's bounded fan-out.
pub struct BaselineRefresher {
    source: Arc<dyn MarketDataSource>,
    store: Arc<VolumeBaselineStore>,
    settings: BaselineSettings,
    every: Duration,
    min_price: f64,
}

impl BaselineRefresher {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        store: Arc<VolumeBaselineStore>,
        settings: BaselineSettings,
        every: Duration,
        min_price: f64,
    ) -> Self {
        Self { source, store, settings, every, min_price }
    }

    pub fn from_config(cfg: &Config, source: Arc<dyn MarketDataSource>, store: Arc<VolumeBaselineStore>) -> Self {
        Self::new(
            source,
            store,
            BaselineSettings::from_config(cfg),
            Duration::from_secs(cfg.baseline_refresh_interval_secs),
            cfg.min_price,
        )
    }

    pub async fn run(self) {
        let mut ticker = interval(self.every);
        ticker.tick().await; // skip immediate first tick, startup warm-up already ran

        loop {
            ticker.tick().await;
            if let Err(e) = self.refresh_once().await {
                error!("Baseline refresh failed: {e}");
            }
        }
    }

    pub async fn refresh_once(&self) -> Result<RefreshReport> {
        let (universe, _stats) = fetch_universe_snapshot(self.source.as_ref(), self.min_price).await?;
        let mut symbols: Vec<String> = universe.into_keys().collect();
        symbols.sort();
        info!("[BASELINE] refreshing {} symbols", symbols.len());
        self.store.refresh(self.source.as_ref(), &symbols, &self.settings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::fetcher::RawSnapshot;
    use crate::static_source::StaticMarketData;
    use crate::types::DailyBar;

    fn row(symbol: &str) -> RawSnapshot {
        RawSnapshot {
            symbol: symbol.into(),
            last_price: Some(5.0),
            day_volume: Some(1_000.0),
            prev_close: Some(5.0),
            prev_volume: Some(1_000.0),
        }
    }

    fn bars(n: i64, volume: f64) -> Vec<DailyBar> {
        (0..n)
            .map(|i| DailyBar { timestamp_ms: -i, open: 5.0, high: 5.0, low: 5.0, close: 5.0, volume })
            .collect()
    }

    #[tokio::test]
    async fn refresh_covers_the_snapshot_universe() {
        let source = Arc::new(
            StaticMarketData::new()
                .with_snapshot(row("AAA"))
                .with_snapshot(row("NEW"))
                .with_bars("AAA", bars(25, 2_000.0))
                .with_bars("NEW", bars(3, 2_000.0)),
        );
        let store = VolumeBaselineStore::open(connect_in_memory().await.unwrap()).await.unwrap();
        let refresher = BaselineRefresher::new(
            source.clone(),
            Arc::clone(&store),
            BaselineSettings::default(),
            Duration::from_secs(3600),
            0.0,
        );

        let report = refresher.refresh_once().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped_symbols, vec!["NEW".to_string()]);
        assert_eq!(store.get("AAA").unwrap().average_daily_volume, 2_000.0);
        assert_eq!(source.bulk_calls(), 1);
        assert_eq!(source.history_calls(), 2);
    }

    #[tokio::test]
    async fn unavailable_universe_propagates() {
        let source = Arc::new(StaticMarketData::new().failing_bulk());
        let store = VolumeBaselineStore::open(connect_in_memory().await.unwrap()).await.unwrap();
        let refresher =
            BaselineRefresher::new(source, store, BaselineSettings::default(), Duration::from_secs(3600), 0.0);
        assert!(refresher.refresh_once().await.is_err());
    }
}
