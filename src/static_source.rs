//! In-memory `MarketDataSource` serving fixed data.
//! Used for offline replays of a captured session and by the test suites.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::fetcher::{MarketDataSource, RawSnapshot};
use crate::types::{DailyBar, FloatData, NewsItem, OptionsActivity, TradePrint};

#[derive(Default)]
pub struct StaticMarketData {
    snapshot: Vec<RawSnapshot>,
    bars: HashMap<String, Vec<DailyBar>>,
    floats: HashMap<String, FloatData>,
    news: HashMap<String, Vec<NewsItem>>,
    options: HashMap<String, OptionsActivity>,
    trades: HashMap<String, Vec<TradePrint>>,
    fail_bulk: bool,
    /// Symbols whose per-symbol calls all error.
    failing: HashSet<String>,
    /// Artificial latency per symbol, applied to every per-symbol call.
    delays: HashMap<String, Duration>,
    bulk_calls: AtomicUsize,
    history_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight count even when the caller's timeout drops the call.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, row: RawSnapshot) -> Self {
        self.snapshot.push(row);
        self
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<DailyBar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_float(mut self, symbol: &str, data: FloatData) -> Self {
        self.floats.insert(symbol.to_string(), data);
        self
    }

    pub fn with_news(mut self, symbol: &str, items: Vec<NewsItem>) -> Self {
        self.news.insert(symbol.to_string(), items);
        self
    }

    pub fn with_options(mut self, symbol: &str, activity: OptionsActivity) -> Self {
        self.options.insert(symbol.to_string(), activity);
        self
    }

    pub fn with_trades(mut self, symbol: &str, trades: Vec<TradePrint>) -> Self {
        self.trades.insert(symbol.to_string(), trades);
        self
    }

    pub fn failing_bulk(mut self) -> Self {
        self.fail_bulk = true;
        self
    }

    pub fn failing_symbol(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    pub fn delayed_symbol(mut self, symbol: &str, delay: Duration) -> Self {
        self.delays.insert(symbol.to_string(), delay);
        self
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::Relaxed)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::Relaxed)
    }

    /// Highest number of per-symbol calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn per_symbol(&self, symbol: &str) -> Result<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(symbol) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(symbol) {
            return Err(AppError::SourceUnavailable(format!("static source: {symbol} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataSource for StaticMarketData {
    async fn fetch_bulk_snapshot(&self) -> Result<Vec<RawSnapshot>> {
        self.bulk_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_bulk {
            return Err(AppError::SourceUnavailable("static source: bulk snapshot disabled".to_string()));
        }
        Ok(self.snapshot.clone())
    }

    async fn fetch_daily_bars(&self, symbol: &str, days: usize) -> Result<Vec<DailyBar>> {
        self.history_calls.fetch_add(1, Ordering::Relaxed);
        self.per_symbol(symbol).await?;
        Ok(self
            .bars
            .get(symbol)
            .map(|b| b.iter().take(days).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_float(&self, symbol: &str) -> Result<Option<FloatData>> {
        self.per_symbol(symbol).await?;
        Ok(self.floats.get(symbol).cloned())
    }

    async fn fetch_news(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<NewsItem>> {
        self.per_symbol(symbol).await?;
        Ok(self
            .news
            .get(symbol)
            .map(|items| items.iter().filter(|n| n.published_at >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_options_activity(&self, symbol: &str) -> Result<Option<OptionsActivity>> {
        self.per_symbol(symbol).await?;
        Ok(self.options.get(symbol).cloned())
    }

    async fn fetch_recent_trades(&self, symbol: &str, limit: usize) -> Result<Vec<TradePrint>> {
        self.per_symbol(symbol).await?;
        Ok(self
            .trades
            .get(symbol)
            .map(|t| t.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
