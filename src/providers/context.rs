use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use tracing::{debug, info};

use crate::config::{HISTORY_LOOKBACK_DAYS, NEWS_LOOKBACK_HOURS};
use crate::error::{AppError, Result};
use crate::fetcher::MarketDataSource;
use crate::types::{DailyBar, FloatData, NewsItem, OptionsActivity, RvolResult, SymbolSnapshot, TradePrint};

/// Trade prints requested for the real-time momentum provider.
pub const RECENT_TRADES_LIMIT: usize = 200;

/// Which per-symbol upstream calls a cycle needs to make.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamNeeds {
    pub history: bool,
    pub float: bool,
    pub news: bool,
    pub options: bool,
    pub trades: bool,
}

impl UpstreamNeeds {
    pub fn union(self, other: UpstreamNeeds) -> UpstreamNeeds {
        UpstreamNeeds {
            history: self.history || other.history,
            float: self.float || other.float,
            news: self.news || other.news,
            options: self.options || other.options,
            trades: self.trades || other.trades,
        }
    }
}

/// Everything the providers may read for one symbol in one cycle.
///
/// `None` means the data is unknown (not requested, failed, or timed out).
/// `Some(vec![])` means the upstream answered with nothing, which is data.
#[derive(Debug, Clone)]
pub struct SymbolContext {
    pub symbol: String,
    pub as_of: DateTime<Utc>,
    pub snapshot: Option<SymbolSnapshot>,
    pub rvol: Option<RvolResult>,
    /// Completed daily bars, newest first.
    pub history: Option<Vec<DailyBar>>,
    pub float: Option<FloatData>,
    pub news: Option<Vec<NewsItem>>,
    pub options: Option<OptionsActivity>,
    /// Trade prints, newest first.
    pub trades: Option<Vec<TradePrint>>,
}

impl SymbolContext {
    pub fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            as_of: Utc::now(),
            snapshot: None,
            rvol: None,
            history: None,
            float: None,
            news: None,
            options: None,
            trades: None,
        }
    }

    /// Latest known price: live snapshot first, last completed close otherwise.
    pub fn last_price(&self) -> Option<f64> {
        self.snapshot
            .as_ref()
            .map(|s| s.current_price)
            .or_else(|| self.history.as_ref().and_then(|h| h.first()).map(|b| b.close))
            .filter(|p| p.is_finite() && *p > 0.0)
    }
}

#[derive(Debug, Clone, Copy)]
enum Request {
    History,
    Float,
    News,
    Options,
    Trades,
}

enum Fetched {
    History(Vec<DailyBar>),
    Float(Option<FloatData>),
    News(Vec<NewsItem>),
    Options(Option<OptionsActivity>),
    Trades(Vec<TradePrint>),
}

/// Fans out the per-symbol upstream calls of one cycle.
///
/// Every (symbol, request) pair is an independent task; at most `concurrency`
/// run at once and each carries its own timeout, so a slow or failing call
/// only blanks its own context field. Daily history is cached for the
/// calendar day since completed bars do not change intraday.
pub struct ContextLoader {
    concurrency: usize,
    timeout: Duration,
    history_cache: DashMap<String, (NaiveDate, Vec<DailyBar>)>,
}

impl ContextLoader {
    pub fn new(concurrency: usize, timeout: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            timeout,
            history_cache: DashMap::new(),
        }
    }

    pub async fn load(
        &self,
        source: &dyn MarketDataSource,
        inputs: Vec<(SymbolSnapshot, Option<RvolResult>)>,
        needs: UpstreamNeeds,
    ) -> HashMap<String, SymbolContext> {
        let as_of = Utc::now();
        let today = as_of.date_naive();
        let news_since = as_of - chrono::Duration::hours(NEWS_LOOKBACK_HOURS);
        self.history_cache.retain(|_, (day, _)| *day == today);

        let mut contexts: HashMap<String, SymbolContext> = HashMap::with_capacity(inputs.len());
        let mut tasks: Vec<(String, Request)> = Vec::new();

        for (snapshot, rvol) in inputs {
            let symbol = snapshot.symbol.clone();
            let mut ctx = SymbolContext::empty(&symbol);
            ctx.as_of = as_of;
            ctx.snapshot = Some(snapshot);
            ctx.rvol = rvol;

            if needs.history {
                match self.cached_history(&symbol, today) {
                    Some(bars) => ctx.history = Some(bars),
                    None => tasks.push((symbol.clone(), Request::History)),
                }
            }
            if needs.float {
                tasks.push((symbol.clone(), Request::Float));
            }
            if needs.news {
                tasks.push((symbol.clone(), Request::News));
            }
            if needs.options {
                tasks.push((symbol.clone(), Request::Options));
            }
            if needs.trades {
                tasks.push((symbol.clone(), Request::Trades));
            }
            contexts.insert(symbol, ctx);
        }

        let total = tasks.len();
        let timeout = self.timeout;
        let results: Vec<(String, Request, Result<Fetched>)> = stream::iter(tasks)
            .map(|(symbol, request)| async move {
                let call = fetch_one(source, &symbol, request, news_since);
                let res = match tokio::time::timeout(timeout, call).await {
                    Ok(r) => r,
                    Err(_) => Err(AppError::Timeout(format!("{request:?} for {symbol}"))),
                };
                (symbol, request, res)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut failed = 0usize;
        for (symbol, request, res) in results {
            let Some(ctx) = contexts.get_mut(&symbol) else { continue };
            match res {
                Ok(Fetched::History(bars)) => {
                    self.history_cache.insert(symbol.clone(), (today, bars.clone()));
                    ctx.history = Some(bars);
                }
                Ok(Fetched::Float(f)) => ctx.float = f,
                Ok(Fetched::News(n)) => ctx.news = Some(n),
                Ok(Fetched::Options(o)) => ctx.options = o,
                Ok(Fetched::Trades(t)) => ctx.trades = Some(t),
                Err(e) => {
                    failed += 1;
                    debug!(symbol = %symbol, "[CONTEXT] {request:?} unavailable: {e}");
                }
            }
        }

        info!(
            symbols = contexts.len(),
            calls = total,
            failed,
            "[CONTEXT] enriched {} symbols with {} upstream calls ({} failed or timed out)",
            contexts.len(),
            total,
            failed,
        );
        contexts
    }

    fn cached_history(&self, symbol: &str, today: NaiveDate) -> Option<Vec<DailyBar>> {
        let entry = self.history_cache.get(symbol)?;
        let (day, bars) = entry.value();
        (*day == today).then(|| bars.clone())
    }
}

async fn fetch_one(
    source: &dyn MarketDataSource,
    symbol: &str,
    request: Request,
    news_since: DateTime<Utc>,
) -> Result<Fetched> {
    Ok(match request {
        Request::History => Fetched::History(source.fetch_daily_bars(symbol, HISTORY_LOOKBACK_DAYS).await?),
        Request::Float => Fetched::Float(source.fetch_float(symbol).await?),
        Request::News => Fetched::News(source.fetch_news(symbol, news_since).await?),
        Request::Options => Fetched::Options(source.fetch_options_activity(symbol).await?),
        Request::Trades => Fetched::Trades(source.fetch_recent_trades(symbol, RECENT_TRADES_LIMIT).await?),
    })
}
