use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tracing::{debug, info};

use crate::config::{Config, HISTORY_REQUESTS_PER_SEC};
use crate::error::{AppError, Result};
use crate::types::{DailyBar, FloatData, NewsItem, OptionsActivity, SymbolSnapshot, TradePrint};

// ---------------------------------------------------------------------------
// Provider boundary
// ---------------------------------------------------------------------------

/// One unvalidated row of the provider's bulk snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSnapshot {
    pub symbol: String,
    pub last_price: Option<f64>,
    pub day_volume: Option<f64>,
    pub prev_close: Option<f64>,
    pub prev_volume: Option<f64>,
}

/// Everything the engine asks of the market data provider.
///
/// `fetch_bulk_snapshot` is the only call made once per cycle for the whole
/// universe; every other call is per symbol and is rate limited by the caller.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_bulk_snapshot(&self) -> Result<Vec<RawSnapshot>>;

    /// Most recent `days` completed daily bars, newest first.
    async fn fetch_daily_bars(&self, symbol: &str, days: usize) -> Result<Vec<DailyBar>>;

    async fn fetch_float(&self, symbol: &str) -> Result<Option<FloatData>>;

    async fn fetch_news(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<NewsItem>>;

    async fn fetch_options_activity(&self, symbol: &str) -> Result<Option<OptionsActivity>>;

    /// Most recent trades, newest first.
    async fn fetch_recent_trades(&self, symbol: &str, limit: usize) -> Result<Vec<TradePrint>>;
}

// ---------------------------------------------------------------------------
// Snapshot validation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FetchStats {
    pub api_total: usize,
    pub rejected_no_symbol: usize,
    pub rejected_bad_price: usize,
    pub rejected_negative_volume: usize,
    pub rejected_no_volume: usize,
    pub rejected_below_min_price: usize,
    pub fell_back_previous: usize,
    pub qualified: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoSymbol,
    BadPrice,
    NegativeVolume,
    NoVolume,
    BelowMinPrice,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Rejection::NoSymbol => "missing symbol",
            Rejection::BadPrice => "non-positive price",
            Rejection::NegativeVolume => "negative volume",
            Rejection::NoVolume => "no current or previous session volume",
            Rejection::BelowMinPrice => "below minimum price",
        };
        write!(f, "{s}")
    }
}

fn positive(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x > 0.0)
}

/// Validate one provider row.
///
/// Current-session price and volume are used when the session has volume.
/// Otherwise previous-session close and volume stand in; if those are also
/// unusable the symbol is rejected, never synthesized.
pub fn validate_snapshot(
    raw: &RawSnapshot,
    captured_at: DateTime<Utc>,
    min_price: f64,
) -> std::result::Result<SymbolSnapshot, Rejection> {
    let symbol = raw.symbol.trim();
    if symbol.is_empty() {
        return Err(Rejection::NoSymbol);
    }

    let negative = |v: Option<f64>| v.map_or(false, |x| x < 0.0);
    if negative(raw.day_volume) || negative(raw.prev_volume) {
        return Err(Rejection::NegativeVolume);
    }

    let prev_close = positive(raw.prev_close).unwrap_or(0.0);
    let prev_volume = positive(raw.prev_volume).unwrap_or(0.0);

    let (price, volume, from_previous_session) = match (positive(raw.day_volume), positive(raw.last_price)) {
        (Some(volume), Some(price)) => (price, volume, false),
        (Some(_), None) => return Err(Rejection::BadPrice),
        (None, _) => {
            if prev_volume <= 0.0 {
                return Err(Rejection::NoVolume);
            }
            if prev_close <= 0.0 {
                return Err(Rejection::BadPrice);
            }
            (prev_close, prev_volume, true)
        }
    };

    if min_price > 0.0 && price < min_price {
        return Err(Rejection::BelowMinPrice);
    }

    Ok(SymbolSnapshot {
        symbol: symbol.to_uppercase(),
        current_price: price,
        current_volume: volume,
        previous_close: prev_close,
        previous_volume: prev_volume,
        captured_at,
        from_previous_session,
    })
}

/// Fetch and validate the whole universe with a single bulk call.
///
/// Fails with `SourceUnavailable` if the call errors or returns nothing; invalid
/// individual rows are dropped and counted in `FetchStats`.
pub async fn fetch_universe_snapshot(
    source: &dyn MarketDataSource,
    min_price: f64,
) -> Result<(HashMap<String, SymbolSnapshot>, FetchStats)> {
    let rows = source
        .fetch_bulk_snapshot()
        .await
        .map_err(|e| match e {
            AppError::SourceUnavailable(msg) => AppError::SourceUnavailable(msg),
            other => AppError::SourceUnavailable(other.to_string()),
        })?;

    if rows.is_empty() {
        return Err(AppError::SourceUnavailable("bulk snapshot returned no rows".to_string()));
    }

    let captured_at = Utc::now();
    let mut stats = FetchStats { api_total: rows.len(), ..Default::default() };
    let mut universe = HashMap::with_capacity(rows.len());

    for raw in &rows {
        match validate_snapshot(raw, captured_at, min_price) {
            Ok(snap) => {
                if snap.from_previous_session {
                    stats.fell_back_previous += 1;
                }
                universe.insert(snap.symbol.clone(), snap);
            }
            Err(rejection) => {
                debug!(symbol = %raw.symbol, reason = %rejection, "[SNAPSHOT] invalid record dropped");
                match rejection {
                    Rejection::NoSymbol => stats.rejected_no_symbol += 1,
                    Rejection::BadPrice => stats.rejected_bad_price += 1,
                    Rejection::NegativeVolume => stats.rejected_negative_volume += 1,
                    Rejection::NoVolume => stats.rejected_no_volume += 1,
                    Rejection::BelowMinPrice => stats.rejected_below_min_price += 1,
                }
            }
        }
    }

    stats.qualified = universe.len();
    info!(
        api_total = stats.api_total,
        qualified = stats.qualified,
        "[SNAPSHOT] {} of {} symbols qualified ({} on previous-session data)",
        stats.qualified,
        stats.api_total,
        stats.fell_back_previous,
    );
    info!(
        "[FILTER] rejected: no_symbol={} bad_price={} negative_volume={} no_volume={} below_min_price={}",
        stats.rejected_no_symbol,
        stats.rejected_bad_price,
        stats.rejected_negative_volume,
        stats.rejected_no_volume,
        stats.rejected_below_min_price,
    );

    Ok((universe, stats))
}

// ---------------------------------------------------------------------------
// HTTP provider
// ---------------------------------------------------------------------------

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// REST client for a Polygon-style market data API.
pub struct HttpMarketData {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Paces per-symbol calls; the bulk snapshot is not throttled.
    limiter: DirectLimiter,
}

impl HttpMarketData {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.upstream_timeout_secs.max(1) * 3))
            .build()?;
        let per_sec = NonZeroU32::new(HISTORY_REQUESTS_PER_SEC).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            client,
            base_url: cfg.market_data_url.trim_end_matches('/').to_string(),
            api_key: cfg.market_data_api_key.clone(),
            limiter: RateLimiter::direct(Quota::per_second(per_sec)),
        })
    }

    async fn get_json(&self, path_and_query: &str) -> Result<serde_json::Value> {
        let sep = if path_and_query.contains('?') { '&' } else { '?' };
        let url = format!("{}{}{}apiKey={}", self.base_url, path_and_query, sep, self.api_key);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn get_json_paced(&self, path_and_query: &str) -> Result<serde_json::Value> {
        self.limiter.until_ready().await;
        self.get_json(path_and_query).await
    }
}

fn num(v: &serde_json::Value, key: &str) -> Option<f64> {
    v.get(key)
        .and_then(|x| x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse().ok())))
}

fn results(v: &serde_json::Value) -> Vec<serde_json::Value> {
    v.get("results")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Parse one entry of the bulk snapshot `tickers` array.
pub fn parse_snapshot_row(v: &serde_json::Value) -> Option<RawSnapshot> {
    let symbol = v.get("ticker")?.as_str()?.to_string();
    let day = v.get("day");
    let prev = v.get("prevDay");
    let last_price = v
        .get("lastTrade")
        .and_then(|t| num(t, "p"))
        .or_else(|| day.and_then(|d| num(d, "c")));
    Some(RawSnapshot {
        symbol,
        last_price,
        day_volume: day.and_then(|d| num(d, "v")),
        prev_close: prev.and_then(|p| num(p, "c")),
        prev_volume: prev.and_then(|p| num(p, "v")),
    })
}

pub fn parse_daily_bar(v: &serde_json::Value) -> Option<DailyBar> {
    Some(DailyBar {
        timestamp_ms: v.get("t")?.as_i64()?,
        open: num(v, "o")?,
        high: num(v, "h")?,
        low: num(v, "l")?,
        close: num(v, "c")?,
        volume: num(v, "v").unwrap_or(0.0),
    })
}

/// Map the provider's per-ticker sentiment label onto [-1, 1].
fn sentiment_label(label: &str) -> Option<f64> {
    match label.to_lowercase().as_str() {
        "positive" | "bullish" => Some(1.0),
        "negative" | "bearish" => Some(-1.0),
        "neutral" => Some(0.0),
        _ => None,
    }
}

pub fn parse_news_item(v: &serde_json::Value, symbol: &str) -> Option<NewsItem> {
    let title = v.get("title")?.as_str()?.to_string();
    let published_at = v
        .get("published_utc")?
        .as_str()?
        .parse::<DateTime<Utc>>()
        .ok()?;
    let sentiment = v
        .get("insights")
        .and_then(|i| i.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|i| i.get("ticker").and_then(|t| t.as_str()) == Some(symbol))
        })
        .and_then(|i| i.get("sentiment"))
        .and_then(|s| s.as_str())
        .and_then(sentiment_label);
    Some(NewsItem { title, published_at, sentiment })
}

#[async_trait]
impl MarketDataSource for HttpMarketData {
    async fn fetch_bulk_snapshot(&self) -> Result<Vec<RawSnapshot>> {
        let resp = self
            .get_json("/v2/snapshot/locale/us/markets/stocks/tickers")
            .await
            .map_err(|e| AppError::SourceUnavailable(e.to_string()))?;
        let tickers = resp
            .get("tickers")
            .and_then(|t| t.as_array())
            .ok_or_else(|| AppError::SourceUnavailable("snapshot response had no tickers array".to_string()))?;
        Ok(tickers.iter().filter_map(parse_snapshot_row).collect())
    }

    async fn fetch_daily_bars(&self, symbol: &str, days: usize) -> Result<Vec<DailyBar>> {
        let to = Utc::now().date_naive();
        // Calendar span wide enough to cover `days` sessions through weekends and holidays.
        let from = to - chrono::Duration::days((days as i64) * 2 + 10);
        let path = format!(
            "/v2/aggs/ticker/{symbol}/range/1/day/{from}/{to}?adjusted=true&sort=desc&limit={}",
            days + 1
        );
        let resp = self.get_json_paced(&path).await?;
        let today_ms = to.and_hms_opt(0, 0, 0).map(|d| d.and_utc().timestamp_millis()).unwrap_or(i64::MAX);
        Ok(results(&resp)
            .iter()
            .filter_map(parse_daily_bar)
            // The in-progress session is not a completed bar.
            .filter(|b| b.timestamp_ms < today_ms)
            .take(days)
            .collect())
    }

    async fn fetch_float(&self, symbol: &str) -> Result<Option<FloatData>> {
        let details = self.get_json_paced(&format!("/v3/reference/tickers/{symbol}")).await?;
        let Some(float_shares) = details
            .get("results")
            .and_then(|r| num(r, "share_class_shares_outstanding").or_else(|| num(r, "weighted_shares_outstanding")))
            .filter(|f| *f > 0.0)
        else {
            return Ok(None);
        };

        let short = self
            .get_json_paced(&format!(
                "/stocks/v1/short-interest?ticker={symbol}&limit=1&sort=settlement_date.desc"
            ))
            .await?;
        let Some(latest) = results(&short).into_iter().next() else {
            return Ok(None);
        };
        let Some(short_interest) = num(&latest, "short_interest") else {
            return Ok(None);
        };

        Ok(Some(FloatData {
            float_shares,
            short_interest_ratio: short_interest / float_shares,
            days_to_cover: num(&latest, "days_to_cover"),
        }))
    }

    async fn fetch_news(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<NewsItem>> {
        let path = format!(
            "/v2/reference/news?ticker={symbol}&published_utc.gte={}&order=desc&limit=50",
            since.format("%Y-%m-%dT%H:%M:%SZ")
        );
        let resp = self.get_json_paced(&path).await?;
        Ok(results(&resp)
            .iter()
            .filter_map(|v| parse_news_item(v, symbol))
            .collect())
    }

    async fn fetch_options_activity(&self, symbol: &str) -> Result<Option<OptionsActivity>> {
        let resp = self
            .get_json_paced(&format!("/v3/snapshot/options/{symbol}?limit=250"))
            .await?;
        let contracts = results(&resp);
        if contracts.is_empty() {
            return Ok(None);
        }

        let mut activity = OptionsActivity {
            call_volume: 0.0,
            put_volume: 0.0,
            call_open_interest: 0.0,
            put_open_interest: 0.0,
        };
        for c in &contracts {
            let kind = c
                .get("details")
                .and_then(|d| d.get("contract_type"))
                .and_then(|t| t.as_str())
                .unwrap_or("");
            let volume = c.get("day").and_then(|d| num(d, "volume")).unwrap_or(0.0);
            let oi = num(c, "open_interest").unwrap_or(0.0);
            match kind {
                "call" => {
                    activity.call_volume += volume;
                    activity.call_open_interest += oi;
                }
                "put" => {
                    activity.put_volume += volume;
                    activity.put_open_interest += oi;
                }
                _ => {}
            }
        }
        Ok(Some(activity))
    }

    async fn fetch_recent_trades(&self, symbol: &str, limit: usize) -> Result<Vec<TradePrint>> {
        let resp = self
            .get_json_paced(&format!("/v3/trades/{symbol}?order=desc&sort=timestamp&limit={limit}"))
            .await?;
        Ok(results(&resp)
            .iter()
            .filter_map(|t| {
                Some(TradePrint {
                    price: num(t, "price")?,
                    size: num(t, "size")?,
                    timestamp_ms: t.get("sip_timestamp")?.as_i64()? / 1_000_000,
                })
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(symbol: &str, price: Option<f64>, vol: Option<f64>, pc: Option<f64>, pv: Option<f64>) -> RawSnapshot {
        RawSnapshot {
            symbol: symbol.to_string(),
            last_price: price,
            day_volume: vol,
            prev_close: pc,
            prev_volume: pv,
        }
    }

    #[test]
    fn current_session_values_are_used_when_present() {
        let snap = validate_snapshot(&raw("abc", Some(10.0), Some(5_000_000.0), Some(9.5), Some(900_000.0)), Utc::now(), 0.0)
            .unwrap();
        assert_eq!(snap.symbol, "ABC");
        assert_eq!(snap.current_price, 10.0);
        assert_eq!(snap.current_volume, 5_000_000.0);
        assert!(!snap.from_previous_session);
        assert!((snap.change_pct().unwrap() - 5.263157).abs() < 1e-4);
    }

    #[test]
    fn market_closed_falls_back_to_previous_session() {
        let snap = validate_snapshot(&raw("XYZ", Some(0.0), Some(0.0), Some(12.0), Some(400_000.0)), Utc::now(), 0.0)
            .unwrap();
        assert!(snap.from_previous_session);
        assert_eq!(snap.current_price, 12.0);
        assert_eq!(snap.current_volume, 400_000.0);
        assert!(snap.change_pct().is_none());
    }

    #[test]
    fn zero_current_and_previous_volume_is_dropped() {
        let r = validate_snapshot(&raw("DEAD", Some(5.0), Some(0.0), Some(5.0), Some(0.0)), Utc::now(), 0.0);
        assert_eq!(r, Err(Rejection::NoVolume));
        let r = validate_snapshot(&raw("GONE", None, None, None, None), Utc::now(), 0.0);
        assert_eq!(r, Err(Rejection::NoVolume));
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let r = validate_snapshot(&raw("NEG", Some(-1.0), Some(100.0), Some(5.0), Some(100.0)), Utc::now(), 0.0);
        assert_eq!(r, Err(Rejection::BadPrice));
        let r = validate_snapshot(&raw("NOPX", None, Some(100.0), None, None), Utc::now(), 0.0);
        assert_eq!(r, Err(Rejection::BadPrice));
    }

    #[test]
    fn negative_volume_is_rejected() {
        let r = validate_snapshot(&raw("BAD", Some(3.0), Some(-10.0), Some(3.0), Some(10.0)), Utc::now(), 0.0);
        assert_eq!(r, Err(Rejection::NegativeVolume));
    }

    #[test]
    fn min_price_floor_applies() {
        let r = validate_snapshot(&raw("PENNY", Some(0.5), Some(1000.0), None, None), Utc::now(), 1.0);
        assert_eq!(r, Err(Rejection::BelowMinPrice));
    }

    #[test]
    fn parses_bulk_snapshot_row() {
        let v = serde_json::json!({
            "ticker": "ABC",
            "day": {"c": 9.9, "v": 5000000},
            "prevDay": {"c": 9.0, "v": 1200000},
            "lastTrade": {"p": 10.0}
        });
        let row = parse_snapshot_row(&v).unwrap();
        assert_eq!(row.last_price, Some(10.0));
        assert_eq!(row.day_volume, Some(5_000_000.0));
        assert_eq!(row.prev_close, Some(9.0));
    }

    #[test]
    fn parses_news_sentiment_for_matching_ticker() {
        let v = serde_json::json!({
            "title": "ABC wins contract",
            "published_utc": "2026-10-19T13:00:00Z",
            "insights": [
                {"ticker": "XYZ", "sentiment": "negative"},
                {"ticker": "ABC", "sentiment": "positive"}
            ]
        });
        let item = parse_news_item(&v, "ABC").unwrap();
        assert_eq!(item.sentiment, Some(1.0));
    }
}
