use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One validated row of the bulk universe snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub current_price: f64,
    pub current_volume: f64,
    pub previous_close: f64,
    pub previous_volume: f64,
    pub captured_at: DateTime<Utc>,
    /// True when current-session data was empty and previous-day values were used.
    pub from_previous_session: bool,
}

impl SymbolSnapshot {
    /// Percent change of the current price against the previous close.
    /// None when there is no usable previous close.
    pub fn change_pct(&self) -> Option<f64> {
        if self.previous_close > 0.0 && !self.from_previous_session {
            Some((self.current_price - self.previous_close) / self.previous_close * 100.0)
        } else {
            None
        }
    }
}

/// Daily OHLCV bar from the provider's aggregates endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    /// Unix milliseconds of the session open.
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// ---------------------------------------------------------------------------
// Baselines and RVOL
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub symbol: String,
    pub average_daily_volume: f64,
    pub sample_count: u32,
    pub last_refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RvolResult {
    pub symbol: String,
    pub rvol_ratio: f64,
    pub current_volume: f64,
    pub baseline_volume: f64,
    pub computed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Per-symbol upstream data consumed by subscore providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub published_at: DateTime<Utc>,
    /// Provider polarity in [-1, 1], when the feed carries one.
    pub sentiment: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatData {
    pub float_shares: f64,
    /// Short interest as a fraction of float (0.25 = 25%).
    pub short_interest_ratio: f64,
    pub days_to_cover: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsActivity {
    pub call_volume: f64,
    pub put_volume: f64,
    pub call_open_interest: f64,
    pub put_open_interest: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePrint {
    pub price: f64,
    pub size: f64,
    pub timestamp_ms: i64,
}

// ---------------------------------------------------------------------------
// Subscores
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Momentum,
    VolumeSurge,
    FloatShort,
    Catalyst,
    Sentiment,
    Technical,
    OptionsFlow,
    RealtimeMomentum,
}

impl Component {
    pub const ALL: [Component; 8] = [
        Component::Momentum,
        Component::VolumeSurge,
        Component::FloatShort,
        Component::Catalyst,
        Component::Sentiment,
        Component::Technical,
        Component::OptionsFlow,
        Component::RealtimeMomentum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Momentum => "momentum",
            Component::VolumeSurge => "volume_surge",
            Component::FloatShort => "float_short",
            Component::Catalyst => "catalyst",
            Component::Sentiment => "sentiment",
            Component::Technical => "technical",
            Component::OptionsFlow => "options_flow",
            Component::RealtimeMomentum => "realtime_momentum",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A provider's output. `Unavailable` means "no data" and is never treated as 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscoreValue {
    Available(f64),
    Unavailable,
}

impl SubscoreValue {
    /// Wrap a raw score. Non-finite input is Unavailable; finite input is clamped to [0, 100].
    pub fn score(raw: f64) -> Self {
        if raw.is_finite() {
            SubscoreValue::Available(raw.clamp(0.0, 100.0))
        } else {
            SubscoreValue::Unavailable
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            SubscoreValue::Available(v) => Some(*v),
            SubscoreValue::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SubscoreValue::Available(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscore {
    pub component: Component,
    pub symbol: String,
    pub value: SubscoreValue,
    pub weight_nominal: f64,
}

// ---------------------------------------------------------------------------
// Composite and candidates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub symbol: String,
    pub score: f64,
    pub active_components: Vec<Component>,
    /// component → effective weight; sums to 100.
    pub active_weights: BTreeMap<Component, f64>,
    pub missing_components: Vec<Component>,
    /// Raw subscore values, including unavailable ones, for explainability.
    pub subscores: BTreeMap<Component, SubscoreValue>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    TradeReady,
    Watchlist,
    Monitor,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::TradeReady => "trade_ready",
            Tier::Watchlist => "watchlist",
            Tier::Monitor => "monitor",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trade_ready" => Ok(Tier::TradeReady),
            "watchlist" => Ok(Tier::Watchlist),
            "monitor" => Ok(Tier::Monitor),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub composite_score: f64,
    pub tier: Tier,
    pub subscores: BTreeMap<Component, SubscoreValue>,
    pub active_weights: BTreeMap<Component, f64>,
    pub missing_components: Vec<Component>,
}

/// One cycle's authoritative output. Read-only once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedCandidates {
    pub generation: u64,
    pub generated_at: DateTime<Utc>,
    pub universe_size: usize,
    pub scored_count: usize,
    pub candidates: Vec<Candidate>,
    /// Shadow-mode pre-filter rejections that still ranked watchlist or better.
    pub prefilter_false_negatives: Vec<String>,
}

impl PublishedCandidates {
    pub fn cache_key(&self) -> String {
        format!("candidates:{}:{}", self.generation, self.generated_at.timestamp_millis())
    }
}
