use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::types::Component;

pub const MARKET_DATA_URL: &str = "https://api.polygon.io";

/// Channel capacity for internal message routing.
pub const CHANNEL_CAPACITY: usize = 64;

/// Name of the lease row guarding the discovery cycle.
pub const DISCOVERY_LOCK_NAME: &str = "discovery_cycle";

/// Trading sessions of history fetched for the technical and momentum providers.
pub const HISTORY_LOOKBACK_DAYS: usize = 30;

/// News older than this does not count toward catalyst or sentiment.
pub const NEWS_LOOKBACK_HOURS: i64 = 72;

/// Maximum history requests per second during baseline refresh.
pub const HISTORY_REQUESTS_PER_SEC: u32 = 20;

/// Default nominal weights. They do not need to sum to 100; the composite rescales.
pub mod default_weights {
    pub const MOMENTUM: f64 = 20.0;
    pub const VOLUME_SURGE: f64 = 20.0;
    pub const FLOAT_SHORT: f64 = 15.0;
    pub const CATALYST: f64 = 15.0;
    pub const SENTIMENT: f64 = 10.0;
    pub const TECHNICAL: f64 = 10.0;
    pub const OPTIONS_FLOW: f64 = 5.0;
    pub const REALTIME_MOMENTUM: f64 = 5.0;
}

// ---------------------------------------------------------------------------
// Scoring policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub trade_ready: f64,
    pub watchlist: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self { trade_ready: 75.0, watchlist: 50.0 }
    }
}

/// Weights and tier thresholds. Read by the scorer and ranker at call time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub weights: BTreeMap<Component, f64>,
    pub tiers: TierThresholds,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        use default_weights::*;
        let weights = BTreeMap::from([
            (Component::Momentum, MOMENTUM),
            (Component::VolumeSurge, VOLUME_SURGE),
            (Component::FloatShort, FLOAT_SHORT),
            (Component::Catalyst, CATALYST),
            (Component::Sentiment, SENTIMENT),
            (Component::Technical, TECHNICAL),
            (Component::OptionsFlow, OPTIONS_FLOW),
            (Component::RealtimeMomentum, REALTIME_MOMENTUM),
        ]);
        Self { weights, tiers: TierThresholds::default() }
    }
}

impl ScoringPolicy {
    pub fn weight(&self, component: Component) -> f64 {
        self.weights.get(&component).copied().unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<()> {
        for (component, w) in &self.weights {
            if !w.is_finite() || *w < 0.0 {
                return Err(AppError::Config(format!(
                    "weight for {component} must be a non-negative number, got {w}"
                )));
            }
        }
        let t = &self.tiers;
        if !(t.trade_ready.is_finite() && t.watchlist.is_finite()) || t.watchlist > t.trade_ready {
            return Err(AppError::Config(format!(
                "tier thresholds must satisfy watchlist <= trade_ready (got {} / {})",
                t.watchlist, t.trade_ready
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Momentum pre-filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefilterMode {
    /// Every RVOL-qualified symbol is scored.
    Off,
    /// Everything is scored; the filter's would-be rejections are reported.
    Shadow,
    /// Rejected symbols are never scored.
    Enforce,
}

impl FromStr for PrefilterMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" | "" => Ok(PrefilterMode::Off),
            "shadow" => Ok(PrefilterMode::Shadow),
            "enforce" => Ok(PrefilterMode::Enforce),
            other => Err(AppError::Config(format!("PREFILTER_MODE must be off|shadow|enforce, got '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrefilterConfig {
    pub mode: PrefilterMode,
    /// Minimum absolute intraday percent change to pass.
    pub min_change_pct: f64,
    /// A symbol passes regardless of price change when RVOL reaches this.
    pub min_rvol: f64,
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self { mode: PrefilterMode::Off, min_change_pct: 2.0, min_rvol: 1.5 }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub market_data_url: String,
    pub market_data_api_key: String,
    /// Per-upstream-call timeout (UPSTREAM_TIMEOUT_SECS)
    pub upstream_timeout_secs: u64,
    /// Seconds between discovery cycles (CYCLE_INTERVAL_SECS)
    pub cycle_interval_secs: u64,
    /// Seconds between baseline refreshes (BASELINE_REFRESH_INTERVAL_SECS)
    pub baseline_refresh_interval_secs: u64,
    /// Sessions averaged into a baseline (BASELINE_WINDOW_DAYS)
    pub baseline_window_days: usize,
    /// Minimum positive-volume sessions for a baseline to be written (BASELINE_MIN_SAMPLES)
    pub baseline_min_samples: usize,
    /// RVOL values above this are discarded as corrupt (RVOL_SANITY_CEILING)
    pub rvol_sanity_ceiling: f64,
    /// Cap on concurrent upstream calls (FANOUT_CONCURRENCY)
    pub fanout_concurrency: usize,
    /// Discovery lease lifetime (CYCLE_LOCK_TTL_SECS)
    pub cycle_lock_ttl_secs: u64,
    /// Published snapshots older than this are served as stale (RESULT_TTL_SECS)
    pub result_ttl_secs: u64,
    /// Symbols priced below this are excluded; 0 disables (MIN_PRICE)
    pub min_price: f64,
    pub policy: ScoringPolicy,
    pub prefilter: PrefilterConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let policy = policy_from_env()?;

        let defaults = PrefilterConfig::default();
        let prefilter = PrefilterConfig {
            mode: std::env::var("PREFILTER_MODE").unwrap_or_default().parse()?,
            min_change_pct: env_or("PREFILTER_MIN_CHANGE_PCT", defaults.min_change_pct),
            min_rvol: env_or("PREFILTER_MIN_RVOL", defaults.min_rvol),
        };

        let cfg = Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "discovery.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            market_data_url: std::env::var("MARKET_DATA_URL")
                .unwrap_or_else(|_| MARKET_DATA_URL.to_string()),
            market_data_api_key: std::env::var("MARKET_DATA_API_KEY").unwrap_or_default(),
            upstream_timeout_secs: env_or("UPSTREAM_TIMEOUT_SECS", 10),
            cycle_interval_secs: env_or("CYCLE_INTERVAL_SECS", 60),
            baseline_refresh_interval_secs: env_or("BASELINE_REFRESH_INTERVAL_SECS", 86_400),
            baseline_window_days: env_or("BASELINE_WINDOW_DAYS", 20),
            baseline_min_samples: env_or("BASELINE_MIN_SAMPLES", 10),
            rvol_sanity_ceiling: env_or("RVOL_SANITY_CEILING", 1000.0),
            fanout_concurrency: env_or("FANOUT_CONCURRENCY", 6usize).max(1),
            cycle_lock_ttl_secs: env_or("CYCLE_LOCK_TTL_SECS", 240),
            result_ttl_secs: env_or("RESULT_TTL_SECS", 300),
            min_price: env_or("MIN_PRICE", 0.0),
            policy,
            prefilter,
        };

        if cfg.baseline_min_samples > cfg.baseline_window_days {
            return Err(AppError::Config(format!(
                "BASELINE_MIN_SAMPLES ({}) cannot exceed BASELINE_WINDOW_DAYS ({})",
                cfg.baseline_min_samples, cfg.baseline_window_days
            )));
        }

        Ok(cfg)
    }
}

/// Scoring policy from `WEIGHT_<COMPONENT>` and `TIER_*`. Unparsable values
/// keep their defaults like every other numeric; a parsed negative weight or
/// inverted tiers still fail validation.
fn policy_from_env() -> Result<ScoringPolicy> {
    let mut policy = ScoringPolicy::default();
    for component in Component::ALL {
        let key = format!("WEIGHT_{}", component.as_str().to_uppercase());
        let w = env_or(&key, policy.weight(component));
        policy.weights.insert(component, w);
    }
    policy.tiers.trade_ready = env_or("TIER_TRADE_READY", policy.tiers.trade_ready);
    policy.tiers.watchlist = env_or("TIER_WATCHLIST", policy.tiers.watchlist);
    policy.validate()?;
    Ok(policy)
}

/// Parse an env var, falling back to `default` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
