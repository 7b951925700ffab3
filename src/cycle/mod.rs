//! One discovery cycle: snapshot → RVOL → enrichment → scoring → ranking → publish.

pub mod lease;
pub mod prefilter;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{Config, PrefilterConfig, PrefilterMode, DISCOVERY_LOCK_NAME};
use crate::error::{AppError, Result};
use crate::fetcher::{fetch_universe_snapshot, MarketDataSource};
use crate::providers::{compute_subscores, needs_for, ContextLoader};
use crate::rvol::compute_rvol_batch;
use crate::scorer::{rank, score_symbol};
use crate::state::{PolicyStore, ResultCache, VolumeBaselineStore};
use crate::types::{PublishedCandidates, RvolResult, SymbolSnapshot};

pub use lease::CycleLease;

/// Distinguishes cycles created by one process within the same millisecond.
static NEXT_HOLDER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    pub interval: Duration,
    pub rvol_sanity_ceiling: f64,
    pub min_price: f64,
    pub concurrency: usize,
    pub upstream_timeout: Duration,
    pub lock_ttl: Duration,
    pub prefilter: PrefilterConfig,
}

impl CycleSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            interval: Duration::from_secs(cfg.cycle_interval_secs),
            rvol_sanity_ceiling: cfg.rvol_sanity_ceiling,
            min_price: cfg.min_price,
            concurrency: cfg.fanout_concurrency,
            upstream_timeout: Duration::from_secs(cfg.upstream_timeout_secs),
            lock_ttl: Duration::from_secs(cfg.cycle_lock_ttl_secs),
            prefilter: cfg.prefilter,
        }
    }
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            rvol_sanity_ceiling: 1000.0,
            min_price: 0.0,
            concurrency: 6,
            upstream_timeout: Duration::from_secs(10),
            lock_ttl: Duration::from_secs(240),
            prefilter: PrefilterConfig::default(),
        }
    }
}

/// Shared collaborators of the cycle.
#[derive(Clone)]
pub struct CycleDeps {
    pub pool: sqlx::SqlitePool,
    pub source: Arc<dyn MarketDataSource>,
    pub baselines: Arc<VolumeBaselineStore>,
    pub policy: Arc<PolicyStore>,
    pub results: Arc<ResultCache>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Published(Arc<PublishedCandidates>),
    /// Another holder owns the lease; nothing was read or written.
    Skipped,
}

pub struct DiscoveryCycle {
    deps: CycleDeps,
    settings: CycleSettings,
    loader: ContextLoader,
    lease: CycleLease,
    holder: String,
    snapshot_tx: Option<mpsc::Sender<Arc<PublishedCandidates>>>,
}

impl DiscoveryCycle {
    pub fn new(deps: CycleDeps, settings: CycleSettings) -> Self {
        let lease = CycleLease::new(deps.pool.clone(), DISCOVERY_LOCK_NAME, settings.lock_ttl);
        let holder = format!(
            "discovery-{}-{}-{}",
            std::process::id(),
            Utc::now().timestamp_millis(),
            NEXT_HOLDER.fetch_add(1, Ordering::Relaxed),
        );
        Self {
            loader: ContextLoader::new(settings.concurrency, settings.upstream_timeout),
            deps,
            settings,
            lease,
            holder,
            snapshot_tx: None,
        }
    }

    /// Forward every published snapshot to the DB writer.
    pub fn with_snapshot_sink(mut self, tx: mpsc::Sender<Arc<PublishedCandidates>>) -> Self {
        self.snapshot_tx = Some(tx);
        self
    }

    pub async fn run(self) {
        let mut ticker = interval(self.settings.interval);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(CycleOutcome::Published(p)) => debug!(generation = p.generation, "[CYCLE] done"),
                Ok(CycleOutcome::Skipped) => {}
                Err(e) => error!("Discovery cycle failed: {e}"),
            }
        }
    }

    /// Run one cycle under the lease. A held lease returns `Skipped` at once.
    ///
    /// A cycle still running when the lease TTL elapses is abandoned with
    /// `Timeout`, and one whose lease was lost before publishing fails with
    /// `LockHeld`; neither publishes.
    pub async fn run_once(&self) -> Result<CycleOutcome> {
        let started = Instant::now();
        if !self.lease.try_acquire(&self.holder, Utc::now()).await? {
            self.deps.health.record_skipped();
            info!(lease = %self.lease.name(), "[CYCLE] lease held elsewhere, skipping");
            return Ok(CycleOutcome::Skipped);
        }

        let result = match tokio::time::timeout(self.settings.lock_ttl, self.execute()).await {
            Ok(r) => r,
            Err(_) => {
                warn!(ttl_ms = self.settings.lock_ttl.as_millis() as u64, "[CYCLE] cycle outlived its lease, abandoned");
                Err(AppError::Timeout(format!("discovery cycle exceeded lease ttl of {:?}", self.settings.lock_ttl)))
            }
        };

        if let Err(e) = self.lease.release(&self.holder).await {
            warn!("[CYCLE] lease release failed, it will expire: {e}");
        }

        match result {
            Ok(published) => {
                let elapsed = started.elapsed();
                self.deps.latency.record(elapsed);
                self.deps
                    .health
                    .record_completed(published.generated_at.timestamp_millis().max(0) as u64, published.candidates.len());
                info!(
                    generation = published.generation,
                    universe = published.universe_size,
                    scored = published.scored_count,
                    candidates = published.candidates.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "[CYCLE] published generation {}",
                    published.generation,
                );
                Ok(CycleOutcome::Published(published))
            }
            Err(e) => {
                self.deps.health.record_failed();
                Err(e)
            }
        }
    }

    async fn execute(&self) -> Result<Arc<PublishedCandidates>> {
        let policy = self.deps.policy.current();
        let source = self.deps.source.as_ref();

        let (universe, _stats) = fetch_universe_snapshot(source, self.settings.min_price).await?;

        let baselines = self.deps.baselines.get_baselines(universe.keys().map(String::as_str));
        let computed_at = Utc::now();
        let rvols = compute_rvol_batch(&universe, &baselines, self.settings.rvol_sanity_ceiling, computed_at);
        info!(
            universe = universe.len(),
            with_baseline = baselines.len(),
            with_rvol = rvols.len(),
            "[RVOL] {} of {} symbols have a valid ratio",
            rvols.len(),
            universe.len(),
        );

        let mut pairs: Vec<(SymbolSnapshot, RvolResult)> = rvols
            .into_values()
            .filter_map(|r| universe.get(&r.symbol).map(|s| (s.clone(), r)))
            .collect();
        pairs.sort_by(|a, b| a.0.symbol.cmp(&b.0.symbol));

        let (to_score, rejected) = prefilter::apply(&self.settings.prefilter, pairs);

        let inputs = to_score.into_iter().map(|(snap, rvol)| (snap, Some(rvol))).collect();
        let contexts = self.loader.load(source, inputs, needs_for(&policy.weights)).await;

        let mut scores = Vec::with_capacity(contexts.len());
        for ctx in contexts.values() {
            let subscores = compute_subscores(ctx, &policy.weights);
            match score_symbol(&ctx.symbol, &subscores, computed_at) {
                Ok(s) => scores.push(s),
                Err(AppError::AllComponentsMissing(symbol)) => {
                    debug!(symbol = %symbol, "[CYCLE] no usable subscores, omitted from ranking");
                }
                Err(e) => warn!(symbol = %ctx.symbol, "[CYCLE] scoring failed: {e}"),
            }
        }
        let scored_count = scores.len();

        let candidates = rank(scores, &self.deps.policy);

        let prefilter_false_negatives = match self.settings.prefilter.mode {
            PrefilterMode::Shadow => prefilter::false_negatives(&rejected, &candidates),
            _ => Vec::new(),
        };
        if !prefilter_false_negatives.is_empty() {
            info!(
                count = prefilter_false_negatives.len(),
                "[FILTER] shadow pre-filter would have dropped ranked candidates: {:?}",
                prefilter_false_negatives,
            );
        }

        let floor = self.deps.results.next_generation();
        let Some(generation) = self.lease.claim_generation(&self.holder, floor, Utc::now()).await? else {
            return Err(AppError::LockHeld(format!("{} lost before publish", self.lease.name())));
        };

        let published = self.deps.results.publish(PublishedCandidates {
            generation,
            generated_at: Utc::now(),
            universe_size: universe.len(),
            scored_count,
            candidates,
            prefilter_false_negatives,
        });

        if let Some(tx) = &self.snapshot_tx {
            self.deps.health.inc_write_queue_pending();
            if let Err(e) = tx.try_send(Arc::clone(&published)) {
                self.deps.health.dec_write_queue_pending();
                warn!("DB writer channel full: {e}");
            }
        }

        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringPolicy;
    use crate::db::connect_in_memory;
    use crate::fetcher::RawSnapshot;
    use crate::state::BaselineSettings;
    use crate::static_source::StaticMarketData;
    use crate::types::DailyBar;

    fn row(symbol: &str, price: f64, volume: f64) -> RawSnapshot {
        RawSnapshot {
            symbol: symbol.into(),
            last_price: Some(price),
            day_volume: Some(volume),
            prev_close: Some(price),
            prev_volume: Some(volume),
        }
    }

    fn flat_bars(volume: f64) -> Vec<DailyBar> {
        (0..20)
            .map(|i| DailyBar { timestamp_ms: -i, open: 10.0, high: 10.0, low: 10.0, close: 10.0, volume })
            .collect()
    }

    async fn setup(source: StaticMarketData, settings: CycleSettings) -> (DiscoveryCycle, Arc<StaticMarketData>) {
        let pool = connect_in_memory().await.unwrap();
        let source = Arc::new(source);
        let baselines = VolumeBaselineStore::open(pool.clone()).await.unwrap();
        baselines
            .refresh(source.as_ref(), &["AAA".to_string(), "BBB".to_string()], &BaselineSettings::default())
            .await
            .unwrap();
        let deps = CycleDeps {
            pool,
            source: source.clone(),
            baselines,
            policy: PolicyStore::new(ScoringPolicy::default()),
            results: ResultCache::new(Duration::from_secs(300)),
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
        };
        (DiscoveryCycle::new(deps, settings), source)
    }

    fn two_symbols() -> StaticMarketData {
        StaticMarketData::new()
            .with_snapshot(row("AAA", 10.0, 3_000_000.0))
            .with_snapshot(row("BBB", 10.0, 1_000_000.0))
            .with_bars("AAA", flat_bars(1_000_000.0))
            .with_bars("BBB", flat_bars(1_000_000.0))
    }

    #[tokio::test]
    async fn generations_increase_and_lease_is_released() {
        let (cycle, _) = setup(two_symbols(), CycleSettings::default()).await;
        let CycleOutcome::Published(first) = cycle.run_once().await.unwrap() else {
            panic!("expected publish");
        };
        let CycleOutcome::Published(second) = cycle.run_once().await.unwrap() else {
            panic!("expected publish");
        };
        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
        assert!(cycle.lease.current().await.unwrap().is_none());
        assert_eq!(cycle.deps.health.report().cycles_completed, 2);
        assert_eq!(cycle.deps.latency.summary().samples, 2);
    }

    #[tokio::test]
    async fn enforce_prefilter_drops_quiet_symbols() {
        let settings = CycleSettings {
            prefilter: PrefilterConfig { mode: PrefilterMode::Enforce, min_change_pct: 2.0, min_rvol: 1.5 },
            ..CycleSettings::default()
        };
        let (cycle, _) = setup(two_symbols(), settings).await;
        let CycleOutcome::Published(p) = cycle.run_once().await.unwrap() else {
            panic!("expected publish");
        };
        let symbols: Vec<&str> = p.candidates.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, ["AAA"]);
        assert!(p.prefilter_false_negatives.is_empty());
    }

    #[tokio::test]
    async fn failed_bulk_counts_as_failed_cycle() {
        let (cycle, _) = setup(two_symbols().failing_bulk(), CycleSettings::default()).await;
        assert!(matches!(cycle.run_once().await, Err(AppError::SourceUnavailable(_))));
        assert_eq!(cycle.deps.health.report().cycles_failed, 1);
        assert!(cycle.deps.results.latest().is_none());
        assert!(cycle.lease.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn published_snapshot_reaches_the_sink() {
        let (cycle, _) = setup(two_symbols(), CycleSettings::default()).await;
        let (tx, mut rx) = mpsc::channel(4);
        let cycle = cycle.with_snapshot_sink(tx);
        cycle.run_once().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().generation, 1);
    }
}
