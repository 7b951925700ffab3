use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use rvol_scanner::api::{HealthState, LatencyStats};
use rvol_scanner::config::{PrefilterConfig, PrefilterMode, ScoringPolicy, DISCOVERY_LOCK_NAME};
use rvol_scanner::cycle::{CycleDeps, CycleLease, CycleOutcome, CycleSettings, DiscoveryCycle};
use rvol_scanner::db::connect_in_memory;
use rvol_scanner::db::writer::{load_latest, write_snapshot};
use rvol_scanner::error::AppError;
use rvol_scanner::fetcher::RawSnapshot;
use rvol_scanner::state::{BaselineSettings, PolicyStore, ResultCache, VolumeBaselineStore};
use rvol_scanner::static_source::StaticMarketData;
use rvol_scanner::types::{Component, DailyBar, NewsItem, PublishedCandidates, SubscoreValue, Tier};

fn snapshot(symbol: &str, price: f64, volume: f64, prev_close: f64, prev_volume: f64) -> RawSnapshot {
    RawSnapshot {
        symbol: symbol.into(),
        last_price: Some(price),
        day_volume: Some(volume),
        prev_close: Some(prev_close),
        prev_volume: Some(prev_volume),
    }
}

/// 30 sessions, newest first, closes stepping down 0.10 per session back.
fn rising_bars(latest_close: f64, volume: f64) -> Vec<DailyBar> {
    (0..30)
        .map(|i| {
            let close = latest_close - 0.1 * i as f64;
            DailyBar { timestamp_ms: -(i as i64), open: close, high: close, low: close, close, volume }
        })
        .collect()
}

fn flat_bars(close: f64, volume: f64) -> Vec<DailyBar> {
    (0..30)
        .map(|i| DailyBar { timestamp_ms: -(i as i64), open: close, high: close, low: close, close, volume })
        .collect()
}

fn bullish_news() -> Vec<NewsItem> {
    let now = Utc::now();
    vec![
        NewsItem { title: "ABC wins contract".into(), published_at: now - chrono::Duration::hours(1), sentiment: Some(1.0) },
        NewsItem { title: "ABC raises guidance".into(), published_at: now - chrono::Duration::hours(2), sentiment: Some(1.0) },
    ]
}

fn market() -> StaticMarketData {
    StaticMarketData::new()
        .with_snapshot(snapshot("ABC", 10.0, 5_000_000.0, 9.0, 1_000_000.0))
        .with_snapshot(snapshot("QUIET", 20.0, 500_000.0, 20.0, 1_000_000.0))
        .with_snapshot(snapshot("DEAD", 5.0, 0.0, 5.0, 0.0))
        .with_snapshot(snapshot("NOBASE", 8.0, 2_000_000.0, 7.0, 1_000_000.0))
        .with_bars("ABC", rising_bars(9.0, 1_000_000.0))
        .with_bars("QUIET", flat_bars(20.0, 1_000_000.0))
        .with_bars("DEAD", flat_bars(5.0, 1_000_000.0))
        .with_news("ABC", bullish_news())
}

struct Harness {
    cycle: DiscoveryCycle,
    source: Arc<StaticMarketData>,
    deps: CycleDeps,
}

/// Baselines always come from the healthy market so the cycle's source can
/// be degraded independently.
async fn harness(source: StaticMarketData, settings: CycleSettings) -> Harness {
    let pool = connect_in_memory().await.unwrap();
    let source = Arc::new(source);
    let baselines = VolumeBaselineStore::open(pool.clone()).await.unwrap();
    let report = baselines
        .refresh(
            &market(),
            &["ABC".to_string(), "QUIET".to_string(), "DEAD".to_string()],
            &BaselineSettings::default(),
        )
        .await
        .unwrap();
    assert_eq!(report.updated, 3);

    let deps = CycleDeps {
        pool,
        source: source.clone(),
        baselines,
        policy: PolicyStore::new(ScoringPolicy::default()),
        results: ResultCache::new(Duration::from_secs(300)),
        health: Arc::new(HealthState::new()),
        latency: Arc::new(LatencyStats::new()),
    };
    Harness { cycle: DiscoveryCycle::new(deps.clone(), settings), source, deps }
}

async fn publish(h: &Harness) -> Arc<PublishedCandidates> {
    match h.cycle.run_once().await.unwrap() {
        CycleOutcome::Published(p) => p,
        CycleOutcome::Skipped => panic!("cycle unexpectedly skipped"),
    }
}

#[tokio::test]
async fn abc_surges_to_trade_ready() {
    let h = harness(market(), CycleSettings::default()).await;
    let published = publish(&h).await;

    assert_eq!(published.generation, 1);
    assert_eq!(published.universe_size, 3, "DEAD has no volume in either session");

    let abc = &published.candidates[0];
    assert_eq!(abc.symbol, "ABC");
    assert_eq!(abc.tier, Tier::TradeReady);
    assert!(abc.composite_score >= 75.0, "{}", abc.composite_score);

    // RVOL 5.0 maps onto the 80-point anchor.
    assert_eq!(abc.subscores[&Component::VolumeSurge], SubscoreValue::Available(80.0));
    for missing in [Component::FloatShort, Component::OptionsFlow, Component::RealtimeMomentum] {
        assert_eq!(abc.subscores[&missing], SubscoreValue::Unavailable);
        assert!(abc.missing_components.contains(&missing));
    }
    let total: f64 = abc.active_weights.values().sum();
    assert!((total - 100.0).abs() < 1e-9);
    assert!((abc.active_weights[&Component::Momentum] - 20.0 / 75.0 * 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn quiet_symbol_ranks_below_and_unbaselined_symbol_is_absent() {
    let h = harness(market(), CycleSettings::default()).await;
    let published = publish(&h).await;

    let symbols: Vec<&str> = published.candidates.iter().map(|c| c.symbol.as_str()).collect();
    assert_eq!(symbols, ["ABC", "QUIET"]);
    assert_eq!(published.candidates[1].tier, Tier::Monitor);
}

#[tokio::test]
async fn one_bulk_call_per_cycle_and_history_cached_for_the_day() {
    let h = harness(market(), CycleSettings::default()).await;

    publish(&h).await;
    publish(&h).await;

    assert_eq!(h.source.bulk_calls(), 2);
    // Two scored symbols, history fetched once each across both cycles.
    assert_eq!(h.source.history_calls(), 2);
}

#[tokio::test]
async fn unavailable_source_yields_no_candidates() {
    let h = harness(market().failing_bulk(), CycleSettings::default()).await;
    assert!(matches!(h.cycle.run_once().await, Err(AppError::SourceUnavailable(_))));
    assert!(h.deps.results.latest().is_none());
    assert_eq!(h.deps.health.report().cycles_failed, 1);
}

#[tokio::test]
async fn held_lease_skips_without_writes() {
    let h = harness(market(), CycleSettings::default()).await;
    let other = CycleLease::new(h.deps.pool.clone(), DISCOVERY_LOCK_NAME, Duration::from_secs(240));
    assert!(other.try_acquire("other-process", Utc::now()).await.unwrap());

    assert!(matches!(h.cycle.run_once().await.unwrap(), CycleOutcome::Skipped));
    assert_eq!(h.source.bulk_calls(), 0);
    assert!(h.deps.results.latest().is_none());
    assert_eq!(h.deps.health.report().cycles_skipped, 1);
    assert_eq!(other.current().await.unwrap().unwrap().holder, "other-process");
}

#[tokio::test]
async fn cycle_outliving_its_lease_is_abandoned() {
    let short = CycleSettings { lock_ttl: Duration::from_millis(500), ..CycleSettings::default() };
    let slow = harness(market().delayed_symbol("ABC", Duration::from_secs(3)), short).await;
    let fast = DiscoveryCycle::new(
        CycleDeps {
            source: Arc::new(market()),
            results: ResultCache::new(Duration::from_secs(300)),
            ..slow.deps.clone()
        },
        CycleSettings::default(),
    );

    let (slow_res, fast_res) = tokio::join!(slow.cycle.run_once(), async {
        tokio::time::sleep(Duration::from_millis(800)).await;
        fast.run_once().await
    });

    assert!(matches!(slow_res, Err(AppError::Timeout(_))), "{slow_res:?}");
    assert!(slow.deps.results.latest().is_none());
    assert_eq!(slow.deps.health.report().cycles_failed, 1);
    assert!(matches!(fast_res.unwrap(), CycleOutcome::Published(_)));
}

#[tokio::test]
async fn cycle_that_loses_its_lease_does_not_publish() {
    let h = harness(market().delayed_symbol("ABC", Duration::from_millis(600)), CycleSettings::default()).await;

    let (res, _) = tokio::join!(h.cycle.run_once(), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        sqlx::query("UPDATE cycle_locks SET holder = 'other-process' WHERE name = ?")
            .bind(DISCOVERY_LOCK_NAME)
            .execute(&h.deps.pool)
            .await
            .unwrap();
    });

    assert!(matches!(res, Err(AppError::LockHeld(_))), "{res:?}");
    assert!(h.deps.results.latest().is_none());
    let lease = CycleLease::new(h.deps.pool.clone(), DISCOVERY_LOCK_NAME, Duration::from_secs(240));
    assert_eq!(lease.current().await.unwrap().unwrap().holder, "other-process");
}

#[tokio::test]
async fn cycles_sharing_a_database_never_reuse_a_generation() {
    let a = harness(market(), CycleSettings::default()).await;
    let b = DiscoveryCycle::new(
        CycleDeps { results: ResultCache::new(Duration::from_secs(300)), ..a.deps.clone() },
        CycleSettings::default(),
    );

    let first = publish(&a).await;
    let CycleOutcome::Published(second) = b.run_once().await.unwrap() else {
        panic!("cycle unexpectedly skipped");
    };
    assert_eq!(first.generation, 1);
    assert_eq!(second.generation, 2);

    write_snapshot(&a.deps.pool, &first).await.unwrap();
    write_snapshot(&a.deps.pool, &second).await.unwrap();
    let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM candidate_snapshots")
        .fetch_one(&a.deps.pool)
        .await
        .unwrap();
    assert_eq!(rows, 2);
    assert_eq!(load_latest(&a.deps.pool).await.unwrap().unwrap().generation, 2);
}

#[tokio::test]
async fn failing_enrichment_degrades_to_unavailable() {
    let h = harness(market().failing_symbol("ABC"), CycleSettings::default()).await;
    let published = publish(&h).await;

    let abc = published.candidates.iter().find(|c| c.symbol == "ABC").unwrap();
    // Only snapshot-derived components survive a dead per-symbol upstream.
    assert_eq!(abc.subscores[&Component::Catalyst], SubscoreValue::Unavailable);
    assert_eq!(abc.subscores[&Component::VolumeSurge], SubscoreValue::Available(80.0));
    assert!(abc.subscores[&Component::Momentum].is_available());
}

#[tokio::test]
async fn shadow_prefilter_reports_without_dropping() {
    let settings = CycleSettings {
        prefilter: PrefilterConfig { mode: PrefilterMode::Shadow, min_change_pct: 50.0, min_rvol: 100.0 },
        ..CycleSettings::default()
    };
    let h = harness(market(), settings).await;
    let published = publish(&h).await;

    assert_eq!(published.candidates.len(), 2);
    assert_eq!(published.prefilter_false_negatives, vec!["ABC".to_string()]);
}

#[tokio::test]
async fn tier_threshold_change_applies_next_cycle() {
    let h = harness(market(), CycleSettings::default()).await;
    let first = publish(&h).await;
    assert_eq!(first.candidates[0].tier, Tier::TradeReady);

    let mut policy = h.deps.policy.current();
    policy.tiers.trade_ready = 99.9;
    policy.tiers.watchlist = 99.0;
    h.deps.policy.update(policy).unwrap();

    let second = publish(&h).await;
    assert_eq!(second.generation, 2);
    assert_eq!(second.candidates[0].tier, Tier::Monitor);
}
