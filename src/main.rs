use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rvol_scanner::api::{router, ApiState, HealthState, LatencyStats};
use rvol_scanner::baseline_refresh::BaselineRefresher;
use rvol_scanner::config::{Config, CHANNEL_CAPACITY};
use rvol_scanner::cycle::{CycleDeps, CycleSettings, DiscoveryCycle};
use rvol_scanner::db;
use rvol_scanner::db::writer::{load_latest, DbWriter};
use rvol_scanner::error::Result;
use rvol_scanner::fetcher::{HttpMarketData, MarketDataSource};
use rvol_scanner::state::{PolicyStore, ResultCache, VolumeBaselineStore};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Stores ---
    let baselines = VolumeBaselineStore::open(pool.clone()).await?;
    let policy = PolicyStore::new(cfg.policy.clone());
    let results = ResultCache::new(Duration::from_secs(cfg.result_ttl_secs));
    if let Some(snapshot) = load_latest(&pool).await? {
        info!(
            generation = snapshot.generation,
            "Serving persisted generation {} until the first cycle completes",
            snapshot.generation,
        );
        results.publish(snapshot);
    }
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    // --- Market data ---
    if cfg.market_data_api_key.is_empty() {
        warn!("MARKET_DATA_API_KEY not set; provider calls will likely be rejected");
    }
    let source: Arc<dyn MarketDataSource> = Arc::new(HttpMarketData::new(&cfg)?);

    // --- Baseline warm-up + scheduled refresh ---
    let refresher = BaselineRefresher::from_config(&cfg, Arc::clone(&source), Arc::clone(&baselines));
    if baselines.is_empty() {
        info!("[BASELINE] no persisted baselines, running initial refresh");
        if let Err(e) = refresher.refresh_once().await {
            warn!("[BASELINE] initial refresh failed, cycles will score nothing until it succeeds: {e}");
        }
    }
    tokio::spawn(async move { refresher.run().await });

    // --- Snapshot persistence ---
    let (snapshot_tx, snapshot_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let writer = DbWriter::new(pool.clone(), snapshot_rx, Arc::clone(&health));
    tokio::spawn(async move { writer.run().await });

    // --- Discovery cycle ---
    let deps = CycleDeps {
        pool: pool.clone(),
        source,
        baselines: Arc::clone(&baselines),
        policy: Arc::clone(&policy),
        results: Arc::clone(&results),
        health: Arc::clone(&health),
        latency: Arc::clone(&latency),
    };
    let cycle = DiscoveryCycle::new(deps, CycleSettings::from_config(&cfg)).with_snapshot_sink(snapshot_tx);
    info!(
        interval_secs = cfg.cycle_interval_secs,
        concurrency = cfg.fanout_concurrency,
        prefilter = ?cfg.prefilter.mode,
        "Discovery cycle scheduled every {}s",
        cfg.cycle_interval_secs,
    );
    tokio::spawn(async move { cycle.run().await });

    // --- HTTP API server ---
    let api_state = ApiState { results, baselines, policy, health, latency };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
