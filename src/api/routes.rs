use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::health::{HealthReport, HealthState};
use crate::api::latency::{LatencyStats, LatencySummary};
use crate::config::ScoringPolicy;
use crate::error::AppError;
use crate::state::{PolicyStore, ResultCache, VolumeBaselineStore};
use crate::types::{BaselineRecord, Candidate, Tier};

/// Default and maximum page size for /candidates.
const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Clone)]
pub struct ApiState {
    pub results: Arc<ResultCache>,
    pub baselines: Arc<VolumeBaselineStore>,
    pub policy: Arc<PolicyStore>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/candidates", get(get_candidates))
        .route("/candidates/:symbol", get(get_candidate))
        .route("/baselines/:symbol", get(get_baseline))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/policy", get(get_policy).put(put_policy))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct CandidatesQuery {
    pub tier: Option<String>,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CandidatesResponse {
    pub generation: u64,
    pub generated_at: DateTime<Utc>,
    pub cache_key: String,
    pub stale: bool,
    pub universe_size: usize,
    pub scored_count: usize,
    pub prefilter_false_negatives: Vec<String>,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Serialize)]
pub struct CandidateResponse {
    pub generation: u64,
    pub stale: bool,
    /// 1-based position in the ranking.
    pub rank: usize,
    pub candidate: Candidate,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub baselines: usize,
    pub latest_generation: Option<u64>,
    pub stale: Option<bool>,
    #[serde(flatten)]
    pub cycles: HealthReport,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_candidates(
    State(state): State<ApiState>,
    Query(params): Query<CandidatesQuery>,
) -> Result<Json<CandidatesResponse>, AppError> {
    let latest = state
        .results
        .latest()
        .ok_or_else(|| AppError::NotFound("no candidate snapshot published yet".to_string()))?;

    let tier = params
        .tier
        .as_deref()
        .map(|t| t.parse::<Tier>().map_err(AppError::Config))
        .transpose()?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let candidates = latest
        .candidates
        .iter()
        .filter(|c| tier.map_or(true, |t| c.tier == t))
        .take(limit)
        .cloned()
        .collect();

    Ok(Json(CandidatesResponse {
        generation: latest.generation,
        generated_at: latest.generated_at,
        cache_key: latest.cache_key(),
        stale: state.results.is_stale(&latest),
        universe_size: latest.universe_size,
        scored_count: latest.scored_count,
        prefilter_false_negatives: latest.prefilter_false_negatives.clone(),
        candidates,
    }))
}

async fn get_candidate(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> Result<Json<CandidateResponse>, AppError> {
    let symbol = symbol.to_uppercase();
    let latest = state
        .results
        .latest()
        .ok_or_else(|| AppError::NotFound("no candidate snapshot published yet".to_string()))?;

    let (idx, candidate) = latest
        .candidates
        .iter()
        .enumerate()
        .find(|(_, c)| c.symbol == symbol)
        .ok_or_else(|| AppError::NotFound(format!("{symbol} not ranked in generation {}", latest.generation)))?;

    Ok(Json(CandidateResponse {
        generation: latest.generation,
        stale: state.results.is_stale(&latest),
        rank: idx + 1,
        candidate: candidate.clone(),
    }))
}

async fn get_baseline(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> Result<Json<BaselineRecord>, AppError> {
    let symbol = symbol.to_uppercase();
    state
        .baselines
        .get(&symbol)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no baseline for {symbol}")))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let latest = state.results.latest();
    Json(HealthResponse {
        status: "ok",
        baselines: state.baselines.len(),
        latest_generation: latest.as_ref().map(|p| p.generation),
        stale: latest.as_ref().map(|p| state.results.is_stale(p)),
        cycles: state.health.report(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}

async fn get_policy(State(state): State<ApiState>) -> Json<ScoringPolicy> {
    Json(state.policy.current())
}

async fn put_policy(
    State(state): State<ApiState>,
    Json(policy): Json<ScoringPolicy>,
) -> Result<Json<ScoringPolicy>, AppError> {
    state.policy.update(policy)?;
    Ok(Json(state.policy.current()))
}
