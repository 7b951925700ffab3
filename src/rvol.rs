use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{RvolResult, SymbolSnapshot};

/// Relative volume for every symbol present in both inputs.
///
/// Omitted, never clamped or defaulted: baseline ≤ 0, negative current volume,
/// a non-finite ratio, or a ratio above `sanity_ceiling` (bad tick or
/// unadjusted split data). Pure apart from stamping `computed_at`.
pub fn compute_rvol_batch(
    snapshots: &HashMap<String, SymbolSnapshot>,
    baselines: &HashMap<String, f64>,
    sanity_ceiling: f64,
    computed_at: DateTime<Utc>,
) -> HashMap<String, RvolResult> {
    let mut out = HashMap::with_capacity(snapshots.len().min(baselines.len()));
    let mut rejected = 0usize;

    for (symbol, snap) in snapshots {
        let Some(&baseline) = baselines.get(symbol) else {
            continue;
        };
        match compute_rvol(snap.current_volume, baseline, sanity_ceiling) {
            Some(ratio) => {
                out.insert(
                    symbol.clone(),
                    RvolResult {
                        symbol: symbol.clone(),
                        rvol_ratio: ratio,
                        current_volume: snap.current_volume,
                        baseline_volume: baseline,
                        computed_at,
                    },
                );
            }
            None => {
                rejected += 1;
                debug!(
                    symbol = %symbol,
                    current_volume = snap.current_volume,
                    baseline,
                    "[RVOL] rejected out-of-bounds ratio"
                );
            }
        }
    }

    debug!(accepted = out.len(), rejected, "[RVOL] batch computed");
    out
}

/// Single ratio with the same validation rules as the batch.
pub fn compute_rvol(current_volume: f64, baseline: f64, sanity_ceiling: f64) -> Option<f64> {
    if !(baseline.is_finite() && baseline > 0.0) {
        return None;
    }
    if !current_volume.is_finite() || current_volume < 0.0 {
        return None;
    }
    let ratio = current_volume / baseline;
    if !ratio.is_finite() || ratio > sanity_ceiling {
        return None;
    }
    Some(ratio)
}
