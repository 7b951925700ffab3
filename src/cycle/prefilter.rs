use std::collections::BTreeSet;

use tracing::info;

use crate::config::{PrefilterConfig, PrefilterMode};
use crate::types::{Candidate, RvolResult, SymbolSnapshot, Tier};

/// A symbol passes on a large enough intraday move or on high RVOL alone.
/// Previous-session fallbacks have no intraday move and pass only on RVOL.
pub fn passes(snapshot: &SymbolSnapshot, rvol: &RvolResult, cfg: &PrefilterConfig) -> bool {
    if rvol.rvol_ratio >= cfg.min_rvol {
        return true;
    }
    snapshot
        .change_pct()
        .map_or(false, |pct| pct.abs() >= cfg.min_change_pct)
}

/// Split `(snapshot, rvol)` pairs into the ones to score and the symbols the
/// filter rejects. In shadow mode rejected symbols are still scored.
pub fn apply(
    cfg: &PrefilterConfig,
    pairs: Vec<(SymbolSnapshot, RvolResult)>,
) -> (Vec<(SymbolSnapshot, RvolResult)>, BTreeSet<String>) {
    if cfg.mode == PrefilterMode::Off {
        return (pairs, BTreeSet::new());
    }

    let rejected: BTreeSet<String> = pairs
        .iter()
        .filter(|(snap, rvol)| !passes(snap, rvol, cfg))
        .map(|(snap, _)| snap.symbol.clone())
        .collect();

    info!(
        mode = ?cfg.mode,
        evaluated = pairs.len(),
        rejected = rejected.len(),
        "[FILTER] momentum pre-filter"
    );

    let kept = match cfg.mode {
        PrefilterMode::Enforce => pairs.into_iter().filter(|(s, _)| !rejected.contains(&s.symbol)).collect(),
        _ => pairs,
    };
    (kept, rejected)
}

/// Rejected symbols that still ranked watchlist or better, in rank order.
pub fn false_negatives(rejected: &BTreeSet<String>, ranked: &[Candidate]) -> Vec<String> {
    ranked
        .iter()
        .filter(|c| c.tier != Tier::Monitor && rejected.contains(&c.symbol))
        .map(|c| c.symbol.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn pair(symbol: &str, price: f64, prev_close: f64, rvol: f64) -> (SymbolSnapshot, RvolResult) {
        let now = Utc::now();
        (
            SymbolSnapshot {
                symbol: symbol.into(),
                current_price: price,
                current_volume: 1_000.0,
                previous_close: prev_close,
                previous_volume: 1_000.0,
                captured_at: now,
                from_previous_session: false,
            },
            RvolResult {
                symbol: symbol.into(),
                rvol_ratio: rvol,
                current_volume: 1_000.0,
                baseline_volume: 1_000.0 / rvol.max(f64::MIN_POSITIVE),
                computed_at: now,
            },
        )
    }

    fn candidate(symbol: &str, tier: Tier) -> Candidate {
        Candidate {
            symbol: symbol.into(),
            composite_score: 0.0,
            tier,
            subscores: BTreeMap::new(),
            active_weights: BTreeMap::new(),
            missing_components: vec![],
        }
    }

    fn cfg(mode: PrefilterMode) -> PrefilterConfig {
        PrefilterConfig { mode, ..PrefilterConfig::default() }
    }

    #[test]
    fn passes_on_move_or_rvol() {
        let c = cfg(PrefilterMode::Enforce);
        let (s, r) = pair("MOVE", 10.5, 10.0, 1.0);
        assert!(passes(&s, &r, &c));
        let (s, r) = pair("VOL", 10.0, 10.0, 2.0);
        assert!(passes(&s, &r, &c));
        let (s, r) = pair("QUIET", 10.1, 10.0, 1.0);
        assert!(!passes(&s, &r, &c));
    }

    #[test]
    fn off_mode_keeps_everything_and_reports_nothing() {
        let (kept, rejected) = apply(&cfg(PrefilterMode::Off), vec![pair("QUIET", 10.0, 10.0, 1.0)]);
        assert_eq!(kept.len(), 1);
        assert!(rejected.is_empty());
    }

    #[test]
    fn enforce_drops_and_shadow_keeps() {
        let input = || vec![pair("QUIET", 10.0, 10.0, 1.0), pair("VOL", 10.0, 10.0, 3.0)];

        let (kept, rejected) = apply(&cfg(PrefilterMode::Enforce), input());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].0.symbol, "VOL");
        assert!(rejected.contains("QUIET"));

        let (kept, rejected) = apply(&cfg(PrefilterMode::Shadow), input());
        assert_eq!(kept.len(), 2);
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn false_negatives_skip_monitor_tier() {
        let rejected: BTreeSet<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let ranked = vec![
            candidate("A", Tier::TradeReady),
            candidate("X", Tier::Watchlist),
            candidate("B", Tier::Watchlist),
            candidate("C", Tier::Monitor),
        ];
        assert_eq!(false_negatives(&rejected, &ranked), vec!["A".to_string(), "B".to_string()]);
    }
}
