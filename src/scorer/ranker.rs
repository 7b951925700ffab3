use std::cmp::Ordering;

use crate::config::TierThresholds;
use crate::state::PolicyStore;
use crate::types::{Candidate, CompositeScore, Tier};

/// Rank with whatever tier thresholds are live at call time.
pub fn rank(scores: Vec<CompositeScore>, policy: &PolicyStore) -> Vec<Candidate> {
    let tiers = policy.current().tiers;
    rank_with(scores, &tiers)
}

/// Descending composite, ties broken by symbol so the order is deterministic.
pub fn rank_with(mut scores: Vec<CompositeScore>, tiers: &TierThresholds) -> Vec<Candidate> {
    scores.retain(|s| s.score.is_finite());
    scores.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.symbol.cmp(&b.symbol),
        other => other,
    });

    scores
        .into_iter()
        .map(|s| Candidate {
            tier: classify(s.score, tiers),
            symbol: s.symbol,
            composite_score: s.score,
            subscores: s.subscores,
            active_weights: s.active_weights,
            missing_components: s.missing_components,
        })
        .collect()
}

pub fn classify(score: f64, tiers: &TierThresholds) -> Tier {
    if score >= tiers.trade_ready {
        Tier::TradeReady
    } else if score >= tiers.watchlist {
        Tier::Watchlist
    } else {
        Tier::Monitor
    }
}
