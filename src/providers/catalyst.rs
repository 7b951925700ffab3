use chrono::{DateTime, Utc};

use crate::config::NEWS_LOOKBACK_HOURS;
use crate::providers::SymbolContext;
use crate::types::{NewsItem, SubscoreValue};

/// An article's weight halves every this many hours.
const HALF_LIFE_HOURS: f64 = 12.0;

/// Recency-weighted news presence.
///
/// Each article inside the lookback contributes `0.5^(age / half_life)`; the
/// sum saturates as `100 * (1 - e^-sum)`. A successful fetch with no news is a
/// real 0. A failed fetch is Unavailable.
pub fn score(ctx: &SymbolContext) -> SubscoreValue {
    match ctx.news.as_ref() {
        Some(items) => SubscoreValue::score(catalyst_score(items, ctx.as_of)),
        None => SubscoreValue::Unavailable,
    }
}

pub fn recency_weight(published_at: DateTime<Utc>, as_of: DateTime<Utc>) -> Option<f64> {
    let age_hours = (as_of - published_at).num_seconds().max(0) as f64 / 3600.0;
    (age_hours <= NEWS_LOOKBACK_HOURS as f64).then(|| 0.5f64.powf(age_hours / HALF_LIFE_HOURS))
}

pub fn catalyst_score(items: &[NewsItem], as_of: DateTime<Utc>) -> f64 {
    let weight: f64 = items
        .iter()
        .filter_map(|n| recency_weight(n.published_at, as_of))
        .sum();
    100.0 * (1.0 - (-weight).exp())
}
