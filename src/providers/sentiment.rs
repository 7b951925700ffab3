use crate::providers::catalyst::recency_weight;
use crate::providers::SymbolContext;
use crate::types::SubscoreValue;

/// Recency-weighted mean polarity of news carrying a sentiment label, mapped
/// from [-1, 1] onto [0, 100]. No labelled articles means no sentiment data.
pub fn score(ctx: &SymbolContext) -> SubscoreValue {
    let Some(items) = ctx.news.as_ref() else {
        return SubscoreValue::Unavailable;
    };

    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for item in items {
        let Some(polarity) = item.sentiment.filter(|p| p.is_finite()) else {
            continue;
        };
        let Some(w) = recency_weight(item.published_at, ctx.as_of) else {
            continue;
        };
        weighted += polarity.clamp(-1.0, 1.0) * w;
        total_weight += w;
    }

    if total_weight <= 0.0 {
        return SubscoreValue::Unavailable;
    }
    SubscoreValue::score(50.0 + 50.0 * (weighted / total_weight))
}
