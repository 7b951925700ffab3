use crate::providers::SymbolContext;
use crate::types::{OptionsActivity, SubscoreValue};

/// Share of the score from call/put bias; the rest is volume vs open interest.
const BIAS_SHARE: f64 = 0.7;

/// Unusual bullish options activity.
///
/// Call share of total volume drives the bias part. Volume at or above open
/// interest counts as fully unusual. Without open interest only the bias is
/// scored. No traded contracts means no ratio, so Unavailable.
pub fn score(ctx: &SymbolContext) -> SubscoreValue {
    match ctx.options.as_ref() {
        Some(a) => flow_score(a),
        None => SubscoreValue::Unavailable,
    }
}

pub fn flow_score(a: &OptionsActivity) -> SubscoreValue {
    let fields = [a.call_volume, a.put_volume, a.call_open_interest, a.put_open_interest];
    if fields.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return SubscoreValue::Unavailable;
    }
    let volume = a.call_volume + a.put_volume;
    if volume <= 0.0 {
        return SubscoreValue::Unavailable;
    }

    let call_share = a.call_volume / volume;
    let open_interest = a.call_open_interest + a.put_open_interest;
    if open_interest <= 0.0 {
        return SubscoreValue::score(call_share * 100.0);
    }
    let unusual = (volume / open_interest).min(1.0);
    SubscoreValue::score(100.0 * (call_share * BIAS_SHARE + unusual * (1.0 - BIAS_SHARE)))
}
