use crate::providers::SymbolContext;
use crate::types::SubscoreValue;

/// Points per percent of 1-day change around the neutral 50.
const ONE_DAY_POINTS_PER_PCT: f64 = 5.0;
/// Points per percent of 5-day change around the neutral 50.
const FIVE_DAY_POINTS_PER_PCT: f64 = 2.5;
const ONE_DAY_SHARE: f64 = 0.6;

/// Price momentum over 1- and 5-session windows.
///
/// +10% on the day or +20% over five sessions saturates at 100; flat is 50.
/// Either window alone is enough; with neither the score is Unavailable.
pub fn score(ctx: &SymbolContext) -> SubscoreValue {
    let one_day = one_day_change_pct(ctx);
    let five_day = five_day_change_pct(ctx);

    let s1 = one_day.map(|c| (50.0 + c * ONE_DAY_POINTS_PER_PCT).clamp(0.0, 100.0));
    let s5 = five_day.map(|c| (50.0 + c * FIVE_DAY_POINTS_PER_PCT).clamp(0.0, 100.0));

    match (s1, s5) {
        (Some(a), Some(b)) => SubscoreValue::score(a * ONE_DAY_SHARE + b * (1.0 - ONE_DAY_SHARE)),
        (Some(a), None) => SubscoreValue::score(a),
        (None, Some(b)) => SubscoreValue::score(b),
        (None, None) => SubscoreValue::Unavailable,
    }
}

fn pct(from: f64, to: f64) -> Option<f64> {
    (from.is_finite() && from > 0.0 && to.is_finite() && to > 0.0).then(|| (to - from) / from * 100.0)
}

/// Live change against the previous close, or the last completed session's change.
pub fn one_day_change_pct(ctx: &SymbolContext) -> Option<f64> {
    if let Some(change) = ctx.snapshot.as_ref().and_then(|s| s.change_pct()) {
        return Some(change);
    }
    let bars = ctx.history.as_ref()?;
    pct(bars.get(1)?.close, bars.first()?.close)
}

/// Latest price against the close five completed sessions back.
pub fn five_day_change_pct(ctx: &SymbolContext) -> Option<f64> {
    let bars = ctx.history.as_ref()?;
    let live = ctx.snapshot.as_ref().map_or(false, |s| !s.from_previous_session);
    // With a live price, bars[4] is five sessions back; otherwise bars[0] is "today".
    let base = if live { bars.get(4) } else { bars.get(5) }?;
    pct(base.close, ctx.last_price()?)
}
