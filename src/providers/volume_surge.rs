use crate::providers::SymbolContext;
use crate::types::SubscoreValue;

/// Piecewise-linear RVOL → score anchors. 5× volume scores 80, 10× saturates.
const ANCHORS: [(f64, f64); 5] = [(0.0, 0.0), (1.0, 20.0), (2.0, 40.0), (5.0, 80.0), (10.0, 100.0)];

pub fn score(ctx: &SymbolContext) -> SubscoreValue {
    match ctx.rvol.as_ref() {
        Some(r) => SubscoreValue::score(rvol_to_score(r.rvol_ratio)),
        None => SubscoreValue::Unavailable,
    }
}

pub fn rvol_to_score(rvol: f64) -> f64 {
    if !rvol.is_finite() {
        return f64::NAN;
    }
    for pair in ANCHORS.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if rvol <= x1 {
            return y0 + (rvol.max(x0) - x0) / (x1 - x0) * (y1 - y0);
        }
    }
    100.0
}
