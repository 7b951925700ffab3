use crate::providers::SymbolContext;
use crate::types::{FloatData, SubscoreValue};

/// Floats at or below this score the full float component.
const SMALL_FLOAT: f64 = 5_000_000.0;
/// Floats at or above this score zero on the float component.
const LARGE_FLOAT: f64 = 200_000_000.0;
/// Short interest (fraction of float) that saturates the short component.
const SHORT_SATURATION: f64 = 0.30;
/// Days to cover that saturates the bonus.
const DTC_SATURATION: f64 = 10.0;

const FLOAT_SHARE: f64 = 0.35;
const SHORT_SHARE: f64 = 0.55;
const DTC_SHARE: f64 = 0.10;

/// Float/short squeeze potential: smaller float and heavier short interest score higher.
pub fn score(ctx: &SymbolContext) -> SubscoreValue {
    match ctx.float.as_ref() {
        Some(f) => squeeze_score(f),
        None => SubscoreValue::Unavailable,
    }
}

pub fn squeeze_score(f: &FloatData) -> SubscoreValue {
    let valid_float = f.float_shares.is_finite() && f.float_shares > 0.0;
    let valid_short = f.short_interest_ratio.is_finite() && f.short_interest_ratio >= 0.0;
    if !(valid_float && valid_short) {
        return SubscoreValue::Unavailable;
    }

    // Log-interpolated so 20M sits well above 100M.
    let float_score = if f.float_shares <= SMALL_FLOAT {
        100.0
    } else if f.float_shares >= LARGE_FLOAT {
        0.0
    } else {
        let span = LARGE_FLOAT.ln() - SMALL_FLOAT.ln();
        100.0 * (LARGE_FLOAT.ln() - f.float_shares.ln()) / span
    };

    let short_score = (f.short_interest_ratio / SHORT_SATURATION).min(1.0) * 100.0;

    // Without days-to-cover the remaining evidence is reweighted.
    match f.days_to_cover.filter(|d| d.is_finite() && *d >= 0.0) {
        Some(dtc) => {
            let dtc_score = (dtc / DTC_SATURATION).min(1.0) * 100.0;
            SubscoreValue::score(float_score * FLOAT_SHARE + short_score * SHORT_SHARE + dtc_score * DTC_SHARE)
        }
        None => {
            let total = FLOAT_SHARE + SHORT_SHARE;
            SubscoreValue::score((float_score * FLOAT_SHARE + short_score * SHORT_SHARE) / total)
        }
    }
}
