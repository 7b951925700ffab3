use crate::providers::SymbolContext;
use crate::types::SubscoreValue;

const SHORT_MA: usize = 5;
const LONG_MA: usize = 10;
const BAND_PERIOD: usize = 20;
const BAND_WIDTH_STDDEV: f64 = 2.0;

/// Indicator composite from daily closes.
///
/// - 25 pts: price above the 5-session SMA
/// - 25 pts: price above the 10-session SMA
/// - 20 pts: 5-session SMA above the 10-session SMA
/// - 30 pts: position inside the 2σ volatility band (%B, clamped)
///
/// Needs at least `LONG_MA` completed sessions.
pub fn score(ctx: &SymbolContext) -> SubscoreValue {
    let Some(history) = ctx.history.as_ref() else {
        return SubscoreValue::Unavailable;
    };
    let closes: Vec<f64> = history
        .iter()
        .map(|b| b.close)
        .filter(|c| c.is_finite() && *c > 0.0)
        .collect();
    if closes.len() < LONG_MA {
        return SubscoreValue::Unavailable;
    }
    let Some(price) = ctx.last_price() else {
        return SubscoreValue::Unavailable;
    };

    let sma_short = mean(&closes[..SHORT_MA]);
    let sma_long = mean(&closes[..LONG_MA]);

    let mut total = 0.0;
    if price > sma_short {
        total += 25.0;
    }
    if price > sma_long {
        total += 25.0;
    }
    if sma_short > sma_long {
        total += 20.0;
    }
    total += 30.0 * percent_b(&closes[..closes.len().min(BAND_PERIOD)], price);

    SubscoreValue::score(total)
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Position of `price` in the band, clamped to [0, 1]. A zero-width band is 0.5.
pub fn percent_b(closes: &[f64], price: f64) -> f64 {
    let mid = mean(closes);
    let var = closes.iter().map(|c| (c - mid).powi(2)).sum::<f64>() / closes.len() as f64;
    let sd = var.sqrt();
    if sd <= f64::EPSILON {
        return 0.5;
    }
    let lower = mid - BAND_WIDTH_STDDEV * sd;
    let upper = mid + BAND_WIDTH_STDDEV * sd;
    ((price - lower) / (upper - lower)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DailyBar;

    fn ctx(closes_newest_first: &[f64]) -> SymbolContext {
        let mut c = SymbolContext::empty("ABC");
        c.history = Some(
            closes_newest_first
                .iter()
                .map(|&close| DailyBar { timestamp_ms: 0, open: close, high: close, low: close, close, volume: 1.0 })
                .collect(),
        );
        c
    }

    #[test]
    fn short_history_is_unavailable() {
        assert_eq!(score(&ctx(&[10.0; 9])), SubscoreValue::Unavailable);
    }

    #[test]
    fn flat_series_sits_mid_band() {
        // Price equals every average: no MA points, half the band points.
        assert_eq!(score(&ctx(&[10.0; 20])), SubscoreValue::Available(15.0));
    }

    #[test]
    fn uptrend_scores_above_downtrend() {
        let up: Vec<f64> = (0..20).map(|i| 30.0 - i as f64).collect();
        let down: Vec<f64> = (0..20).map(|i| 10.0 + i as f64).collect();
        let up_score = score(&ctx(&up)).value().unwrap();
        let down_score = score(&ctx(&down)).value().unwrap();
        assert!(up_score > 70.0, "{up_score}");
        assert!(down_score < 30.0, "{down_score}");
    }
}
