use crate::providers::SymbolContext;
use crate::types::{SubscoreValue, TradePrint};

/// Fewer prints than this are not a tape.
const MIN_PRINTS: usize = 10;

/// Real-time trade-tape direction by the tick rule.
///
/// Each print is an uptick or downtick against the previous price; zero ticks
/// keep the last direction. Score is uptick volume share × 100.
pub fn score(ctx: &SymbolContext) -> SubscoreValue {
    match ctx.trades.as_ref() {
        Some(trades) => tape_score(trades),
        None => SubscoreValue::Unavailable,
    }
}

/// `trades` newest first, as the provider returns them.
pub fn tape_score(trades: &[TradePrint]) -> SubscoreValue {
    let mut prints: Vec<&TradePrint> = trades
        .iter()
        .filter(|t| t.price.is_finite() && t.price > 0.0 && t.size.is_finite() && t.size > 0.0)
        .collect();
    if prints.len() < MIN_PRINTS {
        return SubscoreValue::Unavailable;
    }
    prints.sort_by_key(|t| t.timestamp_ms);

    let mut up = 0.0;
    let mut down = 0.0;
    let mut direction = 0i8;
    for pair in prints.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        if cur.price > prev.price {
            direction = 1;
        } else if cur.price < prev.price {
            direction = -1;
        }
        match direction {
            1 => up += cur.size,
            -1 => down += cur.size,
            _ => {}
        }
    }

    let classified = up + down;
    if classified <= 0.0 {
        return SubscoreValue::Unavailable;
    }
    SubscoreValue::score(up / classified * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tape(prices_oldest_first: &[f64]) -> Vec<TradePrint> {
        let mut t: Vec<TradePrint> = prices_oldest_first
            .iter()
            .enumerate()
            .map(|(i, &price)| TradePrint { price, size: 100.0, timestamp_ms: i as i64 })
            .collect();
        t.reverse();
        t
    }

    #[test]
    fn rising_tape_is_100() {
        let prices: Vec<f64> = (0..12).map(|i| 10.0 + i as f64 * 0.01).collect();
        assert_eq!(tape_score(&tape(&prices)), SubscoreValue::Available(100.0));
    }

    #[test]
    fn zero_ticks_inherit_direction() {
        let prices = [10.0, 10.1, 10.1, 10.1, 10.1, 10.1, 10.0, 10.0, 10.0, 10.0, 10.0];
        // 1 uptick + 4 zero-ticks up, 1 downtick + 4 zero-ticks down.
        assert_eq!(tape_score(&tape(&prices)), SubscoreValue::Available(50.0));
    }

    #[test]
    fn flat_or_thin_tape_is_unavailable() {
        assert_eq!(tape_score(&tape(&[10.0; 12])), SubscoreValue::Unavailable);
        assert_eq!(tape_score(&tape(&[10.0, 10.1])), SubscoreValue::Unavailable);
    }
}
