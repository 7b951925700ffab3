use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::types::{Component, CompositeScore, Subscore, SubscoreValue};

/// Result of reweighting one symbol's subscores.
#[derive(Debug, Clone, PartialEq)]
pub struct Combined {
    pub score: f64,
    /// Effective weights of the available components; they sum to 100.
    pub active_weights: BTreeMap<Component, f64>,
    pub missing_components: Vec<Component>,
}

/// Combine `(component, nominal_weight, value)` triples.
///
/// Unavailable components drop out and the nominal weights of the rest are
/// rescaled to a 100% basis, so missing evidence never counts as a zero.
/// Components with a zero nominal weight are neither active nor missing.
/// `AllComponentsMissing` when no available component carries weight.
pub fn combine(symbol: &str, inputs: &[(Component, f64, SubscoreValue)]) -> Result<Combined> {
    let mut available: Vec<(Component, f64, f64)> = Vec::with_capacity(inputs.len());
    let mut missing = Vec::new();

    for &(component, nominal, value) in inputs {
        let nominal = if nominal.is_finite() && nominal > 0.0 { nominal } else { 0.0 };
        if nominal == 0.0 {
            continue;
        }
        match value.value().filter(|v| v.is_finite()) {
            Some(v) => available.push((component, nominal, v)),
            None => missing.push(component),
        }
    }

    let total: f64 = available.iter().map(|(_, w, _)| w).sum();
    if total <= 0.0 {
        return Err(AppError::AllComponentsMissing(symbol.to_string()));
    }

    let mut active_weights = BTreeMap::new();
    let mut score = 0.0;
    for (component, nominal, value) in available {
        let effective = nominal / total * 100.0;
        score += value * effective / 100.0;
        active_weights.insert(component, effective);
    }

    missing.sort();
    Ok(Combined { score, active_weights, missing_components: missing })
}

/// Composite score for one symbol from its provider outputs.
pub fn score_symbol(symbol: &str, subscores: &[Subscore], computed_at: DateTime<Utc>) -> Result<CompositeScore> {
    let inputs: Vec<(Component, f64, SubscoreValue)> = subscores
        .iter()
        .map(|s| (s.component, s.weight_nominal, s.value))
        .collect();
    let combined = combine(symbol, &inputs)?;

    Ok(CompositeScore {
        symbol: symbol.to_string(),
        score: combined.score,
        active_components: combined.active_weights.keys().copied().collect(),
        active_weights: combined.active_weights,
        missing_components: combined.missing_components,
        subscores: subscores.iter().map(|s| (s.component, s.value)).collect(),
        computed_at,
    })
}
