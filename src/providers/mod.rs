//! Subscore providers.
//!
//! Every provider maps a `SymbolContext` to a score in [0, 100] or
//! `SubscoreValue::Unavailable`. Providers are pure: all upstream I/O happens
//! beforehand in `context::ContextLoader`, and a context field left `None`
//! (call failed, timed out, or was never made) makes the dependent provider
//! report Unavailable.

pub mod catalyst;
pub mod context;
pub mod momentum;
pub mod options_flow;
pub mod realtime;
pub mod sentiment;
pub mod squeeze;
pub mod technical;
pub mod volume_surge;

use serde::Serialize;

use crate::types::{Component, Subscore, SubscoreValue};

pub use context::{ContextLoader, SymbolContext, UpstreamNeeds};

/// The closed set of subscore calculators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SubscoreProvider {
    Momentum,
    VolumeSurge,
    FloatShort,
    Catalyst,
    Sentiment,
    Technical,
    OptionsFlow,
    RealtimeMomentum,
}

impl SubscoreProvider {
    pub const ALL: [SubscoreProvider; 8] = [
        SubscoreProvider::Momentum,
        SubscoreProvider::VolumeSurge,
        SubscoreProvider::FloatShort,
        SubscoreProvider::Catalyst,
        SubscoreProvider::Sentiment,
        SubscoreProvider::Technical,
        SubscoreProvider::OptionsFlow,
        SubscoreProvider::RealtimeMomentum,
    ];

    pub fn for_component(component: Component) -> Self {
        match component {
            Component::Momentum => SubscoreProvider::Momentum,
            Component::VolumeSurge => SubscoreProvider::VolumeSurge,
            Component::FloatShort => SubscoreProvider::FloatShort,
            Component::Catalyst => SubscoreProvider::Catalyst,
            Component::Sentiment => SubscoreProvider::Sentiment,
            Component::Technical => SubscoreProvider::Technical,
            Component::OptionsFlow => SubscoreProvider::OptionsFlow,
            Component::RealtimeMomentum => SubscoreProvider::RealtimeMomentum,
        }
    }

    pub fn component(&self) -> Component {
        match self {
            SubscoreProvider::Momentum => Component::Momentum,
            SubscoreProvider::VolumeSurge => Component::VolumeSurge,
            SubscoreProvider::FloatShort => Component::FloatShort,
            SubscoreProvider::Catalyst => Component::Catalyst,
            SubscoreProvider::Sentiment => Component::Sentiment,
            SubscoreProvider::Technical => Component::Technical,
            SubscoreProvider::OptionsFlow => Component::OptionsFlow,
            SubscoreProvider::RealtimeMomentum => Component::RealtimeMomentum,
        }
    }

    /// Upstream data this provider reads beyond the snapshot and RVOL.
    pub fn needs(&self) -> UpstreamNeeds {
        let none = UpstreamNeeds::default();
        match self {
            SubscoreProvider::Momentum | SubscoreProvider::Technical => UpstreamNeeds { history: true, ..none },
            SubscoreProvider::VolumeSurge => none,
            SubscoreProvider::FloatShort => UpstreamNeeds { float: true, ..none },
            SubscoreProvider::Catalyst | SubscoreProvider::Sentiment => UpstreamNeeds { news: true, ..none },
            SubscoreProvider::OptionsFlow => UpstreamNeeds { options: true, ..none },
            SubscoreProvider::RealtimeMomentum => UpstreamNeeds { trades: true, ..none },
        }
    }

    pub fn compute(&self, ctx: &SymbolContext) -> SubscoreValue {
        match self {
            SubscoreProvider::Momentum => momentum::score(ctx),
            SubscoreProvider::VolumeSurge => volume_surge::score(ctx),
            SubscoreProvider::FloatShort => squeeze::score(ctx),
            SubscoreProvider::Catalyst => catalyst::score(ctx),
            SubscoreProvider::Sentiment => sentiment::score(ctx),
            SubscoreProvider::Technical => technical::score(ctx),
            SubscoreProvider::OptionsFlow => options_flow::score(ctx),
            SubscoreProvider::RealtimeMomentum => realtime::score(ctx),
        }
    }
}

/// Run every provider whose component carries a weight entry.
pub fn compute_subscores(
    ctx: &SymbolContext,
    weights: &std::collections::BTreeMap<Component, f64>,
) -> Vec<Subscore> {
    weights
        .iter()
        .map(|(&component, &weight)| Subscore {
            component,
            symbol: ctx.symbol.clone(),
            value: SubscoreProvider::for_component(component).compute(ctx),
            weight_nominal: weight,
        })
        .collect()
}

/// Upstream calls needed by the components that carry a positive weight.
pub fn needs_for(weights: &std::collections::BTreeMap<Component, f64>) -> UpstreamNeeds {
    weights
        .iter()
        .filter(|&(_, &w)| w > 0.0)
        .map(|(&c, _)| SubscoreProvider::for_component(c).needs())
        .fold(UpstreamNeeds::default(), UpstreamNeeds::union)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringPolicy;

    #[test]
    fn providers_and_components_round_trip() {
        for p in SubscoreProvider::ALL {
            assert_eq!(SubscoreProvider::for_component(p.component()), p);
        }
    }

    #[test]
    fn empty_context_is_unavailable_everywhere() {
        let ctx = SymbolContext::empty("ABC");
        for p in SubscoreProvider::ALL {
            assert_eq!(p.compute(&ctx), SubscoreValue::Unavailable, "{:?}", p);
        }
    }

    #[test]
    fn subscores_cover_every_weighted_component() {
        let ctx = SymbolContext::empty("ABC");
        let subs = compute_subscores(&ctx, &ScoringPolicy::default().weights);
        assert_eq!(subs.len(), 8);
        assert!(subs.iter().all(|s| s.symbol == "ABC" && !s.value.is_available()));
    }

    #[test]
    fn zero_weight_components_skip_their_upstream_calls() {
        let mut weights = ScoringPolicy::default().weights;
        weights.insert(Component::OptionsFlow, 0.0);
        weights.insert(Component::RealtimeMomentum, 0.0);
        let needs = needs_for(&weights);
        assert!(needs.history && needs.float && needs.news);
        assert!(!needs.options && !needs.trades);
    }
}
