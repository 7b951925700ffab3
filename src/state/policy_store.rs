use std::sync::{Arc, RwLock};

use tracing::info;

use crate::config::ScoringPolicy;
use crate::error::{AppError, Result};

/// Current scoring policy. The scorer and ranker take a fresh copy on every
/// call, so an update applies from the next cycle on.
pub struct PolicyStore {
    inner: RwLock<ScoringPolicy>,
}

impl PolicyStore {
    pub fn new(policy: ScoringPolicy) -> Arc<Self> {
        Arc::new(Self { inner: RwLock::new(policy) })
    }

    pub fn current(&self) -> ScoringPolicy {
        self.inner
            .read()
            .map(|p| p.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn update(&self, policy: ScoringPolicy) -> Result<()> {
        policy.validate()?;
        let mut slot = self
            .inner
            .write()
            .map_err(|_| AppError::Config("policy lock poisoned".to_string()))?;
        info!(
            trade_ready = policy.tiers.trade_ready,
            watchlist = policy.tiers.watchlist,
            "Scoring policy updated"
        );
        *slot = policy;
        Ok(())
    }
}
