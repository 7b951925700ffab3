use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;

use crate::types::PublishedCandidates;

/// Latest published candidate list, shared with read-only consumers.
///
/// Each publish replaces the whole snapshot; readers get an `Arc` to an
/// immutable value and never observe a partially written list.
pub struct ResultCache {
    latest: RwLock<Option<Arc<PublishedCandidates>>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self { latest: RwLock::new(None), ttl })
    }

    /// Next generation number: one past the latest published.
    pub fn next_generation(&self) -> u64 {
        self.latest().map(|p| p.generation + 1).unwrap_or(1)
    }

    /// Replace the published snapshot. Older generations are ignored.
    pub fn publish(&self, snapshot: PublishedCandidates) -> Arc<PublishedCandidates> {
        let snapshot = Arc::new(snapshot);
        if let Ok(mut slot) = self.latest.write() {
            let newer = slot.as_ref().map_or(true, |cur| snapshot.generation > cur.generation);
            if newer {
                *slot = Some(Arc::clone(&snapshot));
            }
        }
        snapshot
    }

    pub fn latest(&self) -> Option<Arc<PublishedCandidates>> {
        self.latest.read().ok().and_then(|slot| slot.clone())
    }

    /// True when the latest snapshot is older than the serving TTL.
    pub fn is_stale(&self, snapshot: &PublishedCandidates) -> bool {
        let age = Utc::now().signed_duration_since(snapshot.generated_at);
        age.to_std().map(|a| a > self.ttl).unwrap_or(false)
    }
}
