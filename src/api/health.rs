//! Shared health state for the /health endpoint.
//! Updated by the discovery cycle and DbWriter.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cycle counters. Written by background tasks, read by the API.
#[derive(Default)]
pub struct HealthState {
    /// Unix ms of the last published cycle (0 = none yet).
    last_cycle_at_ms: AtomicU64,
    last_candidate_count: AtomicU64,
    cycles_completed: AtomicU64,
    /// Cycles that found the lease held elsewhere.
    cycles_skipped: AtomicU64,
    cycles_failed: AtomicU64,
    /// Published snapshots queued for the DB writer.
    write_queue_pending: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    pub last_cycle_at_ms: Option<u64>,
    pub last_candidate_count: u64,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    pub write_queue_pending: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completed(&self, at_ms: u64, candidates: usize) {
        self.last_cycle_at_ms.store(at_ms, Ordering::Relaxed);
        self.last_candidate_count.store(candidates as u64, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_queue_pending(&self) {
        self.write_queue_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_write_queue_pending(&self) {
        let _ = self
            .write_queue_pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    pub fn report(&self) -> HealthReport {
        let last = self.last_cycle_at_ms.load(Ordering::Relaxed);
        HealthReport {
            last_cycle_at_ms: (last > 0).then_some(last),
            last_candidate_count: self.last_candidate_count.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            write_queue_pending: self.write_queue_pending.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let h = HealthState::new();
        assert_eq!(h.report().last_cycle_at_ms, None);
        h.record_completed(1_700_000_000_000, 12);
        h.record_skipped();
        h.record_failed();
        h.record_failed();
        let r = h.report();
        assert_eq!(r.last_cycle_at_ms, Some(1_700_000_000_000));
        assert_eq!(r.last_candidate_count, 12);
        assert_eq!((r.cycles_completed, r.cycles_skipped, r.cycles_failed), (1, 1, 2));
    }

    #[test]
    fn write_queue_never_underflows() {
        let h = HealthState::new();
        h.dec_write_queue_pending();
        assert_eq!(h.report().write_queue_pending, 0);
        h.inc_write_queue_pending();
        assert_eq!(h.report().write_queue_pending, 1);
    }
}
