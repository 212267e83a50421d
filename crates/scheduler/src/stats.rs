//! Scheduler-wide counters.
//!
//! Updated lock-free from the scheduler loop and from callers of the
//! service; read as a [`StatsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Default)]
pub struct SchedulerStats {
    tasks_submitted: AtomicU64,
    tasks_scheduled: AtomicU64,
    scheduling_failures: AtomicU64,
    tasks_completed: AtomicU64,
    retries: AtomicU64,
    cache_aware_decisions: AtomicU64,
    /// Successful plus failed attempts.
    scheduling_decisions: AtomicU64,
    /// Cached bytes that must move because a task left its cache device.
    data_movement_bytes: AtomicU64,
    total_decision_ns: AtomicU64,
    total_estimated_cost: Mutex<f64>,
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_scheduled: u64,
    pub scheduling_failures: u64,
    pub tasks_completed: u64,
    pub retries: u64,
    pub cache_aware_decisions: u64,
    pub scheduling_decisions: u64,
    pub data_movement_bytes: u64,
    pub avg_decision_time_us: f64,
    pub total_estimated_cost: f64,
    pub load_imbalance_pct: f64,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(
        &self,
        elapsed: Duration,
        cache_aware: bool,
        moved_bytes: u64,
        cost: f64,
    ) {
        self.tasks_scheduled.fetch_add(1, Ordering::Relaxed);
        self.scheduling_decisions.fetch_add(1, Ordering::Relaxed);
        self.total_decision_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        if cache_aware {
            self.cache_aware_decisions.fetch_add(1, Ordering::Relaxed);
        }
        self.data_movement_bytes
            .fetch_add(moved_bytes, Ordering::Relaxed);
        *self.total_estimated_cost.lock() += cost;
    }

    pub fn record_failure(&self) {
        self.scheduling_failures.fetch_add(1, Ordering::Relaxed);
        self.scheduling_decisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, load_imbalance_pct: f64) -> StatsSnapshot {
        let scheduled = self.tasks_scheduled.load(Ordering::Relaxed);
        let total_ns = self.total_decision_ns.load(Ordering::Relaxed);
        let avg_decision_time_us = if scheduled > 0 {
            total_ns as f64 / scheduled as f64 / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_scheduled: scheduled,
            scheduling_failures: self.scheduling_failures.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cache_aware_decisions: self.cache_aware_decisions.load(Ordering::Relaxed),
            scheduling_decisions: self.scheduling_decisions.load(Ordering::Relaxed),
            data_movement_bytes: self.data_movement_bytes.load(Ordering::Relaxed),
            avg_decision_time_us,
            total_estimated_cost: *self.total_estimated_cost.lock(),
            load_imbalance_pct,
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.tasks_submitted,
            &self.tasks_scheduled,
            &self.scheduling_failures,
            &self.tasks_completed,
            &self.retries,
            &self.cache_aware_decisions,
            &self.scheduling_decisions,
            &self.data_movement_bytes,
            &self.total_decision_ns,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.total_estimated_cost.lock() = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_average() {
        let stats = SchedulerStats::new();
        stats.record_submitted();
        stats.record_submitted();
        stats.record_decision(Duration::from_micros(30), true, 0, 0.5);
        stats.record_decision(Duration::from_micros(10), false, 4096, 0.25);
        stats.record_failure();

        let s = stats.snapshot(12.5);
        assert_eq!(s.tasks_submitted, 2);
        assert_eq!(s.tasks_scheduled, 2);
        assert_eq!(s.scheduling_failures, 1);
        assert_eq!(s.scheduling_decisions, 3);
        assert_eq!(s.cache_aware_decisions, 1);
        assert_eq!(s.data_movement_bytes, 4096);
        assert!((s.avg_decision_time_us - 20.0).abs() < 1e-9);
        assert!((s.total_estimated_cost - 0.75).abs() < 1e-12);
        assert_eq!(s.load_imbalance_pct, 12.5);
    }

    #[test]
    fn test_reset() {
        let stats = SchedulerStats::new();
        stats.record_submitted();
        stats.record_retry();
        stats.record_completed();
        stats.record_decision(Duration::from_millis(1), true, 1, 1.0);

        stats.reset();
        assert_eq!(stats.snapshot(0.0), StatsSnapshot::default());
    }
}
