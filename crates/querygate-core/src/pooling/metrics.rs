//! Pool performance metrics.
//!
//! All counters are lock-free atomics updated with relaxed ordering; min/max
//! values are maintained with compare-exchange retry loops. The per-priority
//! extension guards only map growth with a mutex - counter updates never
//! take it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::priority::ConnectionPriority;

/// Lock-free performance counters for a connection pool.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    // Acquisition statistics
    pub total_acquisitions: AtomicU64,
    pub successful_acquisitions: AtomicU64,
    pub failed_acquisitions: AtomicU64,
    pub timeouts: AtomicU64,

    // Timing statistics (microseconds)
    pub total_wait_time_us: AtomicU64,
    min_wait_time_us: AtomicU64,
    pub max_wait_time_us: AtomicU64,

    // Current state
    pub current_active: AtomicU64,
    pub current_queued: AtomicU64,
    pub peak_active: AtomicU64,
    pub peak_queued: AtomicU64,

    // Health check statistics
    pub health_checks_performed: AtomicU64,
    pub unhealthy_connections_removed: AtomicU64,
}

impl PoolMetrics {
    #[must_use]
    pub fn new() -> Self {
        let metrics = Self::default();
        metrics.min_wait_time_us.store(u64::MAX, Ordering::Relaxed);
        metrics
    }

    /// Record a connection acquisition outcome.
    pub fn record_acquisition(&self, wait_time_us: u64, success: bool) {
        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_acquisitions.fetch_add(1, Ordering::Relaxed);
            self.total_wait_time_us
                .fetch_add(wait_time_us, Ordering::Relaxed);
            cas_min(&self.min_wait_time_us, wait_time_us);
            cas_max(&self.max_wait_time_us, wait_time_us);
        } else {
            self.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Adjust the active-connection gauge, tracking the peak.
    pub fn update_active(&self, delta: i64) {
        let new_active = adjust_gauge(&self.current_active, delta);
        cas_max(&self.peak_active, new_active);
    }

    /// Adjust the queued-request gauge, tracking the peak.
    pub fn update_queued(&self, delta: i64) {
        let new_queued = adjust_gauge(&self.current_queued, delta);
        cas_max(&self.peak_queued, new_queued);
    }

    pub fn record_health_check(&self, removed_connections: u64) {
        self.health_checks_performed.fetch_add(1, Ordering::Relaxed);
        if removed_connections > 0 {
            self.unhealthy_connections_removed
                .fetch_add(removed_connections, Ordering::Relaxed);
        }
    }

    /// Average acquisition wait in microseconds; 0 with no traffic.
    #[must_use]
    pub fn average_wait_time_us(&self) -> f64 {
        let total = self.total_acquisitions.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.total_wait_time_us.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Fraction of acquisitions that succeeded; 1.0 with no traffic.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_acquisitions.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        self.successful_acquisitions.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Minimum observed wait, or 0 when nothing has been recorded.
    #[must_use]
    pub fn min_wait_time_us(&self) -> u64 {
        let min = self.min_wait_time_us.load(Ordering::Relaxed);
        if min == u64::MAX {
            0
        } else {
            min
        }
    }

    /// Reset counters. Gauges keep their current values; peaks collapse to
    /// the current gauge readings.
    pub fn reset(&self) {
        self.total_acquisitions.store(0, Ordering::Relaxed);
        self.successful_acquisitions.store(0, Ordering::Relaxed);
        self.failed_acquisitions.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);

        self.total_wait_time_us.store(0, Ordering::Relaxed);
        self.min_wait_time_us.store(u64::MAX, Ordering::Relaxed);
        self.max_wait_time_us.store(0, Ordering::Relaxed);

        self.peak_active
            .store(self.current_active.load(Ordering::Relaxed), Ordering::Relaxed);
        self.peak_queued
            .store(self.current_queued.load(Ordering::Relaxed), Ordering::Relaxed);

        self.health_checks_performed.store(0, Ordering::Relaxed);
        self.unhealthy_connections_removed.store(0, Ordering::Relaxed);
    }

    /// Plain-data copy for health endpoints.
    #[must_use]
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            successful_acquisitions: self.successful_acquisitions.load(Ordering::Relaxed),
            failed_acquisitions: self.failed_acquisitions.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            total_wait_time_us: self.total_wait_time_us.load(Ordering::Relaxed),
            min_wait_time_us: self.min_wait_time_us(),
            max_wait_time_us: self.max_wait_time_us.load(Ordering::Relaxed),
            average_wait_time_us: self.average_wait_time_us(),
            success_rate: self.success_rate(),
            current_active: self.current_active.load(Ordering::Relaxed),
            current_queued: self.current_queued.load(Ordering::Relaxed),
            peak_active: self.peak_active.load(Ordering::Relaxed),
            peak_queued: self.peak_queued.load(Ordering::Relaxed),
            health_checks_performed: self.health_checks_performed.load(Ordering::Relaxed),
            unhealthy_connections_removed: self
                .unhealthy_connections_removed
                .load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of [`PoolMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolMetricsSnapshot {
    pub total_acquisitions: u64,
    pub successful_acquisitions: u64,
    pub failed_acquisitions: u64,
    pub timeouts: u64,
    pub total_wait_time_us: u64,
    pub min_wait_time_us: u64,
    pub max_wait_time_us: u64,
    pub average_wait_time_us: f64,
    pub success_rate: f64,
    pub current_active: u64,
    pub current_queued: u64,
    pub peak_active: u64,
    pub peak_queued: u64,
    pub health_checks_performed: u64,
    pub unhealthy_connections_removed: u64,
}

#[derive(Debug, Default)]
struct PriorityCounters {
    acquisitions: AtomicU64,
    total_wait_time_us: AtomicU64,
}

/// Pool metrics extended with per-priority statistics.
#[derive(Debug, Default)]
pub struct PriorityMetrics {
    base: PoolMetrics,
    /// Guards map growth only; counters are updated lock-free.
    by_priority: Mutex<HashMap<ConnectionPriority, Arc<PriorityCounters>>>,
}

impl PriorityMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: PoolMetrics::new(),
            by_priority: Mutex::new(HashMap::new()),
        }
    }

    /// Base (priority-agnostic) metrics.
    #[must_use]
    pub fn base(&self) -> &PoolMetrics {
        &self.base
    }

    /// Record an acquisition outcome, attributing wait time to a priority.
    pub fn record_acquisition_with_priority(
        &self,
        priority: ConnectionPriority,
        wait_time_us: u64,
        success: bool,
    ) {
        self.base.record_acquisition(wait_time_us, success);

        if success {
            let counters = {
                let mut map = self.by_priority.lock();
                Arc::clone(map.entry(priority).or_default())
            };
            counters.acquisitions.fetch_add(1, Ordering::Relaxed);
            counters
                .total_wait_time_us
                .fetch_add(wait_time_us, Ordering::Relaxed);
        }
    }

    /// Average wait in microseconds for one priority; 0 with no data.
    #[must_use]
    pub fn average_wait_time_for_priority(&self, priority: ConnectionPriority) -> f64 {
        let counters = {
            let map = self.by_priority.lock();
            map.get(&priority).map(Arc::clone)
        };
        let Some(counters) = counters else {
            return 0.0;
        };
        let count = counters.acquisitions.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        counters.total_wait_time_us.load(Ordering::Relaxed) as f64 / count as f64
    }

    /// Per-priority snapshots, lowest band first.
    #[must_use]
    pub fn priority_snapshots(&self) -> Vec<PrioritySnapshot> {
        let map = self.by_priority.lock();
        ConnectionPriority::ALL
            .iter()
            .filter_map(|priority| {
                map.get(priority).map(|counters| PrioritySnapshot {
                    priority: *priority,
                    acquisitions: counters.acquisitions.load(Ordering::Relaxed),
                    total_wait_time_us: counters.total_wait_time_us.load(Ordering::Relaxed),
                })
            })
            .collect()
    }

    /// Reset base metrics and per-priority counters.
    pub fn reset_all(&self) {
        self.base.reset();
        let map = self.by_priority.lock();
        for counters in map.values() {
            counters.acquisitions.store(0, Ordering::Relaxed);
            counters.total_wait_time_us.store(0, Ordering::Relaxed);
        }
    }
}

/// Per-priority acquisition statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrioritySnapshot {
    pub priority: ConnectionPriority,
    pub acquisitions: u64,
    pub total_wait_time_us: u64,
}

fn cas_min(slot: &AtomicU64, value: u64) {
    let mut current = slot.load(Ordering::Relaxed);
    while value < current {
        match slot.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

fn cas_max(slot: &AtomicU64, value: u64) {
    let mut current = slot.load(Ordering::Relaxed);
    while value > current {
        match slot.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

/// Apply a signed delta to a gauge, saturating at zero.
fn adjust_gauge(slot: &AtomicU64, delta: i64) -> u64 {
    if delta >= 0 {
        slot.fetch_add(delta as u64, Ordering::Relaxed) + delta as u64
    } else {
        let sub = delta.unsigned_abs();
        let previous = slot.fetch_sub(sub, Ordering::Relaxed);
        assert!(previous >= sub, "pool gauge underflow");
        previous - sub
    }
}
