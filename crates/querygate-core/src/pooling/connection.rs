//! Pooled connection record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::resilience::ResilientConnection;

/// A backend connection owned by the pool and shared with its lessee.
///
/// The health flag is false-absorbing: once a connection is marked
/// unhealthy it stays unhealthy until the reaper discards it.
pub struct PooledConnection {
    resilient: ResilientConnection,
    healthy: AtomicBool,
    leased: AtomicBool,
    last_used: Mutex<Instant>,
}

impl PooledConnection {
    #[must_use]
    pub fn new(resilient: ResilientConnection) -> Self {
        Self {
            resilient,
            healthy: AtomicBool::new(true),
            leased: AtomicBool::new(false),
            last_used: Mutex::new(Instant::now()),
        }
    }

    /// The resilient connection this record owns.
    #[must_use]
    pub fn resilient(&self) -> &ResilientConnection {
        &self.resilient
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Relaxed);
    }

    /// Refresh the idle clock.
    pub fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    #[must_use]
    pub fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    #[must_use]
    pub fn idle_longer_than(&self, timeout: Duration) -> bool {
        self.last_used.lock().elapsed() > timeout
    }

    /// Whether a transaction pins this connection to its lessee.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.resilient.in_transaction()
    }

    /// Flag the connection as leased.
    ///
    /// # Panics
    ///
    /// Panics if the connection is already leased; handing one connection to
    /// two callers is a pool bug.
    pub(crate) fn mark_leased(&self) {
        let was_leased = self.leased.swap(true, Ordering::AcqRel);
        assert!(!was_leased, "connection leased twice");
    }

    /// Flag the connection as returned.
    ///
    /// # Panics
    ///
    /// Panics on release of a connection that is not leased; this is the
    /// double-release detection required of the pool.
    pub(crate) fn mark_released(&self) {
        let was_leased = self.leased.swap(false, Ordering::AcqRel);
        assert!(was_leased, "release of a connection that was not leased");
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("healthy", &self.is_healthy())
            .field("leased", &self.leased.load(Ordering::Relaxed))
            .field("state", &self.resilient.state())
            .finish()
    }
}
