//! Bounded connection pool.
//!
//! Owns backend connections up to a configured maximum, creating them lazily
//! through an injected factory. Acquisition waits for a release up to the
//! configured deadline; the pool lock is never held across connection
//! creation or any backend I/O.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use querygate_error::{GatewayError, Result};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connection::PooledConnection;
use super::metrics::PriorityMetrics;
use crate::resilience::ResilientConnection;

/// Creates a new, initialized resilient connection.
pub type ConnectionFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ResilientConnection>> + Send + Sync>;

/// Configuration parameters for the connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections created eagerly at initialization.
    pub min_connections: usize,
    /// Hard cap on pool size.
    pub max_connections: usize,
    /// Maximum wait for an acquisition.
    pub acquire_timeout: Duration,
    /// Idle connections older than this are reaped.
    pub idle_timeout: Duration,
    /// Cadence of the background reaper.
    pub health_check_interval: Duration,
    pub enable_health_checks: bool,
    /// Worker tasks draining the acquisition queue in the pool facade.
    pub acquire_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 5,
            max_connections: 50,
            acquire_timeout: Duration::from_millis(5000),
            idle_timeout: Duration::from_millis(60_000),
            health_check_interval: Duration::from_millis(30_000),
            enable_health_checks: true,
            acquire_workers: 4,
        }
    }
}

#[derive(Default)]
struct PoolState {
    /// Idle connections, most recently used first.
    idle: VecDeque<Arc<PooledConnection>>,
    /// Connections currently leased out.
    leased: usize,
    /// All connections owned by the pool, including in-flight creations.
    total: usize,
}

/// Bounded pool of backend connections.
///
/// Invariant: `leased + idle ≤ total ≤ max_connections`.
pub struct ConnectionPool {
    config: PoolConfig,
    factory: ConnectionFactory,
    state: Mutex<PoolState>,
    /// Signalled on every release; acquirers park here.
    released: Notify,
    shutting_down: AtomicBool,
    metrics: Arc<PriorityMetrics>,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(config: PoolConfig, factory: ConnectionFactory, metrics: Arc<PriorityMetrics>) -> Self {
        Self {
            config,
            factory,
            state: Mutex::new(PoolState::default()),
            released: Notify::new(),
            shutting_down: AtomicBool::new(false),
            metrics,
        }
    }

    /// Eagerly create the configured minimum of connections.
    ///
    /// Individual creation failures are logged and tolerated; the pool only
    /// refuses to start when a non-zero minimum yields no connection at all.
    pub async fn initialize(&self) -> Result<()> {
        let wanted = self.config.min_connections.min(self.config.max_connections);
        let mut created = 0usize;

        for _ in 0..wanted {
            match (self.factory)().await {
                Ok(resilient) => {
                    let conn = Arc::new(PooledConnection::new(resilient));
                    let mut state = self.state.lock();
                    state.idle.push_front(conn);
                    state.total += 1;
                    created += 1;
                }
                Err(e) => warn!(error = %e, "failed to create pooled connection"),
            }
        }

        if wanted > 0 && created == 0 {
            return Err(GatewayError::connection_failed(
                "could not create any pooled connection",
            ));
        }
        debug!(created, wanted, "connection pool initialized");
        Ok(())
    }

    /// Acquire a connection, waiting up to `acquire_timeout` for a release.
    ///
    /// Prefers an idle connection; creates a new one while under the cap;
    /// otherwise parks until a lessee releases. Deadline expiry surfaces as
    /// [`GatewayError::NoConnection`].
    pub async fn acquire_connection(&self) -> Result<Arc<PooledConnection>> {
        if self.is_shutting_down() {
            return Err(GatewayError::connection_failed("pool is shutting down"));
        }

        let deadline = Instant::now() + self.config.acquire_timeout;

        loop {
            enum Plan {
                Reuse(Arc<PooledConnection>),
                Create,
                Wait,
            }

            let plan = {
                let mut state = self.state.lock();
                if let Some(conn) = state.idle.pop_front() {
                    state.leased += 1;
                    Plan::Reuse(conn)
                } else if state.total < self.config.max_connections {
                    // Reserve the slot; the factory runs outside the lock.
                    state.total += 1;
                    Plan::Create
                } else {
                    Plan::Wait
                }
            };

            match plan {
                Plan::Reuse(conn) => {
                    // Wake another waiter if releases piled up while no one
                    // was parked (Notify stores at most one permit).
                    if !self.state.lock().idle.is_empty() {
                        self.released.notify_one();
                    }
                    conn.touch();
                    conn.mark_leased();
                    self.metrics.base().update_active(1);
                    return Ok(conn);
                }
                Plan::Create => match (self.factory)().await {
                    Ok(resilient) => {
                        let conn = Arc::new(PooledConnection::new(resilient));
                        self.state.lock().leased += 1;
                        conn.mark_leased();
                        self.metrics.base().update_active(1);
                        return Ok(conn);
                    }
                    Err(e) => {
                        self.state.lock().total -= 1;
                        warn!(error = %e, "connection creation failed; waiting for a release");
                    }
                },
                Plan::Wait => {}
            }

            let now = Instant::now();
            if now >= deadline {
                self.metrics.base().record_timeout();
                return Err(GatewayError::no_connection(format!(
                    "no connection available within {}ms",
                    self.config.acquire_timeout.as_millis()
                )));
            }
            if tokio::time::timeout(deadline - now, self.released.notified())
                .await
                .is_err()
            {
                self.metrics.base().record_timeout();
                return Err(GatewayError::no_connection(format!(
                    "no connection available within {}ms",
                    self.config.acquire_timeout.as_millis()
                )));
            }
            if self.is_shutting_down() {
                return Err(GatewayError::connection_failed("pool is shutting down"));
            }
        }
    }

    /// Return a leased connection.
    ///
    /// Healthy connections rejoin the idle deque at the front (MRU reuse
    /// keeps caches warm); unhealthy ones are discarded. During shutdown the
    /// connection is dropped and only the counters adjust.
    ///
    /// # Panics
    ///
    /// Panics when handed a connection that is not leased (double release).
    pub fn release_connection(&self, conn: Arc<PooledConnection>) {
        conn.mark_released();
        self.metrics.base().update_active(-1);

        {
            let mut state = self.state.lock();
            assert!(state.leased > 0, "release of a connection that was not leased");
            state.leased -= 1;

            if self.is_shutting_down() {
                state.total -= 1;
            } else if conn.is_healthy() {
                conn.touch();
                state.idle.push_front(conn);
            } else {
                state.total -= 1;
                debug!("discarded unhealthy connection on release");
            }
        }

        self.released.notify_one();
    }

    /// Reap idle connections that are unhealthy or idle beyond the timeout.
    ///
    /// Returns the number of connections removed.
    pub fn health_check(&self) -> usize {
        let removed = {
            let mut state = self.state.lock();
            let before = state.idle.len();
            let idle_timeout = self.config.idle_timeout;
            state
                .idle
                .retain(|conn| conn.is_healthy() && !conn.idle_longer_than(idle_timeout));
            let removed = before - state.idle.len();
            state.total -= removed;
            removed
        };

        self.metrics.base().record_health_check(removed as u64);
        if removed > 0 {
            warn!(removed, "reaped idle/unhealthy connections");
        }
        removed
    }

    /// Run the reaper at the configured cadence until cancelled.
    pub fn spawn_reaper(self: &Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        let interval = self.config.health_check_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        pool.health_check();
                    }
                }
            }
        })
    }

    /// Flag shutdown, wake every waiter, and drop all idle connections.
    ///
    /// Leased connections are discarded when their lessees release them.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained = {
            let mut state = self.state.lock();
            let drained = state.idle.len();
            state.total -= drained;
            state.idle.clear();
            drained
        };
        self.released.notify_waiters();
        debug!(drained, "connection pool shut down");
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Connections currently leased out.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.state.lock().leased
    }

    /// Idle connections ready for reuse.
    #[must_use]
    pub fn available_connections(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// All connections owned by the pool.
    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.state.lock().total
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<PriorityMetrics> {
        &self.metrics
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionPool")
            .field("idle", &state.idle.len())
            .field("leased", &state.leased)
            .field("total", &state.total)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::backend::ConnectionConfig;
    use crate::resilience::{ReconnectConfig, ResilientConnection};

    fn mock_factory() -> ConnectionFactory {
        Arc::new(|| {
            Box::pin(async {
                let resilient = ResilientConnection::new(
                    Box::new(MockBackend::new()),
                    ReconnectConfig::default(),
                );
                resilient
                    .initialize(&ConnectionConfig::new("mock://pool"))
                    .await?;
                Ok(resilient)
            })
        })
    }

    fn test_pool(min: usize, max: usize, acquire_timeout_ms: u64) -> ConnectionPool {
        ConnectionPool::new(
            PoolConfig {
                min_connections: min,
                max_connections: max,
                acquire_timeout: Duration::from_millis(acquire_timeout_ms),
                ..PoolConfig::default()
            },
            mock_factory(),
            Arc::new(PriorityMetrics::new()),
        )
    }

    #[tokio::test]
    async fn test_initialize_creates_min_connections() {
        let pool = test_pool(2, 4, 100);
        pool.initialize().await.unwrap();
        assert_eq!(pool.available_connections(), 2);
        assert_eq!(pool.total_connections(), 2);
    }

    #[tokio::test]
    async fn test_acquire_reuses_idle_then_creates() {
        let pool = test_pool(1, 2, 100);
        pool.initialize().await.unwrap();

        let first = pool.acquire_connection().await.unwrap();
        assert_eq!(pool.available_connections(), 0);
        let _second = pool.acquire_connection().await.unwrap();
        assert_eq!(pool.total_connections(), 2);
        assert_eq!(pool.active_connections(), 2);

        pool.release_connection(first);
        assert_eq!(pool.available_connections(), 1);
        assert_eq!(pool.active_connections(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let pool = test_pool(1, 2, 100);
        pool.initialize().await.unwrap();

        let _a = pool.acquire_connection().await.unwrap();
        let _b = pool.acquire_connection().await.unwrap();

        let start = Instant::now();
        let err = pool.acquire_connection().await.unwrap_err();
        assert!(matches!(err, GatewayError::NoConnection { .. }));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(
            pool.metrics().base().timeouts.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let pool = Arc::new(test_pool(1, 1, 1000));
        pool.initialize().await.unwrap();

        let held = pool.acquire_connection().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire_connection().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.release_connection(held);

        let conn = waiter.await.unwrap().unwrap();
        assert_eq!(pool.active_connections(), 1);
        pool.release_connection(conn);
    }

    #[tokio::test]
    async fn test_unhealthy_connection_dropped_on_release() {
        let pool = test_pool(1, 1, 100);
        pool.initialize().await.unwrap();

        let conn = pool.acquire_connection().await.unwrap();
        conn.mark_unhealthy();
        pool.release_connection(conn);

        assert_eq!(pool.available_connections(), 0);
        assert_eq!(pool.total_connections(), 0);
    }

    #[tokio::test]
    async fn test_health_check_reaps_idle_expired() {
        let pool = ConnectionPool::new(
            PoolConfig {
                min_connections: 2,
                max_connections: 2,
                idle_timeout: Duration::ZERO,
                ..PoolConfig::default()
            },
            mock_factory(),
            Arc::new(PriorityMetrics::new()),
        );
        pool.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let removed = pool.health_check();
        assert_eq!(removed, 2);
        assert_eq!(pool.total_connections(), 0);
        assert_eq!(
            pool.metrics()
                .base()
                .unhealthy_connections_removed
                .load(Ordering::Relaxed),
            2
        );
    }

    #[tokio::test]
    async fn test_shutdown_rejects_and_wakes() {
        let pool = Arc::new(test_pool(1, 1, 5000));
        pool.initialize().await.unwrap();
        let held = pool.acquire_connection().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire_connection().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.shutdown();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionFailed { .. }));

        // Late release during shutdown only adjusts counters.
        pool.release_connection(held);
        assert_eq!(pool.total_connections(), 0);
        assert_eq!(pool.available_connections(), 0);
    }

    #[tokio::test]
    async fn test_pool_invariant_held() {
        let pool = Arc::new(test_pool(2, 4, 200));
        pool.initialize().await.unwrap();

        let mut leases = Vec::new();
        for _ in 0..4 {
            leases.push(pool.acquire_connection().await.unwrap());
        }
        assert!(pool.active_connections() + pool.available_connections() <= pool.total_connections());
        assert!(pool.total_connections() <= 4);

        for lease in leases {
            pool.release_connection(lease);
        }
        assert_eq!(pool.active_connections(), 0);
        assert_eq!(pool.available_connections(), pool.total_connections());
    }
}
