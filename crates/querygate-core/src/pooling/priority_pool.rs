//! Priority-aware pool facade.
//!
//! Composes the bounded [`ConnectionPool`] with the [`AgingQueue`]:
//! acquisition requests enter the queue as jobs carrying a one-shot
//! completion, worker tasks drain the queue in priority order and run the
//! inner pool's acquire, and the aging sweeper keeps low-priority requests
//! from starving. Shutdown is cooperative through a cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use querygate_error::{GatewayError, Result};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::aging_queue::{AgingQueue, AgingStats};
use super::connection::PooledConnection;
use super::metrics::PriorityMetrics;
use super::pool::{ConnectionFactory, ConnectionPool, PoolConfig};
use super::priority::{AgingConfig, ConnectionPriority};

/// One queued acquisition: completed exactly once by a worker.
struct AcquisitionJob {
    reply: oneshot::Sender<Result<Arc<PooledConnection>>>,
}

/// RAII lease over a pooled connection.
///
/// Dropping the lease returns the connection to the pool; while a
/// transaction is open the lease is pinned and must be held across the whole
/// transaction.
pub struct ConnectionLease {
    conn: Option<Arc<PooledConnection>>,
    pool: Arc<ConnectionPool>,
}

impl ConnectionLease {
    /// The leased connection.
    ///
    /// # Panics
    ///
    /// Panics if called after the lease has been released (cannot happen
    /// through safe use; the lease releases only on drop).
    #[must_use]
    pub fn connection(&self) -> &Arc<PooledConnection> {
        self.conn.as_ref().expect("lease already released")
    }

    /// Whether an open transaction pins this lease.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.connection().is_pinned()
    }
}

impl std::ops::Deref for ConnectionLease {
    type Target = PooledConnection;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release_connection(conn);
        }
    }
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("pinned", &self.is_pinned())
            .finish()
    }
}

/// Priority-aware connection pool.
pub struct PriorityPool {
    inner: Arc<ConnectionPool>,
    queue: Arc<AgingQueue<AcquisitionJob>>,
    metrics: Arc<PriorityMetrics>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_requested: AtomicBool,
}

impl PriorityPool {
    /// Create the facade; call [`Self::initialize`] before acquiring.
    #[must_use]
    pub fn new(
        pool_config: PoolConfig,
        aging_config: AgingConfig,
        factory: ConnectionFactory,
    ) -> Arc<Self> {
        let metrics = Arc::new(PriorityMetrics::new());
        Arc::new(Self {
            inner: Arc::new(ConnectionPool::new(
                pool_config,
                factory,
                Arc::clone(&metrics),
            )),
            queue: Arc::new(AgingQueue::new(aging_config)),
            metrics,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    /// Initialize the inner pool and start workers, sweeper, and reaper.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        self.inner.initialize().await?;

        let mut tasks = self.tasks.lock();
        for _ in 0..self.inner.config().acquire_workers.max(1) {
            let inner = Arc::clone(&self.inner);
            let queue = Arc::clone(&self.queue);
            let metrics = Arc::clone(&self.metrics);
            let token = self.cancel.child_token();
            tasks.push(tokio::spawn(async move {
                worker_loop(inner, queue, metrics, token).await;
            }));
        }
        tasks.push(self.queue.spawn_sweeper(self.cancel.child_token()));
        if self.inner.config().enable_health_checks {
            tasks.push(self.inner.spawn_reaper(self.cancel.child_token()));
        }
        Ok(())
    }

    /// Acquire a connection at the given priority.
    ///
    /// The request ages in the queue while it waits; wait time is attributed
    /// to `priority` in the pool metrics whatever the outcome.
    pub async fn acquire(&self, priority: ConnectionPriority) -> Result<ConnectionLease> {
        if self.is_shutdown_requested() {
            return Err(GatewayError::connection_failed("pool is shutting down"));
        }

        let (reply, rx) = oneshot::channel();
        let started = Instant::now();

        self.metrics.base().update_queued(1);
        if let Err(e) = self.queue.enqueue(priority, AcquisitionJob { reply }) {
            self.metrics.base().update_queued(-1);
            self.metrics
                .record_acquisition_with_priority(priority, 0, false);
            return Err(e);
        }

        let result = match rx.await {
            Ok(result) => result,
            // Sender dropped without completing: workers are gone.
            Err(_) => Err(GatewayError::connection_failed(
                "pool shut down during acquisition",
            )),
        };

        let wait_us = started.elapsed().as_micros() as u64;
        self.metrics
            .record_acquisition_with_priority(priority, wait_us, result.is_ok());

        result.map(|conn| ConnectionLease {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Verify one connection at the lowest priority.
    ///
    /// Runs in the background; an unhealthy connection is flagged so the
    /// pool discards it on release.
    pub fn schedule_health_check(self: &Arc<Self>) {
        if self.is_shutdown_requested() {
            return;
        }
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            match pool.acquire(ConnectionPriority::HealthCheck).await {
                Ok(lease) => {
                    if !lease.resilient().is_initialized() {
                        lease.mark_unhealthy();
                    }
                    drop(lease);
                }
                Err(e) => debug!(error = %e, "health check acquisition failed"),
            }
        });
    }

    /// Signal shutdown without blocking.
    ///
    /// New acquisitions are rejected; pending and in-flight work is resolved
    /// by [`Self::shutdown`].
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Full shutdown: drain the queue with CONNECTION_FAILED completions,
    /// stop workers and background tasks, and shut the inner pool.
    ///
    /// The inner pool is flagged before the workers are joined so a worker
    /// parked in a long acquisition wakes immediately instead of running out
    /// its deadline. In-flight leases complete normally; their eventual
    /// release discards the connection.
    pub async fn shutdown(&self) {
        self.request_shutdown();
        self.queue.close();

        for job in self.queue.drain() {
            self.metrics.base().update_queued(-1);
            let _ = job
                .reply
                .send(Err(GatewayError::connection_failed("pool is shutting down")));
        }

        self.inner.shutdown();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("pool worker did not stop within 5s");
            }
        }
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<PriorityMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn aging_stats(&self) -> AgingStats {
        self.queue.stats()
    }

    /// Connections currently leased out.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.inner.active_connections()
    }

    /// Idle connections ready for reuse.
    #[must_use]
    pub fn available_connections(&self) -> usize {
        self.inner.available_connections()
    }

    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.inner.total_connections()
    }
}

impl Drop for PriorityPool {
    fn drop(&mut self) {
        // Best effort: tasks observe the token and stop on their own.
        self.cancel.cancel();
    }
}

async fn worker_loop(
    inner: Arc<ConnectionPool>,
    queue: Arc<AgingQueue<AcquisitionJob>>,
    metrics: Arc<PriorityMetrics>,
    token: CancellationToken,
) {
    while let Some(job) = queue.dequeue(&ConnectionPriority::ALL, &token).await {
        metrics.base().update_queued(-1);
        let result = inner.acquire_connection().await;
        if let Err(unclaimed) = job.reply.send(result) {
            // The requester gave up waiting; hand the connection back.
            if let Ok(conn) = unclaimed {
                inner.release_connection(conn);
            }
        }
    }
}
