//! Query routing and execution.
//!
//! The router is the request path of the gateway: it classifies the query,
//! assigns a scheduling priority, consults the cache, leases a connection
//! from the priority pool, dispatches to the per-kind handler, records
//! metrics, and always releases the lease.

mod handlers;
mod tables;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::cache::{make_key, QueryCache};
use crate::pooling::{ConnectionPriority, PriorityPool};
use crate::protocol::{QueryRequest, QueryResponse, QueryType, StatusCode};

pub use tables::extract_tables;

/// Configuration for the query router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Applied when a request carries no timeout of its own.
    pub default_timeout_ms: u32,
    pub max_concurrent_queries: usize,
    pub enable_metrics: bool,
    /// When set, PING verifies a pooled connection instead of answering
    /// from the router alone.
    pub ping_uses_connection: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_concurrent_queries: 100,
            enable_metrics: true,
            ping_uses_connection: false,
        }
    }
}

/// Router performance counters.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    pub total_queries: AtomicU64,
    pub successful_queries: AtomicU64,
    pub failed_queries: AtomicU64,
    pub timeout_queries: AtomicU64,
    pub total_execution_time_us: AtomicU64,
}

impl RouterMetrics {
    fn record(&self, status: StatusCode, elapsed_us: u64) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.total_execution_time_us
            .fetch_add(elapsed_us, Ordering::Relaxed);
        match status {
            StatusCode::Ok => self.successful_queries.fetch_add(1, Ordering::Relaxed),
            StatusCode::Timeout => self.timeout_queries.fetch_add(1, Ordering::Relaxed),
            _ => self.failed_queries.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Mean end-to-end latency in microseconds; 0 with no traffic.
    #[must_use]
    pub fn average_execution_time_us(&self) -> f64 {
        let total = self.total_queries.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.total_execution_time_us.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Fraction of queries that returned OK; 0.0 with no traffic.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_queries.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.successful_queries.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn reset(&self) {
        self.total_queries.store(0, Ordering::Relaxed);
        self.successful_queries.store(0, Ordering::Relaxed);
        self.failed_queries.store(0, Ordering::Relaxed);
        self.timeout_queries.store(0, Ordering::Relaxed);
        self.total_execution_time_us.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> RouterMetricsSnapshot {
        RouterMetricsSnapshot {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            successful_queries: self.successful_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            timeout_queries: self.timeout_queries.load(Ordering::Relaxed),
            total_execution_time_us: self.total_execution_time_us.load(Ordering::Relaxed),
            average_execution_time_us: self.average_execution_time_us(),
            success_rate: self.success_rate(),
        }
    }
}

/// Serializable snapshot of [`RouterMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterMetricsSnapshot {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub timeout_queries: u64,
    pub total_execution_time_us: u64,
    pub average_execution_time_us: f64,
    pub success_rate: f64,
}

/// Routes queries onto pooled connections and returns wire responses.
///
/// All methods are thread-safe; queries execute concurrently up to
/// `max_concurrent_queries`.
pub struct QueryRouter {
    config: RouterConfig,
    pool: RwLock<Option<Arc<PriorityPool>>>,
    cache: RwLock<Option<Arc<QueryCache>>>,
    metrics: RouterMetrics,
    concurrency: Semaphore,
}

impl QueryRouter {
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        let permits = config.max_concurrent_queries.max(1);
        Self {
            config,
            pool: RwLock::new(None),
            cache: RwLock::new(None),
            metrics: RouterMetrics::default(),
            concurrency: Semaphore::new(permits),
        }
    }

    /// Bind the connection pool used for execution.
    pub fn set_connection_pool(&self, pool: Arc<PriorityPool>) {
        *self.pool.write() = Some(pool);
    }

    /// Bind the query cache consulted by SELECT and invalidated by writes.
    pub fn set_cache(&self, cache: Arc<QueryCache>) {
        *self.cache.write() = Some(cache);
    }

    /// Whether a pool is bound and queries can execute.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.pool.read().is_some()
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Execute a request end to end and return its response.
    ///
    /// The full path: priority assignment, cache consultation (SELECT),
    /// priority-aware connection acquisition bounded by the request
    /// timeout, handler dispatch, cache maintenance, metric recording, and
    /// lease release.
    pub async fn execute(&self, request: &QueryRequest) -> QueryResponse {
        let request_id = request.header.message_id;

        let Some(pool) = self.pool.read().clone() else {
            return self.finish(
                request,
                QueryResponse::error(request_id, StatusCode::Error, "router not ready"),
                0,
            );
        };

        let started = Instant::now();

        let Ok(_permit) = self.concurrency.try_acquire() else {
            return self.finish(
                request,
                QueryResponse::error(
                    request_id,
                    StatusCode::ServerBusy,
                    "too many concurrent queries",
                ),
                elapsed_us(started),
            );
        };

        // SELECT fast path: a cache hit answers before any connection is
        // leased. The derived key rides along so the handler can feed the
        // cache on a miss without re-deriving or double-counting.
        let cache = self.cache.read().clone();
        let live_cache = cache.as_deref().filter(|c| c.is_enabled());
        let select_cache_key = if request.query_type == QueryType::Select {
            live_cache.map(|_| make_key(request))
        } else {
            None
        };
        if let (Some(cache), Some(key)) = (live_cache, select_cache_key.as_deref()) {
            if let Some(mut hit) = cache.get(key) {
                debug!(key, "select served from cache");
                hit.header.message_id = request_id;
                return self.finish(request, hit, elapsed_us(started));
            }
        }

        let priority = request
            .options
            .priority
            .unwrap_or_else(|| ConnectionPriority::default_for(request.query_type));
        let timeout_ms = if request.options.timeout_ms > 0 {
            request.options.timeout_ms
        } else {
            self.config.default_timeout_ms
        };

        let needs_connection =
            request.query_type != QueryType::Ping || self.config.ping_uses_connection;

        let lease = if needs_connection {
            let acquired = tokio::time::timeout(
                Duration::from_millis(u64::from(timeout_ms)),
                pool.acquire(priority),
            )
            .await;
            match acquired {
                Err(_) => {
                    debug!(timeout_ms, "connection acquisition timed out");
                    return self.finish(
                        request,
                        QueryResponse::error(
                            request_id,
                            StatusCode::Timeout,
                            format!("query timed out after {timeout_ms}ms"),
                        ),
                        elapsed_us(started),
                    );
                }
                Ok(Err(e)) => {
                    return self.finish(
                        request,
                        QueryResponse::error(request_id, StatusCode::from(&e), e.to_string()),
                        elapsed_us(started),
                    );
                }
                Ok(Ok(lease)) => Some(lease),
            }
        } else {
            None
        };

        let ctx = handlers::HandlerContext {
            cache: live_cache,
            select_cache_key,
        };
        let response = handlers::dispatch(request, lease.as_ref(), &ctx).await;

        // Lease drops here; the connection always returns to the pool.
        self.finish(request, response, elapsed_us(started))
    }

    /// Execute on a background task and hand the response to `callback`.
    ///
    /// No ordering is guaranteed between concurrent async requests.
    pub fn execute_async<F>(self: &Arc<Self>, request: QueryRequest, callback: F)
    where
        F: FnOnce(QueryResponse) + Send + 'static,
    {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            let response = router.execute(&request).await;
            callback(response);
        });
    }

    fn finish(
        &self,
        request: &QueryRequest,
        mut response: QueryResponse,
        elapsed_us: u64,
    ) -> QueryResponse {
        response.header.correlation_id = request.header.correlation_id.clone();
        response.execution_time_us = elapsed_us;
        if self.config.enable_metrics {
            self.metrics.record(response.status, elapsed_us);
        }
        response
    }
}

impl std::fmt::Debug for QueryRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRouter")
            .field("ready", &self.is_ready())
            .field("config", &self.config)
            .finish()
    }
}

fn elapsed_us(started: Instant) -> u64 {
    started.elapsed().as_micros() as u64
}
