//! Shared fixtures for integration tests.

// Each test binary compiles this module; not every binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use querygate_core::backend::mock::{MockBackend, MockHandle};
use querygate_core::backend::{ConnectionConfig, SelectResult};
use querygate_core::cache::{CacheConfig, QueryCache};
use querygate_core::pooling::{AgingConfig, ConnectionFactory, PoolConfig, PriorityPool};
use querygate_core::resilience::{HealthConfig, ReconnectConfig, ResilientConnection};
use querygate_core::router::{QueryRouter, RouterConfig};

/// Tracks every mock backend a factory creates, so tests can script and
/// inspect them after they disappear into the pool.
#[derive(Clone, Default)]
pub struct MockFleet {
    handles: Arc<Mutex<Vec<MockHandle>>>,
    select_result: Arc<Mutex<SelectResult>>,
    latency: Arc<Mutex<Duration>>,
}

impl MockFleet {
    pub fn new() -> Self {
        let fleet = Self::default();
        *fleet.select_result.lock() = MockBackend::sample_rows();
        fleet
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    /// Connection factory producing scripted backends (heartbeat disabled so
    /// probes never pollute call counts).
    pub fn factory(&self, reconnect: ReconnectConfig) -> ConnectionFactory {
        let fleet = self.clone();
        Arc::new(move || {
            let fleet = fleet.clone();
            let reconnect = reconnect.clone();
            Box::pin(async move {
                let backend = MockBackend::new()
                    .with_select_result(fleet.select_result.lock().clone())
                    .with_affected_rows(1)
                    .with_latency(*fleet.latency.lock());
                fleet.handles.lock().push(backend.handle());
                let conn = ResilientConnection::with_health_config(
                    Box::new(backend),
                    reconnect,
                    HealthConfig {
                        enable_heartbeat: false,
                        ..HealthConfig::default()
                    },
                );
                conn.initialize(&ConnectionConfig::new("mock://fleet")).await?;
                Ok(conn)
            })
        })
    }

    pub fn handles(&self) -> Vec<MockHandle> {
        self.handles.lock().clone()
    }

    /// Query operations across every backend created so far.
    pub fn total_query_calls(&self) -> u64 {
        self.handles.lock().iter().map(MockHandle::query_calls).sum()
    }
}

/// Route test logs through the capture writer; `RUST_LOG` filters apply.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        max_retries: 3,
        enable_auto_reconnect: true,
    }
}

pub fn small_pool(max: usize, acquire_timeout_ms: u64) -> PoolConfig {
    PoolConfig {
        min_connections: 1,
        max_connections: max,
        acquire_timeout: Duration::from_millis(acquire_timeout_ms),
        enable_health_checks: false,
        acquire_workers: 2,
        ..PoolConfig::default()
    }
}

/// A ready router over a mock-backed pool and a cache with `cache_config`.
pub async fn gateway_fixture(
    pool_config: PoolConfig,
    cache_config: CacheConfig,
) -> (Arc<QueryRouter>, Arc<PriorityPool>, Arc<QueryCache>, MockFleet) {
    init_tracing();
    let fleet = MockFleet::new();
    let pool = PriorityPool::new(pool_config, AgingConfig::default(), fleet.factory(fast_reconnect()));
    pool.initialize().await.expect("pool initializes");

    let cache = Arc::new(QueryCache::new(cache_config));
    let router = Arc::new(QueryRouter::new(RouterConfig::default()));
    router.set_connection_pool(Arc::clone(&pool));
    router.set_cache(Arc::clone(&cache));

    (router, pool, cache, fleet)
}
