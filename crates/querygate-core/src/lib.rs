//! # querygate core
//!
//! Core engine of the querygate database gateway: a middleware layer that
//! sits between client applications and backend database engines,
//! terminating client connections, caching read results, and dispatching
//! queries onto a pool of long-lived backend connections with priority
//! scheduling and automatic recovery.
//!
//! ## Subsystems
//!
//! - **`protocol`**: gateway message model (requests, responses, status codes)
//! - **`backend`**: the database driver contract the gateway consumes
//! - **`pooling`**: bounded connection pool, aging priority queue, facade
//! - **`resilience`**: per-connection health monitoring and auto-reconnect
//! - **`cache`**: LRU query cache with TTL and table-scoped invalidation
//! - **`router`**: the request path tying everything together
//! - **`gateway`**: authentication / rate-limiting contracts and sessions
//! - **`config`**: TOML-backed gateway configuration
//! - **`statistics`**: read-only metric snapshots for health endpoints
//!
//! ## Request flow
//!
//! ```text
//! QueryRequest
//!      ↓ classify / assign priority
//! ┌──────────────┐   SELECT only   ┌─────────────┐
//! │ QueryRouter  │ ──────────────→ │ QueryCache  │── hit → response
//! └──────┬───────┘                 └─────────────┘
//!        ↓ acquire(priority)
//! ┌──────────────┐  aging queue   ┌────────────────┐
//! │ PriorityPool │ ─────────────→ │ ConnectionPool │
//! └──────┬───────┘                └────────────────┘
//!        ↓ lease
//! ┌─────────────────────┐  heartbeat  ┌───────────────┐
//! │ ResilientConnection │ ──────────→ │ HealthMonitor │
//! └──────┬──────────────┘             └───────────────┘
//!        ↓
//!   DatabaseBackend (injected driver)
//! ```
//!
//! On success the router caches SELECT results, invalidates cached entries
//! for tables named by write queries, records metrics, and releases the
//! lease.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use querygate_core::cache::QueryCache;
//! use querygate_core::config::GatewayConfig;
//! use querygate_core::pooling::PriorityPool;
//! use querygate_core::router::QueryRouter;
//!
//! # async fn example(factory: querygate_core::pooling::ConnectionFactory)
//! # -> querygate_error::Result<()> {
//! let config = GatewayConfig::load_from_file("gateway.toml")?;
//!
//! let pool = PriorityPool::new(
//!     config.pool.to_pool_config(),
//!     config.aging.to_aging_config(),
//!     factory,
//! );
//! pool.initialize().await?;
//!
//! let router = Arc::new(QueryRouter::new(config.router.clone()));
//! router.set_connection_pool(pool);
//! router.set_cache(Arc::new(QueryCache::new(config.cache.clone())));
//!
//! let response = router.execute(&request).await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
// Missing docs allowed for internal items - public API is fully documented
#![allow(missing_docs)]
#![allow(clippy::doc_markdown)] // Backticks on every product name add noise
#![allow(clippy::missing_errors_doc)] // Error conditions documented where non-obvious
#![allow(clippy::cast_possible_truncation)] // Intentional u64->u32 casts in metrics
#![allow(clippy::cast_precision_loss)] // Intentional u64->f64 in rate computations
#![allow(clippy::cast_sign_loss)]

pub mod backend;
pub mod cache;
pub mod config;
pub mod gateway;
pub mod pooling;
pub mod protocol;
pub mod resilience;
pub mod router;
pub mod statistics;

pub use querygate_error::{GatewayError, Result};
