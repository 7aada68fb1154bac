//! Query result caching with table-scoped invalidation.
//!
//! SELECT responses are cached under a deterministic key derived from the
//! statement, its parameters, and the row cap. Write queries invalidate
//! every cached entry that mentions one of their tables, so readers never
//! observe results older than the last write the gateway saw.

mod config;
mod key;
mod metrics;
mod store;

pub use config::CacheConfig;
pub use key::make_key;
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use store::QueryCache;
