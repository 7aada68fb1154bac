//! Priority-aware connection pooling.
//!
//! Three layers compose here:
//!
//! 1. [`ConnectionPool`] - the bounded pool that owns backend connections
//! 2. [`AgingQueue`] - a multi-band FIFO whose sweeper boosts long-waiting
//!    entries so low-priority work is never starved
//! 3. [`PriorityPool`] - the facade gluing the two together behind a
//!    priority-aware `acquire` with cooperative shutdown

mod aging_queue;
mod connection;
mod metrics;
mod pool;
mod priority;
mod priority_pool;

pub use aging_queue::{AgingQueue, AgingStats};
pub use connection::PooledConnection;
pub use metrics::{PoolMetrics, PoolMetricsSnapshot, PriorityMetrics, PrioritySnapshot};
pub use pool::{ConnectionFactory, ConnectionPool, PoolConfig};
pub use priority::{AgingConfig, AgingCurve, ConnectionPriority};
pub use priority_pool::{ConnectionLease, PriorityPool};
