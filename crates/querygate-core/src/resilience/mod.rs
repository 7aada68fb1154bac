//! Connection resilience: health monitoring and automatic reconnection.

mod health;
mod resilient;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::backend::DatabaseBackend;

/// Backend handle shared between the resilient wrapper and its monitor.
pub(crate) type SharedBackend = Arc<Mutex<Box<dyn DatabaseBackend>>>;

pub use health::{HealthConfig, HealthMonitor, HealthStatus};
pub use resilient::{ConnectionState, ReconnectConfig, ResilientConnection};
