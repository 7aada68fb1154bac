//! Gateway configuration.
//!
//! All knobs live in one TOML document:
//!
//! ```toml
//! name = "querygate"
//!
//! [pool]
//! min_connections = 5
//! max_connections = 50
//! acquire_timeout_ms = 5000
//!
//! [aging]
//! interval_ms = 500
//! curve = "linear"
//!
//! [cache]
//! enabled = true
//! max_entries = 10000
//! ttl_seconds = 300
//!
//! [reconnect]
//! initial_delay_ms = 100
//! max_retries = 10
//!
//! [health]
//! heartbeat_interval_ms = 5000
//!
//! [router]
//! default_timeout_ms = 30000
//! ```
//!
//! Sections are independent; omitted sections and fields take defaults.
//! Configurations are built before startup and read concurrently afterward.

use std::path::Path;
use std::time::Duration;

use querygate_error::{GatewayError, Result};
use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::gateway::{AuthConfig, RateLimitConfig};
use crate::pooling::{AgingConfig, AgingCurve, PoolConfig};
use crate::resilience::{HealthConfig, ReconnectConfig};
use crate::router::RouterConfig;

/// `[pool]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub min_connections: usize,
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub enable_health_checks: bool,
    pub acquire_workers: usize,
}

impl Default for PoolSection {
    fn default() -> Self {
        let defaults = PoolConfig::default();
        Self {
            min_connections: defaults.min_connections,
            max_connections: defaults.max_connections,
            acquire_timeout_ms: defaults.acquire_timeout.as_millis() as u64,
            idle_timeout_ms: defaults.idle_timeout.as_millis() as u64,
            health_check_interval_ms: defaults.health_check_interval.as_millis() as u64,
            enable_health_checks: defaults.enable_health_checks,
            acquire_workers: defaults.acquire_workers,
        }
    }
}

impl PoolSection {
    #[must_use]
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_connections: self.min_connections,
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            health_check_interval: Duration::from_millis(self.health_check_interval_ms),
            enable_health_checks: self.enable_health_checks,
            acquire_workers: self.acquire_workers,
        }
    }
}

/// `[aging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgingSection {
    pub interval_ms: u64,
    pub boost_increment: u32,
    pub curve: AgingCurve,
    pub max_boost: u32,
    pub starvation_threshold_ms: u64,
}

impl Default for AgingSection {
    fn default() -> Self {
        let defaults = AgingConfig::default();
        Self {
            interval_ms: defaults.interval.as_millis() as u64,
            boost_increment: defaults.boost_increment,
            curve: defaults.curve,
            max_boost: defaults.max_boost,
            starvation_threshold_ms: defaults.starvation_threshold.as_millis() as u64,
        }
    }
}

impl AgingSection {
    #[must_use]
    pub fn to_aging_config(&self) -> AgingConfig {
        AgingConfig {
            interval: Duration::from_millis(self.interval_ms),
            boost_increment: self.boost_increment,
            curve: self.curve,
            max_boost: self.max_boost,
            starvation_threshold: Duration::from_millis(self.starvation_threshold_ms),
        }
    }
}

/// `[reconnect]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub enable_auto_reconnect: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_retries: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        let defaults = ReconnectConfig::default();
        Self {
            enable_auto_reconnect: defaults.enable_auto_reconnect,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
            max_retries: defaults.max_retries,
        }
    }
}

impl ReconnectSection {
    #[must_use]
    pub fn to_reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            max_retries: self.max_retries,
            enable_auto_reconnect: self.enable_auto_reconnect,
        }
    }
}

/// `[health]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub heartbeat_interval_ms: u64,
    pub timeout_ms: u64,
    pub failure_threshold: u32,
    pub min_health_score: u32,
    pub enable_heartbeat: bool,
}

impl Default for HealthSection {
    fn default() -> Self {
        let defaults = HealthConfig::default();
        Self {
            heartbeat_interval_ms: defaults.heartbeat_interval.as_millis() as u64,
            timeout_ms: defaults.timeout.as_millis() as u64,
            failure_threshold: defaults.failure_threshold,
            min_health_score: defaults.min_health_score,
            enable_heartbeat: defaults.enable_heartbeat,
        }
    }
}

impl HealthSection {
    #[must_use]
    pub fn to_health_config(&self) -> HealthConfig {
        HealthConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            failure_threshold: self.failure_threshold,
            min_health_score: self.min_health_score,
            enable_heartbeat: self.enable_heartbeat,
        }
    }
}

/// Main gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Instance name used in logs and health output.
    pub name: String,
    pub pool: PoolSection,
    pub aging: AgingSection,
    pub cache: CacheConfig,
    pub reconnect: ReconnectSection,
    pub health: HealthSection,
    pub router: RouterConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "querygate".to_string(),
            pool: PoolSection::default(),
            aging: AgingSection::default(),
            cache: CacheConfig::default(),
            reconnect: ReconnectSection::default(),
            health: HealthSection::default(),
            router: RouterConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input)
            .map_err(|e| GatewayError::config(format!("invalid configuration: {e}")))
    }

    /// Load and parse a TOML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns every violation found, not just the first.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.pool.max_connections == 0 {
            errors.push("pool.max_connections must be greater than zero".to_string());
        }
        if self.pool.min_connections > self.pool.max_connections {
            errors.push(format!(
                "pool.min_connections ({}) exceeds pool.max_connections ({})",
                self.pool.min_connections, self.pool.max_connections
            ));
        }
        if self.pool.acquire_timeout_ms == 0 {
            errors.push("pool.acquire_timeout_ms must be greater than zero".to_string());
        }
        if self.aging.interval_ms == 0 {
            errors.push("aging.interval_ms must be greater than zero".to_string());
        }
        if self.reconnect.backoff_multiplier < 1.0 {
            errors.push(format!(
                "reconnect.backoff_multiplier ({}) must be at least 1.0",
                self.reconnect.backoff_multiplier
            ));
        }
        if self.health.enable_heartbeat && self.health.heartbeat_interval_ms == 0 {
            errors.push("health.heartbeat_interval_ms must be greater than zero".to_string());
        }
        if self.cache.enabled && self.cache.max_result_size_bytes == 0 {
            errors.push("cache.max_result_size_bytes must be greater than zero".to_string());
        }
        if self.router.default_timeout_ms == 0 {
            errors.push("router.default_timeout_ms must be greater than zero".to_string());
        }
        if self.router.max_concurrent_queries == 0 {
            errors.push("router.max_concurrent_queries must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
