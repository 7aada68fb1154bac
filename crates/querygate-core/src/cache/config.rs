//! Cache configuration.

use serde::{Deserialize, Serialize};

/// Configuration for query cache behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Maximum number of cached entries; 0 disables storage entirely.
    pub max_entries: usize,
    /// Time-to-live in seconds; 0 means entries never expire from TTL.
    pub ttl_seconds: u32,
    /// Responses estimated above this size are never cached.
    pub max_result_size_bytes: usize,
    /// When false, hits do not refresh recency (insertion order eviction).
    pub enable_lru: bool,
    /// Escape hatch for extractor-unsafe SQL dialects: any write wipes the
    /// whole cache instead of trusting table extraction.
    pub invalidate_all_on_write: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: 10_000,
            ttl_seconds: 300,
            max_result_size_bytes: 1024 * 1024,
            enable_lru: true,
            invalidate_all_on_write: false,
        }
    }
}

impl CacheConfig {
    /// An enabled configuration with defaults otherwise.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}
