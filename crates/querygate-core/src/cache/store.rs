//! LRU query cache with TTL expiry and table-scoped invalidation.
//!
//! Storage is a recency-ordered [`lru::LruCache`] keyed by cache key, plus a
//! secondary index from table name to the set of keys whose entries mention
//! that table. The list is kept unbounded and capacity is enforced manually
//! so evictions are counted and the table index stays consistent with every
//! removal path (eviction, expiry, invalidation, replacement).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::RwLock;
use tracing::debug;

use super::config::CacheConfig;
use super::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::protocol::{CellValue, ColumnMetadata, QueryResponse, ResultRow, StatusCode};

struct CacheEntry {
    response: QueryResponse,
    /// `None` when TTL is disabled.
    expires_at: Option<Instant>,
    tables: HashSet<String>,
    estimated_size: usize,
}

struct CacheInner {
    /// Key -> entry, most recently used first.
    entries: LruCache<String, CacheEntry>,
    /// Table name -> keys of entries mentioning it.
    tables: HashMap<String, HashSet<String>>,
}

impl CacheInner {
    /// Detach `key`'s entry from the table index.
    fn unindex(&mut self, key: &str, entry_tables: &HashSet<String>) {
        for table in entry_tables {
            if let Some(keys) = self.tables.get_mut(table) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tables.remove(table);
                }
            }
        }
    }
}

/// Thread-safe LRU cache for query responses.
///
/// Reads and writes both take the exclusive lock (a hit splices the entry to
/// the recency front); metrics are atomics and never require the lock. The
/// lock is never held across query execution.
pub struct QueryCache {
    config: CacheConfig,
    inner: RwLock<CacheInner>,
    metrics: CacheMetrics,
}

impl QueryCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(CacheInner {
                entries: LruCache::unbounded(),
                tables: HashMap::new(),
            }),
            metrics: CacheMetrics::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Look up a cached response.
    ///
    /// Returns `None` without recording anything when the cache is disabled.
    /// An entry past its TTL is removed and counted as an expiration plus a
    /// miss. A hit refreshes recency when LRU is enabled.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<QueryResponse> {
        if !self.config.enabled {
            return None;
        }

        let mut inner = self.inner.write();

        let expired = match inner.entries.peek(key) {
            None => {
                self.metrics.bump_miss();
                return None;
            }
            Some(entry) => entry
                .expires_at
                .is_some_and(|expires_at| Instant::now() > expires_at),
        };

        if expired {
            if let Some(entry) = inner.entries.pop(key) {
                let tables = entry.tables;
                inner.unindex(key, &tables);
            }
            self.metrics.bump_expiration();
            self.metrics.bump_miss();
            return None;
        }

        self.metrics.bump_hit();
        let entry = if self.config.enable_lru {
            inner.entries.get(key)
        } else {
            inner.entries.peek(key)
        };
        entry.map(|e| e.response.clone())
    }

    /// Cache a response under `key`, indexed by the tables it derives from.
    ///
    /// Error responses, oversized responses, and a zero-capacity cache all
    /// leave the cache untouched (the oversized case counts as
    /// `skipped_too_large`). An existing entry under the same key is
    /// replaced; the LRU tail is evicted until the entry fits.
    pub fn put(&self, key: String, response: QueryResponse, tables: HashSet<String>) {
        if !self.config.enabled || self.config.max_entries == 0 {
            return;
        }
        if response.status != StatusCode::Ok {
            return;
        }

        let estimated_size = estimate_size(&response);
        if estimated_size > self.config.max_result_size_bytes {
            self.metrics.bump_skipped_too_large();
            debug!(estimated_size, "response too large to cache");
            return;
        }

        let expires_at = if self.config.ttl_seconds > 0 {
            Some(Instant::now() + Duration::from_secs(u64::from(self.config.ttl_seconds)))
        } else {
            None
        };

        let mut inner = self.inner.write();

        if let Some(existing) = inner.entries.pop(&key) {
            let tables = existing.tables;
            inner.unindex(&key, &tables);
        }

        while inner.entries.len() >= self.config.max_entries {
            let Some((evicted_key, evicted)) = inner.entries.pop_lru() else {
                break;
            };
            inner.unindex(&evicted_key, &evicted.tables);
            self.metrics.bump_eviction();
        }

        for table in &tables {
            inner
                .tables
                .entry(table.clone())
                .or_default()
                .insert(key.clone());
        }
        inner.entries.push(
            key,
            CacheEntry {
                response,
                expires_at,
                tables,
                estimated_size,
            },
        );

        self.metrics.bump_put();
    }

    /// Remove every entry that mentions `table`.
    ///
    /// Returns the number of entries removed; each counts as an
    /// invalidation. Idempotent.
    pub fn invalidate(&self, table: &str) -> u64 {
        let mut inner = self.inner.write();

        let Some(keys) = inner.tables.remove(table) else {
            return 0;
        };

        let mut removed = 0;
        for key in keys {
            if let Some(entry) = inner.entries.pop(&key) {
                // The entry may mention other tables too; detach everywhere.
                let tables = entry.tables;
                inner.unindex(&key, &tables);
                removed += 1;
            }
        }

        self.metrics.bump_invalidations(removed);
        removed
    }

    /// Remove one entry by key, counting an invalidation if present.
    pub fn invalidate_key(&self, key: &str) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.entries.pop(key) {
            let tables = entry.tables;
            inner.unindex(key, &tables);
            self.metrics.bump_invalidations(1);
        }
    }

    /// Remove every entry, counting each as an invalidation.
    ///
    /// Used by the write path when `invalidate_all_on_write` is set.
    pub fn invalidate_all(&self) -> u64 {
        let mut inner = self.inner.write();
        let removed = inner.entries.len() as u64;
        inner.entries.clear();
        inner.tables.clear();
        self.metrics.bump_invalidations(removed);
        removed
    }

    /// Drop all entries and indices without touching the counters.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.tables.clear();
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.read().entries.len()
    }

    #[must_use]
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Verify the cross-structure invariants; test support.
    ///
    /// Every indexed key must resolve to an entry mentioning the table, and
    /// every entry's tables must be indexed back to its key.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn check_invariants(&self) {
        let inner = self.inner.read();
        for (table, keys) in &inner.tables {
            for key in keys {
                let entry = inner
                    .entries
                    .peek(key)
                    .unwrap_or_else(|| panic!("table index points at missing key {key}"));
                assert!(
                    entry.tables.contains(table),
                    "entry {key} does not mention indexed table {table}"
                );
            }
        }
        for (key, entry) in inner.entries.iter() {
            for table in &entry.tables {
                assert!(
                    inner
                        .tables
                        .get(table)
                        .is_some_and(|keys| keys.contains(key)),
                    "entry {key} table {table} missing from index"
                );
            }
        }
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("enabled", &self.config.enabled)
            .field("size", &self.size())
            .finish()
    }
}

// Metric helpers kept on the metrics struct to keep call sites short.
impl CacheMetrics {
    fn bump_hit(&self) {
        self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
    fn bump_miss(&self) {
        self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
    fn bump_eviction(&self) {
        self.evictions
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
    fn bump_expiration(&self) {
        self.expirations
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
    fn bump_invalidations(&self, n: u64) {
        self.invalidations
            .fetch_add(n, std::sync::atomic::Ordering::Relaxed);
    }
    fn bump_put(&self) {
        self.puts.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
    fn bump_skipped_too_large(&self) {
        self.skipped_too_large
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

/// Advisory size estimate for a response.
///
/// Fixed struct overhead plus every variable-width payload; stable and
/// monotone rather than byte-exact.
fn estimate_size(response: &QueryResponse) -> usize {
    let mut size = std::mem::size_of::<QueryResponse>();

    size += response.error_message.len();

    for column in &response.columns {
        size += std::mem::size_of::<ColumnMetadata>();
        size += column.name.len();
        size += column.type_name.len();
    }

    for row in &response.rows {
        size += std::mem::size_of::<ResultRow>();
        for cell in &row.cells {
            size += std::mem::size_of::<CellValue>();
            match cell {
                CellValue::Text(s) => size += s.len(),
                CellValue::Bytes(b) => size += b.len(),
                _ => {}
            }
        }
    }

    size
}
