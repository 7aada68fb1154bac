//! Read-only metric snapshots for health endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::CacheMetricsSnapshot;
use crate::pooling::{AgingStats, PoolMetricsSnapshot, PrioritySnapshot};
use crate::router::RouterMetricsSnapshot;

/// One flat snapshot across every subsystem.
///
/// Plain data, safe to serialize for a health endpoint or flatten into a
/// string map for text-based surfaces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayStatistics {
    pub pool: PoolMetricsSnapshot,
    pub priorities: Vec<PrioritySnapshot>,
    pub aging: AgingStats,
    pub cache: Option<CacheMetricsSnapshot>,
    pub router: RouterMetricsSnapshot,
}

impl GatewayStatistics {
    /// Flatten into `section.key -> value` string pairs.
    #[must_use]
    pub fn statistics_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();

        map.insert(
            "pool.total_acquisitions".to_string(),
            self.pool.total_acquisitions.to_string(),
        );
        map.insert(
            "pool.successful_acquisitions".to_string(),
            self.pool.successful_acquisitions.to_string(),
        );
        map.insert(
            "pool.failed_acquisitions".to_string(),
            self.pool.failed_acquisitions.to_string(),
        );
        map.insert("pool.timeouts".to_string(), self.pool.timeouts.to_string());
        map.insert(
            "pool.average_wait_time_us".to_string(),
            format!("{:.1}", self.pool.average_wait_time_us),
        );
        map.insert(
            "pool.current_active".to_string(),
            self.pool.current_active.to_string(),
        );
        map.insert(
            "pool.peak_active".to_string(),
            self.pool.peak_active.to_string(),
        );

        for priority in &self.priorities {
            map.insert(
                format!("pool.priority.{}.acquisitions", priority.priority),
                priority.acquisitions.to_string(),
            );
            map.insert(
                format!("pool.priority.{}.total_wait_time_us", priority.priority),
                priority.total_wait_time_us.to_string(),
            );
        }

        map.insert(
            "aging.total_boosts_applied".to_string(),
            self.aging.total_boosts_applied.to_string(),
        );
        map.insert(
            "aging.starvation_alerts".to_string(),
            self.aging.starvation_alerts.to_string(),
        );
        map.insert(
            "aging.avg_wait_time_us".to_string(),
            self.aging.avg_wait_time_us.to_string(),
        );
        map.insert(
            "aging.max_wait_time_us".to_string(),
            self.aging.max_wait_time_us.to_string(),
        );

        if let Some(cache) = &self.cache {
            map.insert("cache.hits".to_string(), cache.hits.to_string());
            map.insert("cache.misses".to_string(), cache.misses.to_string());
            map.insert("cache.evictions".to_string(), cache.evictions.to_string());
            map.insert(
                "cache.invalidations".to_string(),
                cache.invalidations.to_string(),
            );
            map.insert(
                "cache.hit_rate".to_string(),
                format!("{:.3}", cache.hit_rate),
            );
        }

        map.insert(
            "router.total_queries".to_string(),
            self.router.total_queries.to_string(),
        );
        map.insert(
            "router.successful_queries".to_string(),
            self.router.successful_queries.to_string(),
        );
        map.insert(
            "router.failed_queries".to_string(),
            self.router.failed_queries.to_string(),
        );
        map.insert(
            "router.timeout_queries".to_string(),
            self.router.timeout_queries.to_string(),
        );
        map.insert(
            "router.success_rate".to_string(),
            format!("{:.3}", self.router.success_rate),
        );

        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pooling::ConnectionPriority;

    #[test]
    fn test_statistics_map_shape() {
        let stats = GatewayStatistics {
            pool: PoolMetricsSnapshot {
                total_acquisitions: 10,
                successful_acquisitions: 9,
                ..PoolMetricsSnapshot::default()
            },
            priorities: vec![PrioritySnapshot {
                priority: ConnectionPriority::Critical,
                acquisitions: 4,
                total_wait_time_us: 400,
            }],
            cache: Some(CacheMetricsSnapshot {
                hits: 5,
                misses: 5,
                hit_rate: 0.5,
                ..CacheMetricsSnapshot::default()
            }),
            ..GatewayStatistics::default()
        };

        let map = stats.statistics_map();
        assert_eq!(map.get("pool.total_acquisitions").unwrap(), "10");
        assert_eq!(map.get("pool.priority.critical.acquisitions").unwrap(), "4");
        assert_eq!(map.get("cache.hit_rate").unwrap(), "0.500");
        assert_eq!(map.get("router.total_queries").unwrap(), "0");
    }

    #[test]
    fn test_no_cache_section_when_absent() {
        let stats = GatewayStatistics::default();
        let map = stats.statistics_map();
        assert!(!map.keys().any(|k| k.starts_with("cache.")));
    }

    #[test]
    fn test_serializes_to_json() {
        let stats = GatewayStatistics::default();
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"router\""));
    }
}
